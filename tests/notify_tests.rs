//! These tests poll loader futures by hand to check who gets woken, and when:
//! only the driving future waits on the window and the store, and dropping
//! it hands the job to another waiting future.

use async_trait::async_trait;
use cooked_waker::{IntoWaker, Wake, WakeRef};
use futures::{executor, future, FutureExt};
use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{Context, Poll, Waker},
    thread::sleep,
    time::Duration,
};
use tableloader::{
    row, BatchRules, FilterPipeline, KeyLoader, LoadFuture, MemoryAdapter, MemoryError,
    PersistenceAdapter, Query, Row, Value, Window,
};

/// Pending on its first poll, after waking the poller.
#[derive(Debug, Default)]
struct YieldOnce(bool);

impl Future for YieldOnce {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let yielded = &mut self.get_mut().0;
        if *yielded {
            Poll::Ready(())
        } else {
            *yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// The in-memory store, except every query takes one extra poll.
#[derive(Debug, Default)]
struct Sluggish(MemoryAdapter);

#[async_trait]
impl PersistenceAdapter for Sluggish {
    type Error = MemoryError;

    async fn execute(&self, query: &Query) -> Result<Vec<Row>, MemoryError> {
        YieldOnce::default().await;
        self.0.execute(query).await
    }
}

fn store() -> Arc<Sluggish> {
    let db = Sluggish::default();
    db.0.insert("accounts", (1..=5).map(|id| row([("id", Value::from(id))])));
    Arc::new(db)
}

fn loader(db: &Arc<Sluggish>, window: Window) -> KeyLoader {
    let rules = BatchRules {
        window,
        max_keys: None,
    };
    KeyLoader::new(db.clone(), FilterPipeline::new("accounts"), "id", rules)
}

/// Remembers whether it was woken since the last reset.
#[derive(Debug, Clone, Default, IntoWaker)]
struct Flag(Arc<AtomicBool>);

impl WakeRef for Flag {
    fn wake_by_ref(&self) {
        self.0.store(true, Ordering::SeqCst)
    }
}

impl Wake for Flag {}

/// A lookup polled by hand with its own waker.
struct Lookup {
    fut: LoadFuture,
    flag: Flag,
    waker: Waker,
}

impl Lookup {
    fn new(fut: LoadFuture) -> Self {
        let flag = Flag::default();
        Lookup {
            fut,
            waker: flag.clone().into_waker(),
            flag,
        }
    }

    /// Poll once, returning the id of the row found.
    fn poll(&mut self) -> Poll<Value> {
        self.flag.0.store(false, Ordering::SeqCst);
        self.fut
            .poll_unpin(&mut Context::from_waker(&self.waker))
            .map(|found| found.unwrap().unwrap()["id"].clone())
    }

    fn woken(&self) -> bool {
        self.flag.0.load(Ordering::SeqCst)
    }
}

#[test]
fn only_the_first_poller_waits_on_the_window() {
    let db = store();
    let accounts = loader(&db, Window::Delay(Duration::from_millis(5)));

    let mut lookups: Vec<Lookup> = (1..=3).map(|id| Lookup::new(accounts.load(id))).collect();

    // The last lookup is polled first, so it drives.
    for lookup in lookups.iter_mut().rev() {
        assert_eq!(lookup.poll(), Poll::Pending);
    }
    assert!(lookups.iter().all(|lookup| !lookup.woken()));

    sleep(Duration::from_millis(50));
    let woken: Vec<bool> = lookups.iter().map(Lookup::woken).collect();
    assert_eq!(woken, [false, false, true]);

    // The window has closed and the query is dispatched, but the store takes
    // one more poll. Only the driver is told to make it.
    assert_eq!(lookups[2].poll(), Poll::Pending);
    let woken: Vec<bool> = lookups.iter().map(Lookup::woken).collect();
    assert_eq!(woken, [false, false, true]);
    assert!(db.0.executed().is_empty());

    // Finishing the query wakes everyone else.
    assert_eq!(lookups[2].poll(), Poll::Ready(Value::from(3)));
    assert!(lookups[0].woken() && lookups[1].woken());

    assert_eq!(lookups[0].poll(), Poll::Ready(Value::from(1)));
    assert_eq!(lookups[1].poll(), Poll::Ready(Value::from(2)));
    assert_eq!(db.0.executed_on("accounts").len(), 1);
}

/// The one lookup that was woken, if exactly one was.
fn single_woken(lookups: &[(i32, Lookup)]) -> i32 {
    let woken: Vec<i32> = lookups
        .iter()
        .filter(|(_, lookup)| lookup.woken())
        .map(|(id, _)| *id)
        .collect();

    match woken.as_slice() {
        [id] => *id,
        other => panic!("expected exactly one woken lookup, got {other:?}"),
    }
}

#[test]
fn dropping_the_driver_hands_over() {
    let db = store();
    let accounts = loader(&db, Window::Delay(Duration::from_millis(1)));

    let mut lookups: Vec<(i32, Lookup)> = (1..=4)
        .map(|id| (id, Lookup::new(accounts.load(id))))
        .collect();
    for (_, lookup) in lookups.iter_mut() {
        assert_eq!(lookup.poll(), Poll::Pending);
    }

    // Lookup 1 polled first and drives. Dropping it while the window is open
    // also takes its key out of the batch.
    drop(lookups.remove(0));
    let driver = single_woken(&lookups);

    sleep(Duration::from_millis(10));

    let index = lookups.iter().position(|(id, _)| *id == driver).unwrap();
    assert_eq!(lookups[index].1.poll(), Poll::Pending);

    // Now the query is in flight. Dropping this driver too wakes another.
    drop(lookups.remove(index));
    let driver = single_woken(&lookups);

    let index = lookups.iter().position(|(id, _)| *id == driver).unwrap();
    assert_eq!(lookups[index].1.poll(), Poll::Ready(Value::from(driver)));
    let (_, finished) = lookups.remove(index);
    assert!(!finished.woken());

    for (id, lookup) in lookups.iter_mut() {
        assert!(lookup.woken());
        assert_eq!(lookup.poll(), Poll::Ready(Value::from(*id)));
    }

    let executed = db.0.executed_on("accounts");
    assert_eq!(executed.len(), 1);
    assert_eq!(
        executed[0].in_values("id").unwrap(),
        [Value::from(2), Value::from(3), Value::from(4)]
    );
}

/// Once a batch is running it takes no more keys: later lookups open a new
/// window, even for a key the running batch is still fetching.
#[test]
fn lookups_after_dispatch_open_a_new_window() {
    let db = store();
    let accounts = loader(&db, Window::Immediate);

    let mut first = Lookup::new(accounts.load(1));
    assert_eq!(first.poll(), Poll::Pending);
    assert_eq!(accounts.cached(&Value::from(1)), None);

    let (again, other) =
        executor::block_on(future::try_join(accounts.load(1), accounts.load(2))).unwrap();
    assert_eq!(again.unwrap()["id"], Value::from(1));
    assert_eq!(other.unwrap()["id"], Value::from(2));

    assert!(first.woken());
    assert_eq!(first.poll(), Poll::Ready(Value::from(1)));

    // The second window reached the store while the first was still
    // yielding.
    let executed = db.0.executed_on("accounts");
    assert_eq!(executed.len(), 2);
    assert_eq!(executed[0].in_values("id").unwrap(), [Value::from(1), Value::from(2)]);
    assert_eq!(executed[1].in_values("id").unwrap(), [Value::from(1)]);

    // Both windows have resolved key 1, so it's cached from here on.
    assert!(accounts.cached(&Value::from(1)).is_some());
    executor::block_on(accounts.load(1)).unwrap();
    assert_eq!(db.0.executed().len(), 2);
}
