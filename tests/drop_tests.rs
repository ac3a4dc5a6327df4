//! These tests ensure that dropped futures correctly update the shared batch:
//! their keys leave an open window, and values they no longer need are
//! released.

use cooked_waker::{IntoWaker, Wake, WakeRef};
use futures::{executor, FutureExt};
use futures_timer::Delay;
use std::{
    cell::Cell,
    rc::Rc,
    sync::Arc,
    task::Context,
    time::Duration,
};
use tableloader::{
    BatchController, BatchRules, FilterPipeline, KeyLoader, KeySet, MemoryAdapter, Value,
    ValueSet, Window, row,
};

/// A waker for futures polled by hand.
#[derive(Debug, Default, Copy, Clone, IntoWaker)]
struct Ignored;

impl WakeRef for Ignored {
    fn wake_by_ref(&self) {}
}

impl Wake for Ignored {}

/// Wrap each key in an `Rc`, so the tests can count how many copies of a
/// value are alive.
async fn shared(keys: KeySet<Value>) -> Result<ValueSet<Rc<Value>>, ()> {
    Ok(keys.into_values(|key| Rc::new(key.clone())))
}

#[test]
fn waiters_share_one_value() {
    let rules = BatchRules {
        window: Window::Immediate,
        max_keys: None,
    };
    let controller = BatchController::new(rules, shared);

    let waiters: Vec<_> = (0..4).map(|_| controller.load(Value::from("acme"))).collect();
    let mut waiters = waiters.into_iter();

    let first = executor::block_on(waiters.next().unwrap()).unwrap();
    assert_eq!(*first, Value::from("acme"));

    // The batch keeps its own copy for the three remaining waiters.
    assert_eq!(Rc::strong_count(&first), 2);

    let second = executor::block_on(waiters.next().unwrap()).unwrap();
    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(Rc::strong_count(&first), 3);

    // One waiter gives up; one is still owed the value.
    drop(waiters.next());
    assert_eq!(Rc::strong_count(&first), 3);

    // Once nobody is left, the batch lets go.
    drop(waiters);
    assert_eq!(Rc::strong_count(&first), 2);
}

#[test]
fn keys_dropped_during_the_window_are_not_fetched() {
    let db = Arc::new(MemoryAdapter::new());
    db.insert("accounts", (1..=3).map(|id| row([("id", Value::from(id))])));

    let rules = BatchRules {
        window: Window::Delay(Duration::from_millis(10)),
        max_keys: None,
    };
    let accounts = KeyLoader::new(db.clone(), FilterPipeline::new("accounts"), "id", rules);

    let waker = Ignored.into_waker();
    let mut ctx = Context::from_waker(&waker);

    let mut one = accounts.load(1);
    let one_again = accounts.load(1);
    let two = accounts.load(2);
    let three = accounts.load(3);

    assert!(one.poll_unpin(&mut ctx).is_pending());

    // Key 1 is still wanted by `one`; nobody wants key 3 anymore.
    drop(one_again);
    drop(three);

    assert!(executor::block_on(one).unwrap().is_some());
    assert!(executor::block_on(two).unwrap().is_some());

    let executed = db.executed_on("accounts");
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].in_values("id").unwrap(), [Value::from(1), Value::from(2)]);

    // Dropped keys were never resolved, so they aren't cached either.
    assert_eq!(accounts.cached(&Value::from(3)), None);
}

#[test]
fn values_of_futures_dropped_while_running_are_released() {
    let calls = Cell::new(0);
    let rules = BatchRules {
        window: Window::Immediate,
        max_keys: None,
    };
    let controller = BatchController::new(rules, |keys: KeySet<Value>| {
        calls.set(calls.get() + 1);
        async move {
            Delay::new(Duration::from_millis(10)).await;
            shared(keys).await
        }
    });

    let waker = Ignored.into_waker();
    let mut ctx = Context::from_waker(&waker);

    let mut kept = controller.load(Value::from(1));
    let kept_twice = controller.load(Value::from(1));
    let abandoned = controller.load(Value::from(2));

    // The window is immediate, so this poll starts the batch function, which
    // then waits on its delay.
    assert!(kept.poll_unpin(&mut ctx).is_pending());

    drop(kept_twice);
    drop(abandoned);

    let value = executor::block_on(kept).unwrap();
    assert_eq!(*value, Value::from(1));
    assert_eq!(calls.get(), 1);

    // The other waiter on key 1 is gone, so the batch handed over its only
    // copy instead of cloning it.
    assert_eq!(Rc::strong_count(&value), 1);
}
