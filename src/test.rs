#![cfg(test)]

use crate::{row, BatchController, BatchRules, KeySet, Row, ValueSet, Value, Window};
use std::cell::RefCell;
use std::num::NonZeroUsize;
use std::sync::Arc;

use futures::{
    executor,
    future::{self, Ready},
};

type Batch = Ready<Result<ValueSet<Option<Arc<Row>>>, String>>;

/// A batcher that answers every key with a one-column row, and remembers the
/// keys of each batch it was handed. Keys listed in `missing` get no row.
fn recording<'a>(
    batches: &'a RefCell<Vec<Vec<Value>>>,
    missing: &'a [Value],
) -> impl Fn(KeySet<Value>) -> Batch + 'a {
    move |keys| {
        batches.borrow_mut().push(keys.keys().cloned().collect());
        future::ready(Ok(keys.into_values(|key| {
            if missing.contains(key) {
                None
            } else {
                Some(Arc::new(row([("id", key.clone())])))
            }
        })))
    }
}

fn rules(window: Window, max_keys: usize) -> BatchRules {
    BatchRules {
        window,
        max_keys: NonZeroUsize::new(max_keys),
    }
}

#[test]
fn keys_requested_before_polling_share_a_batch() {
    let batches = RefCell::new(Vec::new());
    let missing = [Value::from(5)];
    let controller = BatchController::new(rules(Window::Immediate, 0), recording(&batches, &missing));

    let seven = controller.load(Value::from(7));
    let five = controller.load(Value::from(5));

    let seven = executor::block_on(seven).unwrap().unwrap();
    assert_eq!(seven["id"], Value::from(7));
    assert_eq!(executor::block_on(five).unwrap(), None);

    assert_eq!(*batches.borrow(), [vec![Value::from(7), Value::from(5)]]);
}

#[test]
fn single_key_batches() {
    let batches = RefCell::new(Vec::new());
    let controller = BatchController::new(rules(Window::Tick, 1), recording(&batches, &[]));

    let results = executor::block_on(future::join_all(
        (1..=3).map(|id| controller.load(Value::from(id))),
    ));

    assert!(results.iter().all(|result| matches!(result, Ok(Some(_)))));
    assert_eq!(batches.borrow().len(), 3);
}

/// Keys requested by futures that are first polled in the same executor
/// pass share a batch, even though each key is requested lazily.
#[test]
fn tick_window_joins_the_current_pass() {
    let batches = RefCell::new(Vec::new());
    let controller = BatchController::new(BatchRules::default(), recording(&batches, &[]));
    let controller = &controller;

    let lazy = (1..=4).map(|id| async move { controller.load(Value::from(id)).await });
    let results = executor::block_on(future::join_all(lazy));

    assert_eq!(results.len(), 4);
    assert_eq!(batches.borrow().len(), 1);
    assert_eq!(batches.borrow()[0].len(), 4);

    // Once that batch is dispatched, a new one is opened.
    executor::block_on(controller.load(Value::from(9))).unwrap();
    assert_eq!(batches.borrow()[1], [Value::from(9)]);
}

#[test]
fn abandoned_batches_are_never_dispatched() {
    let batches = RefCell::new(Vec::new());
    let controller = BatchController::new(BatchRules::default(), recording(&batches, &[]));

    drop(controller.load(Value::from(1)));
    drop(controller.load(Value::from(2)));

    executor::block_on(controller.load(Value::from(3))).unwrap();
    assert_eq!(*batches.borrow(), [vec![Value::from(3)]]);
}

#[test]
fn failed_batch_reaches_every_waiter() {
    let calls = RefCell::new(0);
    let controller = BatchController::new(BatchRules::default(), |keys: KeySet<Value>| {
        *calls.borrow_mut() += 1;
        future::ready(match *calls.borrow() {
            1 => Err(format!("{} keys lost", keys.len())),
            _ => Ok(keys.into_values(|key| key.clone())),
        })
    });

    let results = executor::block_on(future::join(
        controller.load(Value::from(1)),
        controller.load(Value::from("one")),
    ));
    assert_eq!(results, (Err("2 keys lost".to_owned()), Err("2 keys lost".to_owned())));

    // The failed batch is gone; the next key opens a fresh one.
    assert_eq!(
        executor::block_on(controller.load(Value::from(1))),
        Ok(Value::from(1))
    );
    assert_eq!(*calls.borrow(), 2);
}
