use std::{
    fmt::{self, Debug, Formatter},
    future::Future,
    hash::Hash,
    mem,
    num::NonZeroUsize,
    pin::Pin,
    sync::{Arc, Mutex, Weak},
    task::{Context, Poll},
};

use futures::FutureExt;
use tracing::trace;

use crate::{
    data::{KeySet, Token as KeyToken, ValueSet},
    wakerset::{Token as WakerToken, WakerSet},
    window::{Window, WindowTimer},
};

struct AccumulatingState<Key: Eq + Hash, Batcher> {
    keys: KeySet<Key>,
    batcher: Arc<Batcher>,

    // None when the batch should be dispatched on the next poll
    timer: Option<WindowTimer>,
    wakers: WakerSet,
}

impl<Key, Batcher> Debug for AccumulatingState<Key, Batcher>
where
    Key: Debug + Hash + Eq,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccumulatingState")
            .field("keys", &self.keys)
            .field("batcher", &"<closure>")
            .field("timer", &self.timer)
            .field("wakers", &self.wakers)
            .finish()
    }
}

#[derive(Debug)]
struct RunningState<Fut> {
    fut: Fut,
    wakers: WakerSet,
    dropped_tokens: Vec<KeyToken>,
}

enum State<Key: Hash + Eq, Value, Error, Fut, Batcher> {
    Accum(AccumulatingState<Key, Batcher>),
    Running(RunningState<Fut>),
    Done(Result<ValueSet<Value>, Error>),
}

/// The rules a [`BatchController`] uses to decide when a batch is
/// dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchRules {
    /// How long a batch keeps accepting keys after it opens.
    pub window: Window,

    /// If set, a batch is dispatched as soon as it holds this many distinct
    /// keys, regardless of the window. Later keys open a new batch.
    pub max_keys: Option<NonZeroUsize>,
}

/// Coordinates the batching logic, pooling individual key requests into
/// calls to a single batch function. Each call to [`load`] adds a key to
/// the currently accumulating batch (opening one if needed) and returns a
/// [`BatchFuture`] for that key.
///
/// The batch function is never spawned: it is driven by polling the
/// futures that joined the batch.
///
/// [`load`]: BatchController::load
pub struct BatchController<Key: Hash + Eq, Value, Error, Fut, Batcher> {
    rules: BatchRules,
    batcher: Arc<Batcher>,

    // TODO: find a good way to rewrite this type so that this lint passes
    #[allow(clippy::type_complexity)]
    state: Mutex<Weak<Mutex<State<Key, Value, Error, Fut, Batcher>>>>,
}

impl<Key: Hash + Eq, Value, Error, Fut, Batcher> Debug
    for BatchController<Key, Value, Error, Fut, Batcher>
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchController")
            .field("rules", &self.rules)
            .field("batcher", &"<closure>")
            .finish()
    }
}

impl<Key, Value, Error, Fut, Batcher> BatchController<Key, Value, Error, Fut, Batcher>
where
    Key: Eq + Hash,
    Value: Clone,
    Error: Clone,
    Batcher: Fn(KeySet<Key>) -> Fut,
    Fut: Future<Output = Result<ValueSet<Value>, Error>>,
{
    pub fn new(rules: BatchRules, batcher: Batcher) -> Self {
        Self {
            rules,
            batcher: Arc::new(batcher),
            state: Mutex::new(Weak::new()),
        }
    }

    pub fn rules(&self) -> &BatchRules {
        &self.rules
    }

    /// Request a key. The key is added to the accumulating batch right away,
    /// before the returned future is ever polled.
    pub fn load(&self, key: Key) -> BatchFuture<Key, Value, Error, Fut, Batcher> {
        let mut guard = self.state.lock().unwrap();

        // If there is an existing state, and it's still in the accum state,
        // add a new key to it. Note that at no point do we check the timing;
        // we assume that if the window has closed, a future poll will
        // advance the state to Running.
        //
        // If any of these conditions are not true, we instead create a brand
        // new state.
        if let Some(state_handle) = guard.upgrade() {
            // Is the current state poisoned?
            let mut state_guard_result = state_handle.lock();
            if let Ok(ref mut state_guard) = state_guard_result {
                // Are we in the accumulating state?
                if let State::Accum(ref mut state) = **state_guard {
                    let key_token = state.keys.add_key(key);
                    trace!(keys = state.keys.len(), "key joined open batch");

                    // If we've hit the key limit:
                    // - Clear the timer
                    // - Wake the driver so it dispatches
                    // - Detach the shared state from the controller
                    match self.rules.max_keys {
                        Some(max_keys) if state.keys.len() >= max_keys.get() => {
                            trace!(keys = state.keys.len(), "key limit reached");
                            state.timer = None;
                            state.wakers.wake_driver();
                            drop(state_guard_result);
                            *guard = Weak::new();
                        }
                        _ => drop(state_guard_result),
                    }

                    return BatchFuture {
                        key_token,
                        state: Some(state_handle),
                        waker_token: None,
                    };
                }
            }
        }

        let mut keys = KeySet::new();
        let key_token = keys.add_key(key);

        // A batch that is already full is dispatched on its first poll and
        // is never shared with later keys.
        let full = matches!(self.rules.max_keys, Some(max_keys) if max_keys.get() <= 1);

        let state = Arc::new(Mutex::new(State::Accum(AccumulatingState {
            keys,
            batcher: self.batcher.clone(),
            timer: if full { None } else { self.rules.window.open() },
            wakers: WakerSet::default(),
        })));

        if !full {
            *guard = Arc::downgrade(&state);
        }

        trace!(window = ?self.rules.window, "opened batch");

        BatchFuture {
            key_token,
            waker_token: None,
            state: Some(state),
        }
    }
}

/// A request for the value of a single key, sharing its batch with every
/// other key requested in the same window. Resolves to the value for its
/// key, or to a clone of the batch's error.
pub struct BatchFuture<Key: Hash + Eq, Value, Error, Fut, Batcher> {
    key_token: KeyToken,
    waker_token: Option<WakerToken>,

    // TODO: find a good way to rewrite this type so that this lint passes
    #[allow(clippy::type_complexity)]
    state: Option<Arc<Mutex<State<Key, Value, Error, Fut, Batcher>>>>,
}

impl<Key: Hash + Eq, Value, Error, Fut, Batcher> Debug
    for BatchFuture<Key, Value, Error, Fut, Batcher>
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchFuture")
            .field("key_token", &self.key_token)
            .field("waker_token", &self.waker_token)
            .field("completed", &self.state.is_none())
            .finish()
    }
}

impl<Key, Value, Error, Fut, Batcher> Future for BatchFuture<Key, Value, Error, Fut, Batcher>
where
    Key: Eq + Hash,
    Value: Clone,
    Error: Clone,
    Batcher: Fn(KeySet<Key>) -> Fut,
    Fut: Future<Output = Result<ValueSet<Value>, Error>>,
{
    type Output = Result<Value, Error>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let unpinned = Pin::into_inner(self);

        // Note about this mutex: it is safe to use in an async context,
        // because the lock is released when poll returns.
        let mut guard = unpinned
            .state
            .as_mut()
            .expect("Can't re-poll a completed BatchFuture")
            .lock()
            // This is where panic propogation happens. If a *different* call to
            // poll panicked while holding the lock, the mutex is poisoned and
            // this poll panics too.
            .unwrap();

        if let State::Accum(ref mut state) = *guard {
            if let Some(ref mut timer) = state.timer {
                // Only the driver watches the window. Everyone else waits to
                // be woken with the result; this is what lets every future
                // polled in the current pass join before the window closes.
                let drives = state.wakers.is_driver(unpinned.waker_token)
                    || !state.wakers.has_driver();

                if !drives {
                    unpinned.waker_token =
                        Some(state.wakers.register(unpinned.waker_token, ctx.waker()));
                    return Poll::Pending;
                }

                unpinned.waker_token = Some(state.wakers.drive(unpinned.waker_token, ctx.waker()));
                if timer.poll_unpin(ctx).is_pending() {
                    return Poll::Pending;
                }
            }

            // Window is closed. Transition to the Running state.
            let wakers = mem::take(&mut state.wakers);
            let keyset = state.keys.take();
            trace!(keys = keyset.len(), "dispatching batch");

            // Safety note: at this point, the future has not yet been pinned
            // and is safe to move around.
            let fut = (state.batcher)(keyset);

            *guard = State::Running(RunningState {
                fut,
                wakers,
                dropped_tokens: Vec::new(),
            });
        }

        if let State::Running(ref mut state) = *guard {
            // Safety: the future lives inside the shared Arc and is never
            // moved out of it. It is destructed in place when the state
            // transitions to Done.
            let fut = unsafe { Pin::new_unchecked(&mut state.fut) };

            let mut result = match fut.poll(ctx) {
                Poll::Pending => {
                    // This is now the driving waker for the batch future.
                    unpinned.waker_token =
                        Some(state.wakers.drive(unpinned.waker_token, ctx.waker()));
                    return Poll::Pending;
                }
                Poll::Ready(result) => result,
            };

            // Some futures may have lost interest while we were in the Running
            // state. Remove those tokens from the ValueSet.
            if let Ok(values) = &mut result {
                state
                    .dropped_tokens
                    .iter()
                    .for_each(|&token| values.discard(token));
            }

            // Now that we have a result, signal all the waiting futures to
            // wake up so they can get their results.
            match unpinned.waker_token.take() {
                Some(token) => state.wakers.discard_wake_all(token),
                None => state.wakers.wake_all(),
            }

            *guard = State::Done(result);
        }

        // Take care to prevent mutex poisoning in these cases by explicitly
        // dropping the guard
        if let State::Done(Ok(ref mut values)) = *guard {
            match values.take(unpinned.key_token) {
                None => {
                    drop(guard);
                    panic!("Unknown logic error: no value in ValueSet associated with Token");
                }
                Some(value) => {
                    drop(guard);
                    unpinned.state = None;
                    return Poll::Ready(Ok(value));
                }
            }
        }

        if let State::Done(Err(ref err)) = *guard {
            let err = err.clone();
            drop(guard);
            unpinned.state = None;
            return Poll::Ready(Err(err));
        }

        unreachable!("BatchFuture contained invalid state");
    }
}

impl<Key: Hash + Eq, Value, Error, Fut, Batcher> Drop
    for BatchFuture<Key, Value, Error, Fut, Batcher>
{
    fn drop(&mut self) {
        // The shared batch is only ever driven by a single task, so if this
        // future was the driver, another one has to be woken to take over.
        // That logic is handled by the WakerSet.
        //
        // If the mutex is poisoned we skip cleanup entirely; with
        // panic=abort that can't happen outside of tests.
        if let Some(state) = self.state.as_mut() {
            if let Ok(mut guard) = state.lock() {
                match *guard {
                    State::Accum(ref mut state) => {
                        if let Some(waker_token) = self.waker_token.take() {
                            state.wakers.discard_and_wake(waker_token);
                        }

                        state.keys.discard_token(self.key_token);
                    }
                    State::Running(ref mut state) => {
                        if let Some(waker_token) = self.waker_token.take() {
                            state.wakers.discard_and_wake(waker_token);
                        }

                        // The KeySet now belongs to the running batch. Remember
                        // our token so our value can be discarded once the
                        // ValueSet is ready.
                        state.dropped_tokens.push(self.key_token);
                    }
                    State::Done(Ok(ref mut values)) => {
                        values.discard(self.key_token);
                    }
                    State::Done(Err(..)) => {}
                }
            }
        }
    }
}
