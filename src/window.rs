//! How long a batch keeps accepting keys before it is dispatched.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use futures::FutureExt;
use futures_timer::Delay;

/// The batch window. A window opens when the first key of a batch is
/// requested and closes when the batch's driving future observes that it
/// has elapsed; every key requested before then joins the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Window {
    /// Close on the first poll of any future in the batch. Only keys that
    /// were requested before anything is awaited are batched together.
    Immediate,

    /// Yield to the executor once before closing. Every future polled during
    /// the current pass of the executor (all the branches of a `join_all`,
    /// for instance) gets to add its key first.
    #[default]
    Tick,

    /// Wait for a fixed duration, using a runtime-agnostic timer.
    Delay(Duration),
}

impl Window {
    /// A fresh timer for a new batch, or `None` if the batch can be
    /// dispatched on its first poll.
    pub(crate) fn open(self) -> Option<WindowTimer> {
        match self {
            Window::Immediate => None,
            Window::Tick => Some(WindowTimer::Tick { yielded: false }),
            Window::Delay(duration) => Some(WindowTimer::Delay(Delay::new(duration))),
        }
    }
}

#[derive(Debug)]
pub(crate) enum WindowTimer {
    Tick { yielded: bool },
    Delay(Delay),
}

impl Future for WindowTimer {
    type Output = ();

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<()> {
        match self.get_mut() {
            WindowTimer::Tick { yielded: true } => Poll::Ready(()),
            WindowTimer::Tick { yielded } => {
                *yielded = true;
                ctx.waker().wake_by_ref();
                Poll::Pending
            }
            WindowTimer::Delay(delay) => delay.poll_unpin(ctx),
        }
    }
}
