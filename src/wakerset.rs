use std::{collections::HashMap, default::Default, num::NonZeroUsize, task::Waker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Token(NonZeroUsize);

/// Data structure for managing a collection of wakers that are all interested
/// in a single shared computation. Only a single task needs to actually do
/// the work of driving the computation; every other task is only woken once
/// the result is available.
///
/// Wakers are upserted with an optional token: the first call returns a new
/// token, which the future keeps and passes back on every later poll.
///
/// The WakerSet tracks the "driving waker", which belongs to the task that
/// polls the batch window and the batch future. While a batch accumulates,
/// the first future to poll becomes the driver and keeps that role; other
/// futures only register. If the driving waker is discarded from the set,
/// another is selected and woken, so the shared computation always has a
/// path forward as long as futures discard their tokens when dropped.
#[derive(Debug)]
pub(crate) struct WakerSet {
    wakers: HashMap<Token, Waker>,
    driving_waker: Option<Token>,

    // Tokens are an ever-increasing integer. We assume that WakerSets are
    // relatively short-lived and that there's no chance of running out of
    // these.
    next_token: NonZeroUsize,
}

impl Default for WakerSet {
    fn default() -> Self {
        Self {
            wakers: HashMap::with_capacity(1),
            next_token: NonZeroUsize::MIN,
            driving_waker: None,
        }
    }
}

impl WakerSet {
    fn upsert(&mut self, token: Option<Token>, waker: &Waker) -> Token {
        match token {
            Some(token) => {
                self.wakers
                    .get_mut(&token)
                    .expect("Attempted to add Waker to WakerSet with an invalid token")
                    .clone_from(waker);
                token
            }
            None => {
                let token = Token(self.next_token);
                self.next_token = self
                    .next_token
                    .checked_add(1)
                    .expect("Overflow when creating token");
                self.wakers.insert(token, waker.clone());
                token
            }
        }
    }

    /// Store a waker without claiming the driver role, unless nobody holds
    /// it yet.
    #[must_use]
    pub(crate) fn register(&mut self, token: Option<Token>, waker: &Waker) -> Token {
        let token = self.upsert(token, waker);
        if self.driving_waker.is_none() {
            self.driving_waker = Some(token);
        }
        token
    }

    /// Store a waker and make it the driving waker, on the assumption that it
    /// is about to be used to poll the shared computation.
    #[must_use]
    pub(crate) fn drive(&mut self, token: Option<Token>, waker: &Waker) -> Token {
        let token = self.upsert(token, waker);
        self.driving_waker = Some(token);
        token
    }

    pub(crate) fn has_driver(&self) -> bool {
        self.driving_waker.is_some()
    }

    pub(crate) fn is_driver(&self, token: Option<Token>) -> bool {
        token.is_some() && self.driving_waker == token
    }

    /// Wake the current driver, if any, so that it re-polls the shared state.
    pub(crate) fn wake_driver(&self) {
        if let Some(waker) = self
            .driving_waker
            .as_ref()
            .and_then(|token| self.wakers.get(token))
        {
            waker.wake_by_ref();
        }
    }

    /// Discard a waker from this set. If that waker was the current driving
    /// waker (or there is currently no driving waker), an arbitrary waker is
    /// made the current driving waker and awoken.
    ///
    /// We create a new driving waker immediately because if a series of drops
    /// happen at the same time we need to ensure that at least one non-dropped
    /// waker is awoken.
    pub(crate) fn discard_and_wake(&mut self, token: Token) {
        self.wakers.remove(&token);
        if self.driving_waker == Some(token) || self.driving_waker.is_none() {
            match self.wakers.iter().next() {
                None => self.driving_waker = None,
                Some((token, waker)) => {
                    self.driving_waker = Some(*token);
                    waker.wake_by_ref();
                }
            }
        }
    }

    /// Discard the caller's own waker, then wake everyone else.
    pub(crate) fn discard_wake_all(&mut self, token: Token) {
        self.wakers.remove(&token);
        self.wake_all();
    }

    pub(crate) fn wake_all(&mut self) {
        self.driving_waker = None;
        self.wakers.drain().for_each(|(_token, waker)| waker.wake());
    }
}
