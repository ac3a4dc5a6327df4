//! Data structures for passing keys into a batch and values back out of it.

use std::collections::HashMap;
use std::convert::Infallible;
use std::hash::Hash;
use std::mem;

/// Handle held by each waiting future. It is the index of its key in the
/// owning [`KeySet`], which is also the index of its value in the resulting
/// [`ValueSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Token(usize);

/// The set of keys gathered during one batch window. Use the `keys` method to
/// get the keys, all of which will be unique, so that you can execute your
/// request. Then, use `into_values` to pair your response data with those
/// keys; the resulting [`ValueSet`] is handed back to the controller.
#[derive(Debug)]
pub struct KeySet<Key: Eq + Hash> {
    tokens: HashMap<Key, Token>,

    // Indexed by token: how many futures are currently waiting on the key.
    // Tokens are never reused within a KeySet, so a key whose waiters have
    // all been dropped keeps its slot with a count of zero.
    waiters: Vec<usize>,

    // Number of keys with at least one waiter.
    live: usize,
}

impl<Key: Eq + Hash> KeySet<Key> {
    pub(crate) fn new() -> Self {
        Self {
            tokens: HashMap::new(),
            waiters: Vec::new(),
            live: 0,
        }
    }

    /// Add a key to this KeySet, and return the token associated with that
    /// key. Adding a key that is already present returns the existing token
    /// and bumps its waiter count.
    pub(crate) fn add_key(&mut self, key: Key) -> Token {
        let next = Token(self.waiters.len());
        let token = *self.tokens.entry(key).or_insert(next);
        if token == next {
            self.waiters.push(0);
        }

        let count = &mut self.waiters[token.0];
        if *count == 0 {
            self.live += 1;
        }
        *count += 1;

        token
    }

    /// Remove one waiter from a key. The key stays in the set as long as at
    /// least one waiter remains.
    pub(crate) fn discard_token(&mut self, token: Token) {
        match self.waiters.get_mut(token.0) {
            Some(count) if *count > 0 => {
                *count -= 1;
                if *count == 0 {
                    self.live -= 1;
                }
            }
            _ => panic!("Attempted to remove nonexistent token from KeySet"),
        }
    }

    /// Check if there are any keys in this keyset
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Get the number of unique keys in this keyset.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Get an iterator over all the keys in this keyset. These are guaranteed
    /// to be unique, and are yielded in the order they were first requested.
    pub fn keys(&self) -> impl Iterator<Item = &Key> + Clone {
        let mut live: Vec<(Token, &Key)> = self
            .tokens
            .iter()
            .filter(|(_key, token)| self.waiters[token.0] > 0)
            .map(|(key, token)| (*token, key))
            .collect();

        live.sort_unstable_by_key(|(token, _key)| token.0);
        live.into_iter().map(|(_token, key)| key)
    }

    /// After you've completed your request, use this method to pair each key
    /// with its value. This is the only way to create a ValueSet. `get_value`
    /// is called once per unique key, in request order.
    pub fn into_values<Value>(self, mut get_value: impl FnMut(&Key) -> Value) -> ValueSet<Value> {
        match self.try_into_values(move |key| Ok::<_, Infallible>(get_value(key))) {
            Ok(values) => values,
            Err(never) => match never {},
        }
    }

    /// Fallible version of into_values. Same as into_values, but will return
    /// an error the first time `get_value` returns an error.
    pub fn try_into_values<Value, Error>(
        self,
        mut get_value: impl FnMut(&Key) -> Result<Value, Error>,
    ) -> Result<ValueSet<Value>, Error> {
        let KeySet {
            tokens, waiters, ..
        } = self;

        let mut live: Vec<(Token, Key)> = tokens
            .into_iter()
            .filter(|(_key, token)| waiters[token.0] > 0)
            .map(|(key, token)| (token, key))
            .collect();
        live.sort_unstable_by_key(|(token, _key)| token.0);

        let mut slots: Vec<Option<ValueSetEntry<Value>>> = waiters.iter().map(|_| None).collect();
        for (token, key) in live {
            slots[token.0] = Some(ValueSetEntry {
                value: get_value(&key)?,
                remaining: waiters[token.0],
            });
        }

        Ok(ValueSet { slots })
    }

    /// Take the keyset out of this particular &mut self instance, replacing it
    /// with an empty set. Used when the window closes.
    pub(crate) fn take(&mut self) -> Self {
        mem::replace(self, Self::new())
    }
}

#[derive(Debug)]
struct ValueSetEntry<Value> {
    value: Value,
    // Waiters that have not yet taken or discarded the value.
    remaining: usize,
}

/// The result of a batch operation, one value per requested key. It is
/// created with [`KeySet::into_values`], and is used by the controller to
/// distribute the values to the waiting futures.
#[derive(Debug)]
pub struct ValueSet<Value> {
    slots: Vec<Option<ValueSetEntry<Value>>>,
}

impl<Value> ValueSet<Value> {
    /// Release one waiter's claim on a value without taking it. No-op if the
    /// token has no value.
    pub(crate) fn discard(&mut self, token: Token) {
        if let Some(slot) = self.slots.get_mut(token.0) {
            if let Some(entry) = slot {
                entry.remaining -= 1;
                if entry.remaining == 0 {
                    *slot = None;
                }
            }
        }
    }
}

impl<Value: Clone> ValueSet<Value> {
    /// Take the value for a token. Every waiter but the last receives a
    /// clone; the last one receives the value itself.
    pub(crate) fn take(&mut self, token: Token) -> Option<Value> {
        let slot = self.slots.get_mut(token.0)?;
        let entry = slot.as_mut()?;
        entry.remaining -= 1;

        if entry.remaining == 0 {
            slot.take().map(|entry| entry.value)
        } else {
            Some(entry.value.clone())
        }
    }
}
