//! The store capability shared by every replica backend.

use kvass_core::{ClockError, Entry, NodeState, ProcessId, StateError};
use std::collections::VecDeque;

/// Default number of keys fetched per page by [`Keys`].
pub const DEFAULT_KEYS_PAGE: usize = 256;

/// Storage operations a replica needs.
///
/// Implementations serialize all mutations: [`Store::mutate`] and
/// [`Store::update_state`] never interleave with each other on one store.
pub trait Store: Send + Sync {
    /// Merge one entry, local or remote, into the store.
    ///
    /// Atomically: read the current entry for the key, keep the greater of
    /// the two, assign it `max(winner.counter, state.counter) + 1`, and
    /// persist both the entry and the advanced node state. Returns the entry
    /// as stored.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidKey` for an empty key,
    /// `StoreError::Clock` if the entry's counter leaves no successor, or a
    /// storage error if the transaction cannot commit. Prior state is left
    /// intact.
    fn mutate(&self, entry: Entry) -> Result<Entry, StoreError>;

    /// Current entry for `key`, tombstones included.
    ///
    /// # Errors
    ///
    /// Returns error if the lookup fails.
    fn get(&self, key: &str) -> Result<Option<Entry>, StoreError>;

    /// Up to `limit` live keys strictly after `after`, in lexical order.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn keys_after(&self, after: Option<&str>, limit: usize) -> Result<Vec<String>, StoreError>;

    /// Entries with `counter >= counter` that did not originate at `exclude`.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn updates_since(&self, counter: u64, exclude: ProcessId) -> Result<Vec<Entry>, StoreError>;

    /// Entries not yet delivered to the configured remote.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn pending_updates(&self) -> Result<Vec<Entry>, StoreError>;

    /// Clear the freshness marker of delivered entries.
    ///
    /// Only rows still holding the delivered counter are cleared; a newer
    /// write that raced the delivery stays pending. Returns the number of
    /// rows cleared.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    fn mark_pushed(&self, delivered: &[Entry]) -> Result<usize, StoreError>;

    /// Entry carrying the given share token.
    ///
    /// # Errors
    ///
    /// Returns error if the lookup fails.
    fn entry_by_token(&self, token: &str) -> Result<Option<Entry>, StoreError>;

    /// Snapshot of the node state.
    fn state(&self) -> NodeState;

    /// Apply a configuration change to the node state and commit it.
    ///
    /// Returns the committed state.
    ///
    /// # Errors
    ///
    /// Returns error if the state cannot be persisted; the in-memory state
    /// is then left unchanged.
    fn update_state<F>(&self, change: F) -> Result<NodeState, StoreError>
    where
        F: FnOnce(&mut NodeState);

    /// Raise the remote high-water mark to at least `counter`.
    ///
    /// # Errors
    ///
    /// Returns error if the state cannot be persisted.
    fn raise_remote_counter(&self, counter: u64) -> Result<(), StoreError> {
        if counter <= self.state().remote_counter {
            return Ok(());
        }
        self.update_state(|state| state.observe_remote(counter))?;
        Ok(())
    }

    /// Write `value` under `key` as a local update.
    ///
    /// The write always replaces what the store holds for `key`, whatever
    /// the wall clocks of other nodes say: it is offered with a counter above
    /// every counter assigned so far. A key keeps the share token it was
    /// first created with.
    ///
    /// # Errors
    ///
    /// See [`Store::mutate`].
    fn set(&self, key: &str, value: Vec<u8>) -> Result<Entry, StoreError> {
        ensure_key(key)?;

        let state = self.state();
        let provisional = state.counter.saturating_add(1);
        let mut entry = Entry::local(key, value, state.process_id, provisional);
        if let Some(current) = self.get(key)? {
            if !current.url_token.is_empty() {
                entry.url_token = current.url_token;
            }
        }
        self.mutate(entry)
    }

    /// Delete `key` by writing a tombstone.
    ///
    /// # Errors
    ///
    /// See [`Store::mutate`].
    fn delete(&self, key: &str) -> Result<Entry, StoreError> {
        self.set(key, Vec::new())
    }

    /// Lazily enumerate live keys in lexical order.
    fn keys(&self) -> Keys<'_, Self>
    where
        Self: Sized,
    {
        Keys::new(self)
    }
}

/// Paging iterator over the live keys of a store.
///
/// Fetches one page at a time and resumes after the last key it yielded, so
/// writes between pages never cause a key to be yielded twice.
pub struct Keys<'a, S> {
    store: &'a S,
    page: VecDeque<String>,
    last: Option<String>,
    page_size: usize,
    exhausted: bool,
}

impl<'a, S: Store> Keys<'a, S> {
    fn new(store: &'a S) -> Self {
        Self {
            store,
            page: VecDeque::new(),
            last: None,
            page_size: DEFAULT_KEYS_PAGE,
            exhausted: false,
        }
    }

    /// Set the number of keys fetched per round trip.
    #[must_use]
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Start again from the first key.
    pub fn restart(&mut self) {
        self.page.clear();
        self.last = None;
        self.exhausted = false;
    }
}

impl<S: Store> Iterator for Keys<'_, S> {
    type Item = Result<String, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() {
            if self.exhausted {
                return None;
            }
            match self.store.keys_after(self.last.as_deref(), self.page_size) {
                Ok(page) => {
                    self.exhausted = page.len() < self.page_size;
                    self.page = page.into();
                }
                Err(err) => {
                    self.exhausted = true;
                    return Some(Err(err));
                }
            }
        }

        let key = self.page.pop_front()?;
        self.last = Some(key.clone());
        Some(Ok(key))
    }
}

pub(crate) fn ensure_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey("key must not be empty".to_string()));
    }
    Ok(())
}

/// Errors from replica storage.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying database failure
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Node state blob could not be read or written
    #[error(transparent)]
    State(#[from] StateError),
    /// Key rejected before touching storage
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// Entry counter out of the storable range
    #[error(transparent)]
    Clock(#[from] ClockError),
}
