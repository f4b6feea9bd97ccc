//! In-memory store with the same semantics as the `SQLite` one.

use crate::store::{ensure_key, Store, StoreError};
use kvass_core::{apply, Entry, NodeState, ProcessId};
use parking_lot::Mutex;
use std::collections::BTreeMap;

#[derive(Debug)]
struct Inner {
    state: NodeState,
    entries: BTreeMap<String, Entry>,
}

/// Volatile replica store, for tests and throwaway peers.
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store with a freshly generated node state.
    #[must_use]
    pub fn new() -> Self {
        Self::with_state(NodeState::generate())
    }

    /// Create an empty store with the given node state.
    #[must_use]
    pub fn with_state(state: NodeState) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state,
                entries: BTreeMap::new(),
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn mutate(&self, incoming: Entry) -> Result<Entry, StoreError> {
        ensure_key(&incoming.key)?;

        let mut inner = self.inner.lock();
        let current = inner.entries.get(&incoming.key).cloned();
        let stored = apply(&mut inner.state, current, incoming)?;
        inner.entries.insert(stored.key.clone(), stored.clone());

        Ok(stored)
    }

    fn get(&self, key: &str) -> Result<Option<Entry>, StoreError> {
        Ok(self.inner.lock().entries.get(key).cloned())
    }

    fn keys_after(&self, after: Option<&str>, limit: usize) -> Result<Vec<String>, StoreError> {
        use std::ops::Bound;

        let inner = self.inner.lock();
        let lower = match after {
            Some(after) => Bound::Excluded(after),
            None => Bound::Unbounded,
        };

        Ok(inner
            .entries
            .range::<str, _>((lower, Bound::Unbounded))
            .filter(|(_, entry)| !entry.is_tombstone())
            .take(limit)
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn updates_since(&self, counter: u64, exclude: ProcessId) -> Result<Vec<Entry>, StoreError> {
        let inner = self.inner.lock();
        let mut updates: Vec<Entry> = inner
            .entries
            .values()
            .filter(|e| e.counter >= counter && e.process_id != exclude)
            .cloned()
            .collect();
        updates.sort_by_key(|e| e.counter);
        Ok(updates)
    }

    fn pending_updates(&self) -> Result<Vec<Entry>, StoreError> {
        let inner = self.inner.lock();
        let mut pending: Vec<Entry> = inner
            .entries
            .values()
            .filter(|e| e.needs_push)
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.counter);
        Ok(pending)
    }

    fn mark_pushed(&self, delivered: &[Entry]) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock();
        let mut cleared = 0;
        for sent in delivered {
            if let Some(entry) = inner.entries.get_mut(&sent.key) {
                if entry.counter == sent.counter {
                    entry.needs_push = false;
                    cleared += 1;
                }
            }
        }
        Ok(cleared)
    }

    fn entry_by_token(&self, token: &str) -> Result<Option<Entry>, StoreError> {
        if token.is_empty() {
            return Ok(None);
        }
        let inner = self.inner.lock();
        Ok(inner
            .entries
            .values()
            .find(|e| e.url_token == token)
            .cloned())
    }

    fn state(&self) -> NodeState {
        self.inner.lock().state.clone()
    }

    fn update_state<F>(&self, change: F) -> Result<NodeState, StoreError>
    where
        F: FnOnce(&mut NodeState),
    {
        let mut inner = self.inner.lock();
        change(&mut inner.state);
        Ok(inner.state.clone())
    }
}
