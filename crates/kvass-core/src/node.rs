//! Per-replica node state.
//!
//! One `NodeState` exists per store. It is persisted in the same transaction
//! as every entry write, so the counter on disk never runs ahead of or falls
//! behind the entries it was assigned to.

use crate::entry::{ProcessId, RESERVED_PROCESS_ID};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use url::Url;

/// Length in bytes of the raw sync encryption key.
pub const ENCRYPTION_KEY_LEN: usize = 32;

/// Largest counter a store may assign. Stores persist counters as signed
/// 64-bit integers.
pub const MAX_COUNTER: u64 = i64::MAX.unsigned_abs();

/// Clock, identity, key and remote bookmark of one replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    /// Highest counter ever assigned on this node
    pub counter: u64,
    /// Stable node identity; never `RESERVED_PROCESS_ID`
    pub process_id: ProcessId,
    /// Hex-encoded 32-byte sync key
    pub encryption_key: String,
    /// Highest remote counter already observed from the configured remote
    #[serde(default)]
    pub remote_counter: u64,
    /// Base URL of the sync peer
    #[serde(default)]
    pub remote_address: Option<Url>,
    /// Storage schema revision the store was migrated to
    #[serde(default)]
    pub schema_version: u32,
}

impl NodeState {
    /// Create state for a brand-new node: random process id, random key.
    #[must_use]
    pub fn generate() -> Self {
        let process_id = rand::thread_rng().gen_range(RESERVED_PROCESS_ID + 1..=ProcessId::MAX);

        let mut key = [0u8; ENCRYPTION_KEY_LEN];
        OsRng.fill_bytes(&mut key);

        Self {
            counter: 0,
            process_id,
            encryption_key: hex::encode(key),
            remote_counter: 0,
            remote_address: None,
            schema_version: 0,
        }
    }

    /// Counter for the next mutation, given the counter of the entry it stores.
    ///
    /// Strictly greater than both `observed` and everything assigned so far.
    ///
    /// # Errors
    ///
    /// Returns `ClockError::Exhausted` if the result would pass [`MAX_COUNTER`].
    pub fn next_counter(&self, observed: u64) -> Result<u64, ClockError> {
        self.counter
            .max(observed)
            .checked_add(1)
            .filter(|next| *next <= MAX_COUNTER)
            .ok_or(ClockError::Exhausted(observed))
    }

    /// Record that the remote's history up to `counter` has been seen.
    pub fn observe_remote(&mut self, counter: u64) {
        self.remote_counter = self.remote_counter.max(counter);
    }

    /// Serialize to the persisted blob.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<String, StateError> {
        serde_json::to_string_pretty(self).map_err(|e| StateError::Encode(e.to_string()))
    }

    /// Deserialize from the persisted blob.
    ///
    /// # Errors
    ///
    /// Returns error if the blob is not a valid state document.
    pub fn from_json(blob: &str) -> Result<Self, StateError> {
        serde_json::from_str(blob).map_err(|e| StateError::Decode(e.to_string()))
    }
}

/// Errors from advancing the node clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    /// No counter above the observed one fits in storage
    #[error("counter {0} leaves no room for a successor")]
    Exhausted(u64),
}

/// Errors that can occur encoding or decoding node state.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StateError {
    /// Serialization failed
    #[error("state encode error: {0}")]
    Encode(String),
    /// Deserialization failed
    #[error("state decode error: {0}")]
    Decode(String),
}
