//! Protocol messages for push/pull replication.
//!
//! Messages are JSON; field names follow the established wire format so
//! peers built from older revisions keep interoperating.

use kvass_core::{Entry, ProcessId};
use serde::{Deserialize, Serialize};

/// Pull request: "send me everything from `counter` on that did not
/// originate at `process_id`".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Lowest counter of interest (inclusive)
    #[serde(rename = "Counter")]
    pub counter: u64,
    /// Requester's process id; its own updates are not echoed back
    #[serde(rename = "ProcessID")]
    pub process_id: ProcessId,
}

impl PullRequest {
    /// Create a new pull request.
    #[must_use]
    pub fn new(counter: u64, process_id: ProcessId) -> Self {
        Self {
            counter,
            process_id,
        }
    }

    /// Serialize to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, MessageError> {
        serde_json::to_vec(self).map_err(|e| MessageError::Serialize(e.to_string()))
    }

    /// Deserialize from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails.
    pub fn from_json(bytes: &[u8]) -> Result<Self, MessageError> {
        serde_json::from_slice(bytes).map_err(|e| MessageError::Deserialize(e.to_string()))
    }
}

/// A batch of entries, carried by push requests and pull responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryBatch {
    /// Entries in send order
    pub entries: Vec<Entry>,
}

impl EntryBatch {
    /// Wrap a list of entries.
    #[must_use]
    pub fn new(entries: Vec<Entry>) -> Self {
        Self { entries }
    }

    /// Highest counter in the batch, if any.
    #[must_use]
    pub fn max_counter(&self) -> Option<u64> {
        self.entries.iter().map(|e| e.counter).max()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the batch carries no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, MessageError> {
        serde_json::to_vec(self).map_err(|e| MessageError::Serialize(e.to_string()))
    }

    /// Deserialize from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails.
    pub fn from_json(bytes: &[u8]) -> Result<Self, MessageError> {
        serde_json::from_slice(bytes).map_err(|e| MessageError::Deserialize(e.to_string()))
    }
}

impl IntoIterator for EntryBatch {
    type Item = Entry;
    type IntoIter = std::vec::IntoIter<Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Errors for message serialization/deserialization.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MessageError {
    /// Serialization failed
    #[error("serialization failed: {0}")]
    Serialize(String),
    /// Deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialize(String),
}
