//! The replicated entry and its total order.
//!
//! Entries sharing a key are ordered by:
//! 1. Higher `counter` (Lamport counter, authoritative)
//! 2. Higher `timestamp_micros` (wall clock, tie-break only)
//! 3. Lower `process_id`
//!
//! Any remaining tie is broken on the value bytes, share token, freshness
//! marker and key, so two entries compare `Equal` only when identical.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::atomic::{self, AtomicI64};

/// Identifier chosen randomly once per node.
pub type ProcessId = u32;

/// Process id that no node ever uses.
///
/// Passing it as the excluded origin of an update query excludes nothing.
pub const RESERVED_PROCESS_ID: ProcessId = 0;

const SHARE_TOKEN_LEN: usize = 16;

/// One key's current winning state on a replica.
///
/// An empty `value` is a tombstone: the key was deleted, and the deletion
/// itself takes part in ordering like any other write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Entry {
    /// Key, unique per store
    pub key: String,
    /// Opaque payload; empty means deleted
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
    /// Random token used to build share links
    #[serde(default)]
    pub url_token: String,
    /// Wall-clock microseconds at creation (advisory)
    #[serde(rename = "TimestampUnixMicro")]
    pub timestamp_micros: i64,
    /// Originating node
    #[serde(rename = "ProcessID")]
    pub process_id: ProcessId,
    /// Lamport counter assigned by the storing node
    pub counter: u64,
    /// Whether the entry still has to be delivered to the configured remote
    #[serde(skip)]
    pub needs_push: bool,
}

impl Entry {
    /// Create a fresh local write.
    ///
    /// `counter` is provisional; the store assigns the real one when the
    /// entry is applied.
    #[must_use]
    pub fn local(
        key: impl Into<String>,
        value: Vec<u8>,
        process_id: ProcessId,
        counter: u64,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            url_token: share_token(),
            timestamp_micros: now_micros(),
            process_id,
            counter,
            needs_push: true,
        }
    }

    /// Create a local tombstone for `key`.
    #[must_use]
    pub fn tombstone(key: impl Into<String>, process_id: ProcessId, counter: u64) -> Self {
        Self::local(key, Vec::new(), process_id, counter)
    }

    /// Whether this entry records a deletion.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.value.is_empty()
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Counter is the causal-order token
        match self.counter.cmp(&other.counter) {
            Ordering::Equal => {}
            ord => return ord,
        }
        // Then wall clock
        match self.timestamp_micros.cmp(&other.timestamp_micros) {
            Ordering::Equal => {}
            ord => return ord,
        }
        // Lower process id wins
        match other.process_id.cmp(&self.process_id) {
            Ordering::Equal => {}
            ord => return ord,
        }
        self.value
            .cmp(&other.value)
            .then_with(|| self.url_token.cmp(&other.url_token))
            .then(self.needs_push.cmp(&other.needs_push))
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Join two entries for the same key, keeping the greater one.
///
/// Commutative, associative and idempotent.
#[must_use]
pub fn merge(a: Entry, b: Entry) -> Entry {
    if a >= b {
        a
    } else {
        b
    }
}

static LAST_MICROS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Wall-clock microseconds since the UNIX epoch, strictly increasing within
/// this process.
///
/// Consecutive local writes to one key carry the same provisional counter,
/// so their timestamps must not collide.
#[must_use]
pub fn now_micros() -> i64 {
    let wall = chrono::Utc::now().timestamp_micros();
    let mut last = LAST_MICROS.load(atomic::Ordering::Relaxed);
    loop {
        let next = wall.max(last.saturating_add(1));
        match LAST_MICROS.compare_exchange_weak(
            last,
            next,
            atomic::Ordering::Relaxed,
            atomic::Ordering::Relaxed,
        ) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

fn share_token() -> String {
    let mut bytes = [0u8; SHARE_TOKEN_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Byte payloads travel as standard base64 strings; `null` reads as empty.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?;
        match encoded {
            Some(encoded) => STANDARD
                .decode(encoded.as_bytes())
                .map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
