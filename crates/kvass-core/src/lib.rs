//! # kvass Core
//!
//! Entry model, causal ordering, and merge semantics for kvass.
//!
//! This crate provides:
//! - [`Entry`], the versioned value stored per key, and its total order
//! - [`merge`], the join used for conflict resolution
//! - [`NodeState`], the per-replica clock, identity, and sync bookmark
//! - [`apply`], the mutation step every store runs inside its transaction

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entry;
pub mod merge;
pub mod node;

pub use entry::{merge, now_micros, Entry, ProcessId, RESERVED_PROCESS_ID};
pub use merge::apply;
pub use node::{ClockError, NodeState, StateError, ENCRYPTION_KEY_LEN, MAX_COUNTER};
