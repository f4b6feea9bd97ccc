//! # kvass Store
//!
//! Durable, transactional storage of entries and node state.
//!
//! Every mutation runs as one exclusive transaction that reads the current
//! entry, merges, and writes back both the winner and the advanced node
//! clock. Two implementations of [`Store`] are provided:
//!
//! - [`SqliteStore`]: the durable store, one database file per replica
//! - [`MemoryStore`]: an in-process double with identical semantics

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod memory;
pub mod sqlite;
pub mod store;

pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, SCHEMA_VERSION};
pub use store::{Keys, Store, StoreError};
