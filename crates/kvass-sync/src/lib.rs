//! # kvass Sync
//!
//! Encrypted push/pull replication between two replicas over HTTP.
//!
//! ## Roles
//!
//! - [`SyncClient`]: pushes pending local entries to the configured remote
//!   and pulls entries the remote saw since the last pull.
//! - [`SyncServer`]: serves `/push`, `/pull` and the public `/get?q=` share
//!   lookup for one store.
//!
//! Both sides merge received entries through [`kvass_store::Store::mutate`],
//! so replaying a batch is harmless.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod server;

pub use client::{PullReport, PushReport, SyncClient, SyncClientConfig, SyncError};
pub use server::SyncServer;

use kvass_proto::EntryBatch;
use kvass_store::{Store, StoreError};

/// Merge a received batch as non-pending entries.
///
/// Entries whose counter the store cannot advance past are skipped so they
/// never block the rest of the batch. Returns how many were skipped.
pub(crate) fn merge_received<S: Store>(
    store: &S,
    batch: EntryBatch,
) -> Result<usize, StoreError> {
    let mut skipped = 0;
    for mut entry in batch {
        entry.needs_push = false;
        let key = entry.key.clone();
        match store.mutate(entry) {
            Ok(_) => {}
            Err(StoreError::Clock(err)) => {
                tracing::warn!(%key, error = %err, "Skipping received entry");
                skipped += 1;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(skipped)
}
