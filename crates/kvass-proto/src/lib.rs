//! # kvass Protocol
//!
//! Wire format, payload encryption, and HTTP endpoint scheme for replica sync.
//!
//! ## Messages
//!
//! - `EntryBatch`: JSON array of entries (push body, pull response)
//! - `PullRequest`: `{ "Counter", "ProcessID" }` (pull body)
//!
//! Every body is sealed with [`SyncCipher`] (AES-256-GCM, random nonce
//! prepended) before it leaves the process.
//!
//! ## Endpoints
//!
//! Resolved beneath the remote base URL: `push`, `pull`, `get?q={token}`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod crypto;
pub mod endpoints;
pub mod messages;

pub use crypto::{CryptoError, SyncCipher};
pub use endpoints::{normalize_remote, Endpoint, EndpointError, EndpointScheme};
pub use messages::{EntryBatch, MessageError, PullRequest};
