//! HTTP client side of replica sync.
//!
//! Store calls are short, synchronous transactions and run inline; only the
//! network round trips are awaited.

use kvass_core::{Entry, NodeState, MAX_COUNTER};
use kvass_proto::{
    CryptoError, Endpoint, EndpointError, EndpointScheme, EntryBatch, MessageError, PullRequest,
    SyncCipher,
};
use kvass_store::{Store, StoreError};
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Default upper bound on the value bytes sent in one push request.
pub const DEFAULT_MAX_BATCH_BYTES: usize = 1024 * 1024;

/// Sync client configuration.
#[derive(Debug, Clone)]
pub struct SyncClientConfig {
    /// Request timeout
    pub timeout: Duration,
    /// Value bytes per push request; a larger single value travels alone
    pub max_batch_bytes: usize,
}

impl Default for SyncClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
        }
    }
}

/// Outcome of a push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Entries sent to the remote
    pub sent: usize,
    /// Entries whose freshness marker was cleared afterwards
    pub cleared: usize,
}

/// Outcome of a pull.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Entries received from the remote
    pub received: usize,
    /// Received entries skipped because their counter cannot be stored
    pub skipped: usize,
    /// Remote high-water mark after the pull
    pub remote_counter: u64,
}

/// Client for one remote replica.
pub struct SyncClient {
    http: Client,
    remote: EndpointScheme,
    max_batch_bytes: usize,
}

impl SyncClient {
    /// Create a client for `remote`.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn new(remote: EndpointScheme, config: &SyncClientConfig) -> Result<Self, SyncError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .use_rustls_tls()
            .build()
            .map_err(|e| SyncError::Init(e.to_string()))?;

        Ok(Self {
            http,
            remote,
            max_batch_bytes: config.max_batch_bytes,
        })
    }

    /// Create a client for the remote configured in `state`, if any.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn for_state(
        state: &NodeState,
        config: &SyncClientConfig,
    ) -> Result<Option<Self>, SyncError> {
        state
            .remote_address
            .clone()
            .map(|url| Self::new(EndpointScheme::new(url), config))
            .transpose()
    }

    /// Base URL of the remote.
    #[must_use]
    pub fn remote(&self) -> &Url {
        self.remote.base()
    }

    /// Send every pending local entry to the remote.
    ///
    /// Entries go out in batches bounded by `max_batch_bytes`. The freshness
    /// marker is cleared per batch, only after the remote accepted it, and
    /// only on rows that were not rewritten in the meantime. A rejected batch
    /// does not stop the ones after it; the first failure is returned once
    /// all were tried.
    ///
    /// # Errors
    ///
    /// Returns error if the key is unusable, the remote cannot be reached or
    /// rejects a batch, or the store fails.
    pub async fn push<S: Store>(&self, store: &S) -> Result<PushReport, SyncError> {
        let pending = store.pending_updates()?;
        if pending.is_empty() {
            tracing::debug!(remote = %self.remote(), "Nothing to push");
            return Ok(PushReport::default());
        }

        let cipher = SyncCipher::from_hex(&store.state().encryption_key)?;
        let url = self.remote.url(Endpoint::Push)?;

        let mut report = PushReport::default();
        let mut first_error = None;
        for entries in batches(pending, self.max_batch_bytes) {
            let batch = EntryBatch::new(entries);
            let sealed = cipher.encrypt(&batch.to_json()?)?;

            tracing::debug!(%url, entries = batch.len(), "POST push");
            if let Err(err) = self.post(url.clone(), sealed).await {
                tracing::warn!(
                    remote = %self.remote(),
                    entries = batch.len(),
                    error = %err,
                    "Push batch failed"
                );
                first_error.get_or_insert(err);
                continue;
            }

            report.sent += batch.len();
            report.cleared += store.mark_pushed(&batch.entries)?;
        }

        tracing::info!(
            remote = %self.remote(),
            sent = report.sent,
            cleared = report.cleared,
            "Pushed updates"
        );
        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Fetch and merge the entries the remote saw since the last pull.
    ///
    /// Entries that originated here are filtered out by the remote. Entries
    /// whose counter cannot be stored are skipped, and the bookmark still
    /// moves past them so the next pull does not fail on them again.
    ///
    /// # Errors
    ///
    /// Returns error if the key is unusable, the remote cannot be reached,
    /// the response fails to decrypt or decode, or the store fails.
    pub async fn pull<S: Store>(&self, store: &S) -> Result<PullReport, SyncError> {
        let state = store.state();
        let cipher = SyncCipher::from_hex(&state.encryption_key)?;

        let request = PullRequest::new(state.remote_counter, state.process_id);
        let sealed = cipher.encrypt(&request.to_json()?)?;

        let url = self.remote.url(Endpoint::Pull)?;
        tracing::debug!(%url, since = state.remote_counter, "POST pull");
        let body = self.post(url, sealed).await?;

        let batch = EntryBatch::from_json(&cipher.decrypt(&body)?)?;
        let received = batch.len();
        let high_water = batch.max_counter();

        let skipped = crate::merge_received(store, batch)?;
        if let Some(counter) = high_water {
            store.raise_remote_counter(counter.min(MAX_COUNTER))?;
        }

        let remote_counter = store.state().remote_counter;
        tracing::info!(
            remote = %self.remote(),
            received,
            skipped,
            remote_counter,
            "Pulled updates"
        );
        Ok(PullReport {
            received,
            skipped,
            remote_counter,
        })
    }

    async fn post(&self, url: Url, body: Vec<u8>) -> Result<Vec<u8>, SyncError> {
        let response = self
            .http
            .post(url)
            .header("Content-Type", "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SyncError::Status {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Split `entries` into batches whose values add up to at most `max_bytes`.
///
/// Order is preserved. An entry larger than `max_bytes` forms its own batch.
fn batches(entries: Vec<Entry>, max_bytes: usize) -> Vec<Vec<Entry>> {
    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut size = 0usize;

    for entry in entries {
        let len = entry.value.len();
        if !current.is_empty() && size.saturating_add(len) > max_bytes {
            batches.push(std::mem::take(&mut current));
            size = 0;
        }
        size = size.saturating_add(len);
        current.push(entry);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("remote", &self.remote.base().as_str())
            .finish_non_exhaustive()
    }
}

/// Errors that can occur while syncing with a remote.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Client initialization failed
    #[error("client init error: {0}")]
    Init(String),
    /// Remote unreachable or the exchange was cut short
    #[error("transport error: {0}")]
    Transport(String),
    /// Remote answered with a non-success status
    #[error("remote error (status {status}): {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body
        message: String,
    },
    /// Remote address unusable
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
    /// Payload encryption failed
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// Wire message could not be encoded or decoded
    #[error(transparent)]
    Message(#[from] MessageError),
    /// Local store failed
    #[error(transparent)]
    Store(#[from] StoreError),
}
