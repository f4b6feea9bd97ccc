//! HTTP server side of replica sync.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use kvass_proto::{
    endpoints::SHARE_QUERY_PARAM, CryptoError, Endpoint, EntryBatch, MessageError, PullRequest,
    SyncCipher,
};
use kvass_store::{Store, StoreError};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, ToSocketAddrs};

/// Sync endpoints for one store.
///
/// The server owns its store handle; nothing is registered globally, so any
/// number of servers can run in one process.
pub struct SyncServer<S> {
    store: Arc<S>,
}

impl<S: Store + 'static> SyncServer<S> {
    /// Create a server for `store`.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The served store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Router with the `push`, `pull` and share routes.
    ///
    /// Request bodies are unbounded: values are opaque and may be any size.
    pub fn router(&self) -> Router {
        Router::new()
            .route(Endpoint::Push.route(), post(receive_push::<S>))
            .route(Endpoint::Pull.route(), post(answer_pull::<S>))
            .route(Endpoint::Share.route(), get(share::<S>))
            .layer(DefaultBodyLimit::disable())
            .with_state(Arc::clone(&self.store))
    }

    /// Serve requests from `listener` until the process stops.
    ///
    /// # Errors
    ///
    /// Returns error if accepting connections fails.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        let local: Option<SocketAddr> = listener.local_addr().ok();
        tracing::info!(addr = ?local, "Sync server listening");

        axum::serve(listener, self.router()).await
    }

    /// Bind `addr` and serve.
    ///
    /// # Errors
    ///
    /// Returns error if the address cannot be bound or serving fails.
    pub async fn bind(self, addr: impl ToSocketAddrs) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }
}

/// POST /push - merge an encrypted entry batch
async fn receive_push<S: Store + 'static>(
    State(store): State<Arc<S>>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let merged = run_blocking(move || {
        let cipher = SyncCipher::from_hex(&store.state().encryption_key)?;
        let batch = EntryBatch::from_json(&cipher.decrypt(&body)?)?;

        let count = batch.len();
        let skipped = crate::merge_received(&*store, batch)?;
        Ok((count, skipped))
    })
    .await?;

    tracing::debug!(entries = merged.0, skipped = merged.1, "Merged pushed batch");
    Ok(StatusCode::OK)
}

/// POST /pull - answer with the entries the requester has not seen
async fn answer_pull<S: Store + 'static>(
    State(store): State<Arc<S>>,
    body: Bytes,
) -> Result<Vec<u8>, ApiError> {
    run_blocking(move || {
        let cipher = SyncCipher::from_hex(&store.state().encryption_key)?;
        let request = PullRequest::from_json(&cipher.decrypt(&body)?)?;

        let updates = store.updates_since(request.counter, request.process_id)?;
        tracing::debug!(
            since = request.counter,
            requester = request.process_id,
            entries = updates.len(),
            "Answering pull"
        );

        let batch = EntryBatch::new(updates);
        Ok(cipher.encrypt(&batch.to_json()?)?)
    })
    .await
}

/// GET /get?q={token} - raw value behind a share link
async fn share<S: Store + 'static>(
    State(store): State<Arc<S>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let token = params.get(SHARE_QUERY_PARAM).cloned().unwrap_or_default();
    if token.is_empty() {
        return Err(ApiError::BadRequest("missing share token".to_string()));
    }

    let entry = run_blocking(move || Ok(store.entry_by_token(&token)?))
        .await?
        .ok_or(ApiError::NotFound)?;
    if entry.is_tombstone() {
        return Err(ApiError::Gone);
    }

    let content_type = if entry.key.ends_with(".html") {
        "text/html; charset=utf-8"
    } else {
        "application/octet-stream"
    };
    Ok(([(header::CONTENT_TYPE, content_type)], entry.value).into_response())
}

async fn run_blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(format!("worker failed: {e}")))?
}

/// Request failure, rendered as a status code and a plain-text reason.
#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    NotFound,
    Gone,
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Gone => StatusCode::GONE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::BadRequest(message) | ApiError::Internal(message) => message,
            ApiError::NotFound => "unknown share token".to_string(),
            ApiError::Gone => "entry was deleted".to_string(),
        };

        if status.is_server_error() {
            tracing::error!(%status, reason = %message, "Sync request failed");
        } else {
            tracing::warn!(%status, reason = %message, "Sync request rejected");
        }
        (status, message).into_response()
    }
}

impl From<CryptoError> for ApiError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidKey(_) => ApiError::Internal(err.to_string()),
            CryptoError::Authentication | CryptoError::Encrypt(_) => {
                ApiError::BadRequest(err.to_string())
            }
        }
    }
}

impl From<MessageError> for ApiError {
    fn from(err: MessageError) -> Self {
        match err {
            MessageError::Deserialize(_) => ApiError::BadRequest(err.to_string()),
            MessageError::Serialize(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidKey(_) | StoreError::Clock(_) => {
                ApiError::BadRequest(err.to_string())
            }
            StoreError::Sqlite(_) | StoreError::State(_) => ApiError::Internal(err.to_string()),
        }
    }
}
