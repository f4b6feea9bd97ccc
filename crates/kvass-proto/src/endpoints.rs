//! HTTP endpoint scheme for replica sync.
//!
//! Endpoints resolve beneath the remote's base URL, so a peer can be mounted
//! under a path prefix: `https://host/kv/` serves `https://host/kv/push`.

use url::Url;

/// A sync endpoint exposed by every replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Receives an encrypted entry batch
    Push,
    /// Answers an encrypted pull request with an encrypted entry batch
    Pull,
    /// Unauthenticated share-link lookup
    Share,
}

impl Endpoint {
    /// Path segment relative to the base URL.
    #[must_use]
    pub fn segment(self) -> &'static str {
        match self {
            Endpoint::Push => "push",
            Endpoint::Pull => "pull",
            Endpoint::Share => "get",
        }
    }

    /// Absolute route on a server mounted at `/`.
    #[must_use]
    pub fn route(self) -> &'static str {
        match self {
            Endpoint::Push => "/push",
            Endpoint::Pull => "/pull",
            Endpoint::Share => "/get",
        }
    }
}

/// Share-link query parameter carrying the token.
pub const SHARE_QUERY_PARAM: &str = "q";

/// Endpoint URLs of one remote replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointScheme {
    base: Url,
}

impl EndpointScheme {
    /// Create a scheme rooted at `base`.
    ///
    /// A missing trailing `/` is added so endpoints resolve beneath the path.
    #[must_use]
    pub fn new(mut base: Url) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self { base }
    }

    /// Base URL of the remote.
    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// URL of an endpoint.
    ///
    /// # Errors
    ///
    /// Returns error if the base cannot be joined with the endpoint segment.
    pub fn url(&self, endpoint: Endpoint) -> Result<Url, EndpointError> {
        self.base
            .join(endpoint.segment())
            .map_err(|e| EndpointError::Invalid(format!("{}: {e}", self.base)))
    }

    /// Public share link for an entry token.
    ///
    /// # Errors
    ///
    /// Returns error if the share endpoint cannot be resolved.
    pub fn share_url(&self, token: &str) -> Result<Url, EndpointError> {
        let mut url = self.url(Endpoint::Share)?;
        url.query_pairs_mut().append_pair(SHARE_QUERY_PARAM, token);
        Ok(url)
    }
}

/// Parse and normalize a user-supplied remote address.
///
/// - An empty string means "no remote" and yields `None`.
/// - The input must be an absolute URL (`scheme://host...`).
/// - Schemes other than `http`/`https` are replaced by `https`.
/// - The path always ends in `/`.
///
/// # Errors
///
/// Returns error if the input is not an absolute URL with a host.
pub fn normalize_remote(input: &str) -> Result<Option<Url>, EndpointError> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }

    let Some((scheme, rest)) = input.split_once("://") else {
        return Err(EndpointError::Invalid(format!(
            "{input}: expected an absolute URL such as http://host:8000"
        )));
    };

    let candidate = match scheme.to_ascii_lowercase().as_str() {
        "http" | "https" => input.to_string(),
        other => {
            tracing::warn!(
                scheme = other,
                "Only http(s) remotes are supported, defaulting to https"
            );
            format!("https://{rest}")
        }
    };

    let url = Url::parse(&candidate).map_err(|e| EndpointError::Invalid(format!("{input}: {e}")))?;
    if url.host_str().is_none() {
        return Err(EndpointError::Invalid(format!("{input}: missing host")));
    }

    Ok(Some(EndpointScheme::new(url).base))
}

/// Errors for remote addresses.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EndpointError {
    /// The address is not a usable URL
    #[error("invalid remote address: {0}")]
    Invalid(String),
}
