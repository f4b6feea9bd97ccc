//! CLI configuration.
//!
//! Only process-local settings live here. The encryption key, process id and
//! persisted remote belong to the node state inside the database.

use anyhow::{Context, Result};
use kvass_core::NodeState;
use kvass_proto::normalize_remote;
use std::path::PathBuf;
use url::Url;

/// Database file name, placed in the home directory by default.
const DEFAULT_DB_FILE: &str = ".kvassdb.sqlite";

/// Default sync server bind address: all interfaces, port 8000.
pub const DEFAULT_BIND: &str = "0.0.0.0:8000";

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    /// `SQLite` database path
    pub db_path: PathBuf,

    /// Address `serve` binds to
    pub bind_address: String,

    /// Remote used for this invocation instead of the persisted one
    pub remote_override: Option<Url>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            bind_address: DEFAULT_BIND.to_string(),
            remote_override: None,
        }
    }
}

impl CliConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `KVASS_DB`: database path
    /// - `KVASS_BIND`: server bind address
    /// - `KVASS_REMOTE`: remote URL overriding the persisted one
    ///
    /// # Errors
    ///
    /// Returns error if `KVASS_REMOTE` is not a valid remote address.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(db_path) = var("KVASS_DB") {
            config.db_path = PathBuf::from(db_path);
        }

        if let Some(bind) = var("KVASS_BIND") {
            config.bind_address = bind;
        }

        if let Some(remote) = var("KVASS_REMOTE") {
            config.remote_override = normalize_remote(&remote).context("Invalid KVASS_REMOTE")?;
        }

        Ok(config)
    }

    /// Apply command-line flags on top of the environment.
    #[must_use]
    pub fn with_flags(mut self, db: Option<PathBuf>, bind: Option<String>) -> Self {
        if let Some(db) = db {
            self.db_path = db;
        }
        if let Some(bind) = bind {
            self.bind_address = bind;
        }
        self
    }

    /// Remote to sync with: the override if set, else the persisted one.
    #[must_use]
    pub fn remote(&self, state: &NodeState) -> Option<Url> {
        self.remote_override
            .clone()
            .or_else(|| state.remote_address.clone())
    }
}

fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_DB_FILE)
}
