//! Command handlers.
//!
//! Reads pull from the remote first and writes push afterwards. Sync is best
//! effort: a failure is logged as a warning and the local effect stands.

use anyhow::{bail, Context, Result};
use kvass_proto::{normalize_remote, EndpointScheme, SyncCipher};
use kvass_store::Store;
use kvass_sync::{SyncClient, SyncClientConfig};
use std::io::Write;
use url::Url;

/// Pull from `remote`, logging instead of failing.
pub async fn pull<S: Store>(store: &S, remote: Option<&Url>) {
    let Some(client) = client_for(remote) else {
        return;
    };
    if let Err(err) = client.pull(store).await {
        tracing::warn!(remote = %client.remote(), error = %err, "Couldn't get updates from remote");
    }
}

/// Push to `remote`, logging instead of failing.
pub async fn push<S: Store>(store: &S, remote: Option<&Url>) {
    let Some(client) = client_for(remote) else {
        return;
    };
    if let Err(err) = client.push(store).await {
        tracing::warn!(remote = %client.remote(), error = %err, "Could not push changes to remote");
    }
}

fn client_for(remote: Option<&Url>) -> Option<SyncClient> {
    let Some(remote) = remote else {
        tracing::debug!("No remote configured, staying local");
        return None;
    };

    match SyncClient::new(
        EndpointScheme::new(remote.clone()),
        &SyncClientConfig::default(),
    ) {
        Ok(client) => Some(client),
        Err(err) => {
            tracing::warn!(error = %err, "Sync client unavailable");
            None
        }
    }
}

/// `ls`: print every live key.
///
/// # Errors
///
/// Returns error if the store or the output fails.
pub async fn ls<S: Store>(store: &S, remote: Option<&Url>, out: &mut impl Write) -> Result<()> {
    pull(store, remote).await;

    for key in store.keys() {
        writeln!(out, "{}", key?)?;
    }
    Ok(())
}

/// `get`: write the raw value of `key`.
///
/// A deleted key writes its empty value; a key that was never set writes an
/// empty line.
///
/// # Errors
///
/// Returns error if the store or the output fails.
pub async fn get<S: Store>(
    store: &S,
    remote: Option<&Url>,
    key: &str,
    out: &mut impl Write,
) -> Result<()> {
    pull(store, remote).await;

    match store.get(key)? {
        Some(entry) => out.write_all(&entry.value)?,
        None => writeln!(out)?,
    }
    Ok(())
}

/// `set`: store `value` under `key`, then push.
///
/// # Errors
///
/// Returns error if the key is empty or the store fails.
pub async fn set<S: Store>(
    store: &S,
    remote: Option<&Url>,
    key: &str,
    value: Vec<u8>,
) -> Result<()> {
    let stored = store.set(key, value).context("Failed to set value")?;
    tracing::debug!(key, counter = stored.counter, "Stored");

    push(store, remote).await;
    Ok(())
}

/// `rm`: tombstone `key`, then push.
///
/// # Errors
///
/// Returns error if the key is empty or the store fails.
pub async fn rm<S: Store>(store: &S, remote: Option<&Url>, key: &str) -> Result<()> {
    let stored = store.delete(key).context("Failed to remove key")?;
    tracing::debug!(key, counter = stored.counter, "Removed");

    push(store, remote).await;
    Ok(())
}

/// `url`: print the share link of `key` on `remote`.
///
/// # Errors
///
/// Returns error if no remote is configured or the key does not exist.
pub fn share_url<S: Store>(
    store: &S,
    remote: Option<&Url>,
    key: &str,
    out: &mut impl Write,
) -> Result<()> {
    let Some(remote) = remote else {
        bail!("No remote configured, see `kvass config remote`");
    };
    let entry = match store.get(key)? {
        Some(entry) if !entry.is_tombstone() => entry,
        _ => bail!("Key not found: {key}"),
    };

    let url = EndpointScheme::new(remote.clone()).share_url(&entry.url_token)?;
    writeln!(out, "{url}")?;
    Ok(())
}

/// `config show`: print the persisted node configuration.
///
/// # Errors
///
/// Returns error if the output fails.
pub fn config_show<S: Store>(store: &S, out: &mut impl Write) -> Result<()> {
    let state = store.state();
    let remote = state
        .remote_address
        .as_ref()
        .map_or_else(|| "(none)".to_string(), ToString::to_string);

    writeln!(out, "Encryption Key:  \t{}", state.encryption_key)?;
    writeln!(out, "ProcessID:       \t{}", state.process_id)?;
    writeln!(out, "Remote:          \t{remote}")?;
    Ok(())
}

/// `config key`: replace the shared encryption key.
///
/// # Errors
///
/// Returns error if the key is not 32 hex-encoded bytes or cannot be saved.
pub fn config_key<S: Store>(store: &S, key_hex: &str) -> Result<()> {
    SyncCipher::from_hex(key_hex)?;

    let key = key_hex.trim().to_ascii_lowercase();
    store
        .update_state(|state| state.encryption_key = key)
        .context("Failed to save encryption key")?;
    Ok(())
}

/// `config pid`: replace the process id. Lower ids win ties.
///
/// # Errors
///
/// Returns error if the state cannot be saved.
pub fn config_pid<S: Store>(store: &S, process_id: u32) -> Result<()> {
    store
        .update_state(|state| state.process_id = process_id)
        .context("Failed to save process id")?;
    Ok(())
}

/// `config remote`: set the remote, or unset it with an empty string.
///
/// # Errors
///
/// Returns error if the address is invalid or cannot be saved.
pub fn config_remote<S: Store>(store: &S, address: &str) -> Result<()> {
    let remote = normalize_remote(address)?;
    store
        .update_state(|state| state.remote_address = remote)
        .context("Failed to save remote")?;
    Ok(())
}
