//! # kvass
//!
//! A personal key-value store that syncs between machines through an
//! encrypted HTTP remote.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kvass_store::{SqliteStore, Store};
use kvass_sync::SyncServer;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use config::CliConfig;

#[derive(Parser, Debug)]
#[command(name = "kvass", version, about = "A personal key-value store")]
struct Cli {
    /// Database file to use (default: ~/.kvassdb.sqlite)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List keys
    Ls,
    /// Print a value
    Get {
        /// The key to get
        key: String,
    },
    /// Set a value
    Set {
        /// The key to set
        key: String,
        /// The value to set (omit to read stdin)
        value: Option<String>,
    },
    /// Remove a key
    Rm {
        /// The key to remove
        key: String,
    },
    /// Print the shareable URL of an entry
    Url {
        /// The key of the entry
        key: String,
    },
    /// Serve sync requests for this database
    Serve {
        /// Bind address (default: 0.0.0.0:8000)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Show or change configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the current configuration
    Show,
    /// Set the hex-encoded 32-byte encryption key
    Key {
        /// The hex-encoded key
        key: String,
    },
    /// Set the process id (lower id wins conflicts)
    Pid {
        /// The new process id, 1 to 4294967295
        #[arg(value_parser = clap::value_parser!(u32).range(1..))]
        id: u32,
    },
    /// Set the remote server ("" unsets it)
    Remote {
        /// For example "http://1.2.3.4:4242"
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if matches!(cli.command, Command::Serve { .. }) {
        "info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let bind = match &cli.command {
        Command::Serve { bind } => bind.clone(),
        _ => None,
    };
    let config = CliConfig::from_env()?.with_flags(cli.db, bind);

    let store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("Failed to open {}", config.db_path.display()))?;
    let remote = config.remote(&store.state());
    let remote = remote.as_ref();
    let mut stdout = std::io::stdout();

    match cli.command {
        Command::Ls => commands::ls(&store, remote, &mut stdout).await?,
        Command::Get { key } => commands::get(&store, remote, &key, &mut stdout).await?,
        Command::Set { key, value } => {
            let value = match value {
                Some(value) => format!("{value}\n").into_bytes(),
                None => {
                    let mut buf = Vec::new();
                    std::io::stdin()
                        .read_to_end(&mut buf)
                        .context("Failed to read value from stdin")?;
                    buf
                }
            };
            commands::set(&store, remote, &key, value).await?;
        }
        Command::Rm { key } => commands::rm(&store, remote, &key).await?,
        Command::Url { key } => commands::share_url(&store, remote, &key, &mut stdout)?,
        Command::Serve { .. } => {
            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                db = %config.db_path.display(),
                bind = %config.bind_address,
                "Starting kvass server"
            );
            SyncServer::new(Arc::new(store))
                .bind(config.bind_address.as_str())
                .await
                .with_context(|| format!("Failed to serve on {}", config.bind_address))?;
        }
        Command::Config(command) => match command {
            ConfigCommand::Show => commands::config_show(&store, &mut stdout)?,
            ConfigCommand::Key { key } => commands::config_key(&store, &key)?,
            ConfigCommand::Pid { id } => commands::config_pid(&store, id)?,
            ConfigCommand::Remote { url } => commands::config_remote(&store, &url)?,
        },
    }

    Ok(())
}
