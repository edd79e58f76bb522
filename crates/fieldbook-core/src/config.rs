//! Runtime configuration.
//!
//! Values come from the environment (optionally a `.env` file), falling back
//! to defaults suitable for a single-device install.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::store::{FixedPlatform, StoreLocation};
use crate::sync::replicator::RemoteEndpoint;
use crate::sync::{RetryPolicy, SyncOptions};
use crate::util::normalize_text_option;

const ENV_DB_PATH: &str = "FIELDBOOK_DB_PATH";
const ENV_REMOTE_URL: &str = "FIELDBOOK_REMOTE_URL";
const ENV_BATCH_SIZE: &str = "FIELDBOOK_SYNC_BATCH_SIZE";
const ENV_POLL_MS: &str = "FIELDBOOK_SYNC_POLL_MS";
const ENV_RETRY_INITIAL_MS: &str = "FIELDBOOK_RETRY_INITIAL_MS";
const ENV_RETRY_MAX_MS: &str = "FIELDBOOK_RETRY_MAX_MS";

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local database file
    pub database_path: PathBuf,
    /// Peer to replicate with; sync is disabled when unset
    pub remote_url: Option<String>,
    /// Documents per replication batch
    pub replication_batch_size: usize,
    /// Pause between live exchanges
    pub live_poll_interval_ms: u64,
    pub retry_initial_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_db_path(),
            remote_url: None,
            replication_batch_size: 100,
            live_poll_interval_ms: 5_000,
            retry_initial_backoff_ms: 1_000,
            retry_max_backoff_ms: 60_000,
        }
    }
}

impl Config {
    /// Load from the process environment, reading `.env` first if present
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let get = |key: &str| normalize_text_option(lookup(key));

        Ok(Self {
            database_path: get(ENV_DB_PATH).map_or(defaults.database_path, PathBuf::from),
            remote_url: get(ENV_REMOTE_URL),
            replication_batch_size: parse_or(
                ENV_BATCH_SIZE,
                get(ENV_BATCH_SIZE),
                defaults.replication_batch_size,
            )?,
            live_poll_interval_ms: parse_or(
                ENV_POLL_MS,
                get(ENV_POLL_MS),
                defaults.live_poll_interval_ms,
            )?,
            retry_initial_backoff_ms: parse_or(
                ENV_RETRY_INITIAL_MS,
                get(ENV_RETRY_INITIAL_MS),
                defaults.retry_initial_backoff_ms,
            )?,
            retry_max_backoff_ms: parse_or(
                ENV_RETRY_MAX_MS,
                get(ENV_RETRY_MAX_MS),
                defaults.retry_max_backoff_ms,
            )?,
        })
    }

    /// Configured peer, if any
    pub fn remote_endpoint(&self) -> Result<Option<RemoteEndpoint>> {
        normalize_text_option(self.remote_url.clone())
            .map(RemoteEndpoint::new)
            .transpose()
    }

    /// Store platform opening the configured database file
    pub fn platform(&self) -> FixedPlatform {
        FixedPlatform(StoreLocation::Path(self.database_path.clone()))
    }

    /// Replication tuning derived from this config
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            batch_size: self.replication_batch_size.max(1),
            poll_interval: Duration::from_millis(self.live_poll_interval_ms),
            retry: RetryPolicy {
                initial_backoff: Duration::from_millis(self.retry_initial_backoff_ms),
                max_backoff: Duration::from_millis(
                    self.retry_max_backoff_ms.max(self.retry_initial_backoff_ms),
                ),
            },
        }
    }
}

/// `<data dir>/fieldbook/fieldbook.db`
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fieldbook")
        .join("fieldbook.db")
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::InvalidInput(format!("{key} has an invalid value `{raw}`"))),
    }
}
