//! Process-wide document store acquisition
//!
//! The host decides whether a store can exist (a server-rendering process
//! cannot have one) and where it lives, through [`StorePlatform`]. The
//! provider opens the store at most once and hands out clones of that
//! handle; callers racing the first open wait for it instead of opening
//! their own.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use tokio::sync::Mutex;

use crate::db::{Database, DocumentStore};
use crate::error::{Error, Result};

/// Fields the store keeps secondary indexes on
pub const INDEXED_FIELDS: [&str; 2] = ["type", "synced"];

/// Where the store lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// Database file
    Path(PathBuf),
    /// Private in-memory database (tests, previews)
    InMemory,
}

/// What the host can offer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCapability {
    Available(StoreLocation),
    Unavailable { reason: String },
}

/// Host capability check, injected at startup
pub trait StorePlatform: Send + Sync {
    /// Report whether, and where, a store can be opened
    fn capability(&self) -> StoreCapability;
}

/// Platform that always opens the same location
#[derive(Debug, Clone)]
pub struct FixedPlatform(pub StoreLocation);

impl StorePlatform for FixedPlatform {
    fn capability(&self) -> StoreCapability {
        StoreCapability::Available(self.0.clone())
    }
}

/// Platform with no store, e.g. server-side rendering
#[derive(Debug, Clone)]
pub struct HeadlessPlatform;

impl StorePlatform for HeadlessPlatform {
    fn capability(&self) -> StoreCapability {
        StoreCapability::Unavailable {
            reason: "no document store outside an interactive client".to_string(),
        }
    }
}

/// Lazily opened, shared document store
pub struct StoreProvider {
    platform: Arc<dyn StorePlatform>,
    handle: Mutex<Option<DocumentStore>>,
}

impl StoreProvider {
    /// Create a provider; nothing is opened until [`Self::acquire`]
    pub fn new(platform: Arc<dyn StorePlatform>) -> Self {
        Self {
            platform,
            handle: Mutex::new(None),
        }
    }

    /// Return the shared store, opening it on first use
    pub async fn acquire(&self) -> Result<DocumentStore> {
        // Held across initialization so concurrent first callers wait here.
        let mut handle = self.handle.lock().await;
        if let Some(store) = handle.as_ref() {
            return Ok(store.clone());
        }

        let store = self.initialize().await?;
        *handle = Some(store.clone());
        Ok(store)
    }

    /// Drop the shared handle; the next acquire opens a fresh one
    pub async fn reset(&self) {
        let mut handle = self.handle.lock().await;
        if handle.take().is_some() {
            tracing::debug!("Document store handle released");
        }
    }

    /// Whether a handle is currently open
    pub async fn is_initialized(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    async fn initialize(&self) -> Result<DocumentStore> {
        let location = match self.platform.capability() {
            StoreCapability::Available(location) => location,
            StoreCapability::Unavailable { reason } => {
                let error = Error::EnvironmentUnavailable(reason);
                tracing::error!("{error}");
                return Err(error);
            }
        };

        let db = match &location {
            StoreLocation::Path(path) => Database::open(path).await,
            StoreLocation::InMemory => Database::open_in_memory().await,
        }
        .inspect_err(|error| tracing::error!("Failed to open document store: {error}"))?;

        let store = DocumentStore::new(db);
        for field in INDEXED_FIELDS {
            store.ensure_index(field).await;
        }

        tracing::info!("Document store ready ({location:?})");
        Ok(store)
    }
}

static PROVIDER: OnceLock<StoreProvider> = OnceLock::new();

/// Install the process-wide provider. Only the first call takes effect.
pub fn install(platform: Arc<dyn StorePlatform>) -> Result<()> {
    PROVIDER
        .set(StoreProvider::new(platform))
        .map_err(|_| Error::InvalidInput("a store platform is already installed".to_string()))
}

/// Acquire the process-wide store
pub async fn acquire() -> Result<DocumentStore> {
    match PROVIDER.get() {
        Some(provider) => provider.acquire().await,
        None => Err(Error::EnvironmentUnavailable(
            "no store platform installed".to_string(),
        )),
    }
}

/// Release the process-wide store handle (teardown hook)
pub async fn reset() {
    if let Some(provider) = PROVIDER.get() {
        provider.reset().await;
    }
}
