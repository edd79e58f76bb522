//! Record operations used by the client UI.

use crate::db::{DocumentStore, SettingsRepository, SqliteSettingsRepository};
use crate::error::{Error, Result};
use crate::models::{build_report, build_task, NewReport, NewTask, Record, RecordType, Settings};
use crate::query::{self, Page, PageRequest, UnsyncedCounts};
use crate::store::{self, StoreProvider};
use crate::sync::peer::PeerReplicator;
use crate::sync::replicator::RemoteEndpoint;
use crate::sync::{LiveSync, SyncCoordinator, SyncOptions, SyncReport};

/// Task and report operations over the shared document store.
#[derive(Clone)]
pub struct AppDatabase {
    store: DocumentStore,
    sync_options: SyncOptions,
}

impl AppDatabase {
    /// Wrap an already acquired store
    pub fn new(store: DocumentStore) -> Self {
        Self {
            store,
            sync_options: SyncOptions::default(),
        }
    }

    /// Use the process-wide store (see [`store::install`])
    pub async fn acquire() -> Result<Self> {
        Ok(Self::new(store::acquire().await?))
    }

    /// Use the store of a specific provider
    pub async fn from_provider(provider: &StoreProvider) -> Result<Self> {
        Ok(Self::new(provider.acquire().await?))
    }

    /// Override replication tuning
    #[must_use]
    pub const fn with_sync_options(mut self, sync_options: SyncOptions) -> Self {
        self.sync_options = sync_options;
        self
    }

    pub const fn store(&self) -> &DocumentStore {
        &self.store
    }

    async fn created_by(&self) -> String {
        SqliteSettingsRepository::new(self.store.database())
            .created_by()
            .await
    }

    async fn insert(&self, mut record: Record) -> Result<Record> {
        let rev = self.store.put(record.to_document()?).await?;
        record.rev = Some(rev);
        Ok(record)
    }

    /// Create a task (status `open`, unsynced)
    pub async fn add_task(&self, input: &NewTask) -> Result<Record> {
        let task = build_task(input, &self.created_by().await);
        let task = self
            .insert(task)
            .await
            .inspect_err(|error| tracing::error!("Error adding task: {error}"))?;
        tracing::info!("Task {} saved offline", task.id);
        Ok(task)
    }

    /// Create a report (status `draft` unless given, unsynced)
    pub async fn add_report(&self, input: &NewReport) -> Result<Record> {
        let report = build_report(input, &self.created_by().await);
        let report = self
            .insert(report)
            .await
            .inspect_err(|error| tracing::error!("Error adding report: {error}"))?;
        tracing::info!("Report {} saved offline", report.id);
        Ok(report)
    }

    /// All tasks, ascending by id
    pub async fn list_tasks(&self) -> Result<Vec<Record>> {
        query::list_all(&self.store, RecordType::Task).await
    }

    /// All reports, ascending by id
    pub async fn list_reports(&self) -> Result<Vec<Record>> {
        query::list_all(&self.store, RecordType::Report).await
    }

    /// One keyset page of a record type
    pub async fn list_page(&self, record_type: RecordType, request: &PageRequest) -> Result<Page> {
        query::list_page(&self.store, record_type, request).await
    }

    /// Unsynced records per type
    pub async fn count_unsynced(&self) -> Result<UnsyncedCounts> {
        query::count_unsynced(&self.store).await
    }

    /// Fetch a task or report by id
    pub async fn get_document(&self, id: &str) -> Result<Record> {
        Record::from_document(self.store.get(id).await?)
    }

    /// Save edits to a record read earlier.
    ///
    /// `record.rev` must still be current. Identity and creation fields are
    /// kept from the stored copy, `synced` is left to sync bookkeeping, and
    /// `updatedAt` is refreshed.
    pub async fn update_document(&self, mut record: Record) -> Result<Record> {
        let current = self.get_document(record.id.as_str()).await?;
        if current.record_type() != record.record_type() {
            return Err(Error::InvalidInput(format!(
                "cannot change {} from {} to {}",
                record.id,
                current.record_type(),
                record.record_type()
            )));
        }

        record.created_at = current.created_at;
        record.created_by = current.created_by;
        record.synced = current.synced;
        record.updated_at = record.updated_at.max(current.updated_at);
        record.touch();

        let rev = self
            .store
            .put(record.to_document()?)
            .await
            .inspect_err(|error| tracing::error!("Error updating {}: {error}", record.id))?;
        record.rev = Some(rev);
        tracing::info!("Document {} updated to revision {rev}", record.id);
        Ok(record)
    }

    /// Permanently remove a record
    pub async fn delete_document(&self, id: &str) -> Result<()> {
        self.store
            .delete(id)
            .await
            .inspect_err(|error| tracing::error!("Error deleting {id}: {error}"))?;
        tracing::info!("Document {id} deleted");
        Ok(())
    }

    pub async fn load_settings(&self) -> Result<Settings> {
        SqliteSettingsRepository::new(self.store.database())
            .load()
            .await
    }

    pub async fn save_settings(&self, settings: &Settings) -> Result<()> {
        SqliteSettingsRepository::new(self.store.database())
            .save(settings)
            .await
    }

    /// Name stamped into `createdBy` on records created from now on
    pub async fn set_display_name(&self, display_name: Option<String>) -> Result<()> {
        self.save_settings(&Settings { display_name }).await
    }

    /// Coordinator replicating with a peer database file
    pub fn peer_coordinator(&self) -> SyncCoordinator<PeerReplicator> {
        let replicator = PeerReplicator::new(self.store.clone())
            .with_batch_size(self.sync_options.batch_size)
            .with_poll_interval(self.sync_options.poll_interval);
        SyncCoordinator::new(self.store.clone(), replicator)
            .with_retry_policy(self.sync_options.retry)
    }

    /// Exchange once with `endpoint` and flag what was exchanged
    pub async fn sync_once(&self, endpoint: &RemoteEndpoint) -> Result<SyncReport> {
        self.peer_coordinator().sync_once(endpoint).await
    }

    /// Keep exchanging with `endpoint` until the returned handle is cancelled
    pub fn live_sync(&self, endpoint: RemoteEndpoint) -> LiveSync {
        self.peer_coordinator().live_sync(endpoint)
    }
}
