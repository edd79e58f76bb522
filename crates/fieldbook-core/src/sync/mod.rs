//! Sync coordination
//!
//! Drives replication sessions and records which local task and report
//! documents the remote peer now has. For every exchanged batch, the
//! task/report documents still flagged `synced: false` are stamped
//! `synced: true` with a fresh `updatedAt` and written back in one
//! [`DocumentStore::bulk_update`]. That bulk write is the atomic unit of
//! bookkeeping: cancellation is never observed in the middle of it.

pub mod peer;
pub mod replicator;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::db::{Document, DocumentStore};
use crate::error::{Error, Result};
use crate::models::{Record, RecordType};
use crate::state::SyncPhase;
use replicator::{
    ChangeBatch, Direction, ReplicationError, ReplicationEvent, ReplicationMode,
    ReplicationSession, ReplicationSummary, Replicator, RemoteEndpoint,
};

const NOTICE_BUFFER: usize = 64;

/// Reconnect delays for live sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before reconnect attempt `attempt` (0-based), doubling up to the cap
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Replication tuning shared by one-shot and live sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Documents per change batch
    pub batch_size: usize,
    /// Pause between live exchanges
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of bookkeeping for one change batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchMarks {
    /// Unsynced task/report documents in the batch
    pub candidates: usize,
    /// Documents now flagged synced
    pub marked: usize,
    /// Documents the store refused (e.g. edited since the exchange)
    pub rejected: usize,
}

/// Totals for a one-shot sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub batches: usize,
    pub exchanged: usize,
    pub marked: usize,
    pub rejected: usize,
    pub summary: ReplicationSummary,
}

impl SyncReport {
    fn record(&mut self, batch: &ChangeBatch, marks: BatchMarks) {
        self.batches += 1;
        self.exchanged += batch.docs.len();
        self.marked += marks.marked;
        self.rejected += marks.rejected;
    }
}

/// Progress notices from a live session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncNotice {
    BatchSynced {
        direction: Direction,
        exchanged: usize,
        marks: BatchMarks,
    },
    Retrying {
        attempt: u32,
        delay: Duration,
        reason: String,
    },
    Failed {
        reason: String,
    },
}

fn is_unsynced_record(doc: &Document) -> bool {
    let is_record = doc
        .doc_type()
        .is_some_and(|kind| kind.parse::<RecordType>().is_ok());
    let synced = doc.field("synced").and_then(Value::as_bool).unwrap_or(false);
    is_record && !synced
}

/// Flag the unsynced task/report documents of an exchanged batch as synced.
///
/// Only documents the store accepts are flipped; the others keep
/// `synced: false` and are picked up by a later exchange.
pub async fn mark_batch_synced(store: &DocumentStore, docs: &[Document]) -> Result<BatchMarks> {
    let mut updates = Vec::new();
    for doc in docs.iter().filter(|doc| is_unsynced_record(doc)) {
        match Record::from_document(doc.clone()) {
            Ok(mut record) => {
                record.mark_synced();
                updates.push(record.to_document()?);
            }
            Err(error) => tracing::warn!("Skipping malformed document {}: {error}", doc.id),
        }
    }

    if updates.is_empty() {
        return Ok(BatchMarks::default());
    }

    let candidates = updates.len();
    let outcomes = store.bulk_update(updates).await?;
    let marked = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    Ok(BatchMarks {
        candidates,
        marked,
        rejected: candidates - marked,
    })
}

/// Runs sync sessions for one local store
pub struct SyncCoordinator<R> {
    store: DocumentStore,
    replicator: Arc<R>,
    retry: RetryPolicy,
    phase: Arc<watch::Sender<SyncPhase>>,
}

impl<R: Replicator + 'static> SyncCoordinator<R> {
    pub fn new(store: DocumentStore, replicator: R) -> Self {
        Self {
            store,
            replicator: Arc::new(replicator),
            retry: RetryPolicy::default(),
            phase: Arc::new(watch::Sender::new(SyncPhase::Idle)),
        }
    }

    /// Override the live-sync reconnect policy
    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Current phase of the most recent session
    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    /// Watch phase transitions
    pub fn subscribe(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    /// Exchange once with `endpoint` and flag what was exchanged.
    ///
    /// Transport failures are returned, not retried.
    pub async fn sync_once(&self, endpoint: &RemoteEndpoint) -> Result<SyncReport> {
        self.phase.send_replace(SyncPhase::Negotiating);
        tracing::info!("Starting one-shot sync with {endpoint}");

        let mut session = self
            .replicator
            .replicate(endpoint, ReplicationMode::OneShot)
            .map_err(|error| self.fail(error))?;

        let mut report = SyncReport::default();
        loop {
            match session.next_event().await {
                Some(ReplicationEvent::Change(batch)) => {
                    self.phase.send_replace(SyncPhase::Exchanging);
                    let marks = mark_batch_synced(&self.store, &batch.docs)
                        .await
                        .inspect_err(|_| {
                            self.phase.send_replace(SyncPhase::Failed);
                        })?;
                    tracing::debug!(
                        "Sync {:?} batch of {}: {} flagged, {} rejected",
                        batch.direction,
                        batch.docs.len(),
                        marks.marked,
                        marks.rejected
                    );
                    report.record(&batch, marks);
                }
                Some(ReplicationEvent::Complete(summary)) => {
                    report.summary = summary;
                    self.phase.send_replace(SyncPhase::Completed);
                    tracing::info!(
                        "Sync with {endpoint} completed: {} pushed, {} pulled, {} flagged synced",
                        summary.pushed,
                        summary.pulled,
                        report.marked
                    );
                    return Ok(report);
                }
                Some(ReplicationEvent::Error(error)) => return Err(self.fail(error)),
                None => {
                    return Err(self.fail(ReplicationError::transient(
                        "replication session ended without completing",
                    )))
                }
            }
        }
    }

    fn fail(&self, error: ReplicationError) -> Error {
        self.phase.send_replace(SyncPhase::Failed);
        tracing::error!("Sync failed: {error}");
        error.into()
    }

    /// Start continuous sync with `endpoint` in the background.
    ///
    /// Transient failures reconnect with backoff for as long as the session
    /// lives; a fatal failure ends it. Must be called inside a tokio runtime.
    pub fn live_sync(&self, endpoint: RemoteEndpoint) -> LiveSync {
        let cancel = CancellationToken::new();
        let (notices_tx, notices) = mpsc::channel(NOTICE_BUFFER);
        let worker = LiveWorker {
            store: self.store.clone(),
            replicator: Arc::clone(&self.replicator),
            retry: self.retry,
            phase: Arc::clone(&self.phase),
            endpoint,
            cancel: cancel.clone(),
            notices: notices_tx,
        };

        LiveSync {
            cancel: cancel.clone(),
            guard: cancel.drop_guard(),
            notices,
            phase: self.phase.subscribe(),
            task: tokio::spawn(worker.run()),
        }
    }
}

/// Handle on a running live sync. Dropping it cancels the session.
pub struct LiveSync {
    cancel: CancellationToken,
    guard: DropGuard,
    notices: mpsc::Receiver<SyncNotice>,
    phase: watch::Receiver<SyncPhase>,
    task: JoinHandle<Result<()>>,
}

impl LiveSync {
    /// Next progress notice; `None` after the session has ended
    pub async fn next_notice(&mut self) -> Option<SyncNotice> {
        self.notices.recv().await
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    /// Watch phase transitions
    pub fn phase_receiver(&self) -> watch::Receiver<SyncPhase> {
        self.phase.clone()
    }

    /// Stop reconnecting and end the session after any in-flight batch
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session to end on its own (cancel or fatal failure)
    pub async fn join(self) -> Result<()> {
        let Self { guard, task, .. } = self;
        let result = task
            .await
            .map_err(|error| Error::SyncTransport(format!("live sync task failed: {error}")));
        drop(guard);
        result?
    }

    /// Cancel and wait for the session to wind down
    pub async fn stop(self) -> Result<()> {
        self.cancel();
        self.join().await
    }
}

enum SessionEnd {
    Cancelled,
    Failed(ReplicationError),
}

struct LiveWorker<R> {
    store: DocumentStore,
    replicator: Arc<R>,
    retry: RetryPolicy,
    phase: Arc<watch::Sender<SyncPhase>>,
    endpoint: RemoteEndpoint,
    cancel: CancellationToken,
    notices: mpsc::Sender<SyncNotice>,
}

impl<R: Replicator> LiveWorker<R> {
    async fn run(self) -> Result<()> {
        tracing::info!("Starting live sync with {}", self.endpoint);
        let mut attempt: u32 = 0;

        while !self.cancel.is_cancelled() {
            self.phase.send_replace(SyncPhase::Negotiating);
            let failure = match self.replicator.replicate(&self.endpoint, ReplicationMode::Live) {
                Ok(session) => match self.drive(session, &mut attempt).await {
                    SessionEnd::Cancelled => break,
                    SessionEnd::Failed(error) => error,
                },
                Err(error) => error,
            };

            if failure.is_fatal() {
                self.phase.send_replace(SyncPhase::Failed);
                tracing::error!("Live sync with {} stopped: {failure}", self.endpoint);
                self.notify(SyncNotice::Failed {
                    reason: failure.to_string(),
                });
                return Err(failure.into());
            }

            let delay = self.retry.delay(attempt);
            attempt = attempt.saturating_add(1);
            tracing::warn!(
                "Live sync with {} interrupted ({failure}); reconnecting in {delay:?}",
                self.endpoint
            );
            self.notify(SyncNotice::Retrying {
                attempt,
                delay,
                reason: failure.to_string(),
            });

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.phase.send_replace(SyncPhase::Idle);
        tracing::info!("Live sync with {} cancelled", self.endpoint);
        Ok(())
    }

    async fn drive(&self, mut session: ReplicationSession, attempt: &mut u32) -> SessionEnd {
        loop {
            let event = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    session.cancel();
                    return SessionEnd::Cancelled;
                }
                event = session.next_event() => event,
            };

            match event {
                Some(ReplicationEvent::Change(batch)) => {
                    self.phase.send_replace(SyncPhase::Exchanging);
                    // Not raced against cancellation: the bulk write finishes.
                    match mark_batch_synced(&self.store, &batch.docs).await {
                        Ok(marks) => {
                            *attempt = 0;
                            self.notify(SyncNotice::BatchSynced {
                                direction: batch.direction,
                                exchanged: batch.docs.len(),
                                marks,
                            });
                        }
                        Err(error) => {
                            return SessionEnd::Failed(ReplicationError::transient(format!(
                                "sync bookkeeping failed: {error}"
                            )))
                        }
                    }
                }
                Some(ReplicationEvent::Complete(_)) => {
                    return SessionEnd::Failed(ReplicationError::transient(
                        "peer closed the live session",
                    ))
                }
                Some(ReplicationEvent::Error(error)) => return SessionEnd::Failed(error),
                None => {
                    return SessionEnd::Failed(ReplicationError::transient(
                        "replication session ended",
                    ))
                }
            }
        }
    }

    fn notify(&self, notice: SyncNotice) {
        if self.notices.try_send(notice).is_err() {
            tracing::debug!("Dropping live sync notice; receiver is behind or gone");
        }
    }
}

#[cfg(test)]
mod tests;
