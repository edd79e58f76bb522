//! Replication against another Fieldbook database file.
//!
//! The peer is addressed as `file:///path/to/peer.db` or a bare path. Each
//! exchange compares revisions by id and copies whichever side is newer,
//! pushing first, then pulling, in batches. Hard deletes are not
//! propagated: a document deleted on one side is pulled back from the other.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use rusqlite::ErrorCode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::replicator::{
    ChangeBatch, Direction, ReplicationError, ReplicationEvent, ReplicationMode,
    ReplicationSession, ReplicationSummary, Replicator, RemoteEndpoint,
};
use crate::db::{Database, Document, DocumentStore};
use crate::error::Error;

const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const SESSION_BUFFER: usize = 16;

/// Replicates the local store with a database file
#[derive(Clone)]
pub struct PeerReplicator {
    local: DocumentStore,
    batch_size: usize,
    poll_interval: Duration,
}

impl PeerReplicator {
    pub fn new(local: DocumentStore) -> Self {
        Self {
            local,
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Documents per change batch
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Pause between exchanges in live mode
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl Replicator for PeerReplicator {
    fn replicate(
        &self,
        endpoint: &RemoteEndpoint,
        mode: ReplicationMode,
    ) -> Result<ReplicationSession, ReplicationError> {
        let path = resolve_peer_path(endpoint)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| ReplicationError::fatal("replication needs a tokio runtime"))?;

        let (tx, cancel, session) = ReplicationSession::channel(SESSION_BUFFER);
        let worker = PeerSession {
            local: self.local.clone(),
            path,
            mode,
            batch_size: self.batch_size,
            poll_interval: self.poll_interval,
            tx,
            cancel,
        };
        runtime.spawn(worker.run());
        Ok(session)
    }
}

fn resolve_peer_path(endpoint: &RemoteEndpoint) -> Result<PathBuf, ReplicationError> {
    let raw = endpoint.as_str();
    if let Some(path) = raw.strip_prefix("file://") {
        if path.is_empty() {
            return Err(ReplicationError::fatal("file endpoint has no path"));
        }
        return Ok(PathBuf::from(path));
    }
    if let Some((scheme, _)) = raw.split_once("://") {
        return Err(ReplicationError::fatal(format!(
            "unsupported endpoint scheme `{scheme}`"
        )));
    }
    Ok(PathBuf::from(raw))
}

/// Classify a store error raised while talking to the peer
fn peer_error(context: &str, error: &Error) -> ReplicationError {
    let message = format!("{context}: {error}");
    match error {
        Error::Sqlite(rusqlite::Error::SqliteFailure(failure, _))
            if failure.code == ErrorCode::NotADatabase =>
        {
            ReplicationError::fatal(message)
        }
        _ => ReplicationError::transient(message),
    }
}

/// Documents to send each way: `(push, pull)`
fn plan_exchange(local: Vec<Document>, remote: Vec<Document>) -> (Vec<Document>, Vec<Document>) {
    let local: BTreeMap<String, Document> =
        local.into_iter().map(|doc| (doc.id.clone(), doc)).collect();
    let remote: BTreeMap<String, Document> =
        remote.into_iter().map(|doc| (doc.id.clone(), doc)).collect();

    let push = local
        .values()
        .filter(|doc| remote.get(&doc.id).map_or(true, |theirs| theirs.rev < doc.rev))
        .cloned()
        .collect();
    let pull = remote
        .values()
        .filter(|doc| local.get(&doc.id).map_or(true, |ours| ours.rev < doc.rev))
        .cloned()
        .collect();
    (push, pull)
}

struct PeerSession {
    local: DocumentStore,
    path: PathBuf,
    mode: ReplicationMode,
    batch_size: usize,
    poll_interval: Duration,
    tx: mpsc::Sender<ReplicationEvent>,
    cancel: CancellationToken,
}

impl PeerSession {
    async fn run(self) {
        let remote = match Database::open(&self.path).await {
            Ok(db) => DocumentStore::new(db),
            Err(error) => {
                let error = peer_error(&format!("cannot open peer {}", self.path.display()), &error);
                let _ = self.tx.send(ReplicationEvent::Error(error)).await;
                return;
            }
        };

        loop {
            let summary = match self.exchange(&remote).await {
                Ok(Some(summary)) => summary,
                // cancelled, or nobody is listening any more
                Ok(None) => return,
                Err(error) => {
                    let _ = self.tx.send(ReplicationEvent::Error(error)).await;
                    return;
                }
            };
            tracing::debug!(
                "Exchange with {} pushed {} and pulled {} documents",
                self.path.display(),
                summary.pushed,
                summary.pulled
            );

            if self.mode == ReplicationMode::OneShot {
                let _ = self.tx.send(ReplicationEvent::Complete(summary)).await;
                return;
            }

            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn exchange(
        &self,
        remote: &DocumentStore,
    ) -> Result<Option<ReplicationSummary>, ReplicationError> {
        let local_docs = self
            .local
            .all_documents()
            .await
            .map_err(|error| peer_error("reading local documents", &error))?;
        let remote_docs = remote
            .all_documents()
            .await
            .map_err(|error| peer_error("reading peer documents", &error))?;
        let (push, pull) = plan_exchange(local_docs, remote_docs);

        let mut summary = ReplicationSummary::default();
        for chunk in push.chunks(self.batch_size) {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            remote
                .write_replicated(chunk.to_vec())
                .await
                .map_err(|error| peer_error("pushing to peer", &error))?;
            summary.pushed += chunk.len();
            if !self.emit(Direction::Push, chunk).await {
                return Ok(None);
            }
        }
        for chunk in pull.chunks(self.batch_size) {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            self.local
                .write_replicated(chunk.to_vec())
                .await
                .map_err(|error| peer_error("pulling from peer", &error))?;
            summary.pulled += chunk.len();
            if !self.emit(Direction::Pull, chunk).await {
                return Ok(None);
            }
        }
        Ok(Some(summary))
    }

    async fn emit(&self, direction: Direction, docs: &[Document]) -> bool {
        let batch = ChangeBatch {
            direction,
            docs: docs.to_vec(),
        };
        self.tx.send(ReplicationEvent::Change(batch)).await.is_ok()
    }
}
