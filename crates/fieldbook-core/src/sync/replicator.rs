//! Replication seam between the sync coordinator and the store's peer
//! exchange.
//!
//! A [`Replicator`] starts a session against a remote endpoint and reports
//! what it exchanged as a stream of [`ReplicationEvent`]s. The coordinator
//! only does bookkeeping on top of those events.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::db::Document;
use crate::error::{Error, Result};
use crate::util::normalize_text_option;

/// Address of the peer to replicate with; opaque to this crate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemoteEndpoint(String);

impl RemoteEndpoint {
    /// Wrap an endpoint address; only emptiness is checked here
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        normalize_text_option(Some(raw.into()))
            .map(Self)
            .ok_or_else(|| Error::InvalidInput("remote endpoint must not be empty".to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RemoteEndpoint {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<RemoteEndpoint> for String {
    fn from(endpoint: RemoteEndpoint) -> Self {
        endpoint.0
    }
}

/// How long a session runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationMode {
    /// Exchange once, then complete
    OneShot,
    /// Keep exchanging until cancelled or failed
    Live,
}

/// Which way a batch travelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Push,
    Pull,
}

/// Documents exchanged in one step, as they are now stored locally
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeBatch {
    pub direction: Direction,
    pub docs: Vec<Document>,
}

/// Totals reported when a session completes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicationSummary {
    pub pushed: usize,
    pub pulled: usize,
}

/// Whether retrying can help
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network drop, peer busy: retry later
    Transient,
    /// Bad endpoint, rejected credentials, incompatible peer: retrying will not help
    Fatal,
}

/// Replication failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationError {
    pub kind: FailureKind,
    pub message: String,
}

impl ReplicationError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Fatal,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == FailureKind::Fatal
    }
}

impl fmt::Display for ReplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            FailureKind::Transient => "transient",
            FailureKind::Fatal => "fatal",
        };
        write!(f, "{kind}: {}", self.message)
    }
}

impl From<ReplicationError> for Error {
    fn from(error: ReplicationError) -> Self {
        Self::SyncTransport(error.to_string())
    }
}

/// Event emitted by a running session
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicationEvent {
    Change(ChangeBatch),
    Complete(ReplicationSummary),
    Error(ReplicationError),
}

/// Handle on a running replication session.
///
/// Dropping the session cancels it.
#[derive(Debug)]
pub struct ReplicationSession {
    events: mpsc::Receiver<ReplicationEvent>,
    cancel: CancellationToken,
}

impl ReplicationSession {
    /// Create a session and the sender its producer writes to
    pub fn channel(capacity: usize) -> (mpsc::Sender<ReplicationEvent>, CancellationToken, Self) {
        let (tx, events) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        let session = Self {
            events,
            cancel: cancel.clone(),
        };
        (tx, cancel, session)
    }

    /// Next event; `None` once the producer is gone
    pub async fn next_event(&mut self) -> Option<ReplicationEvent> {
        self.events.recv().await
    }

    /// Ask the producer to stop
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ReplicationSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Starts replication sessions against remote peers
pub trait Replicator: Send + Sync {
    /// Begin exchanging documents with `endpoint`
    fn replicate(
        &self,
        endpoint: &RemoteEndpoint,
        mode: ReplicationMode,
    ) -> std::result::Result<ReplicationSession, ReplicationError>;
}
