use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use pretty_assertions::assert_eq;

use super::*;
use crate::db::Database;
use crate::models::{build_report, build_task, NewReport, NewTask};

/// What one scripted session does
enum Script {
    /// Refuse to start
    Refuse(ReplicationError),
    /// Emit these events, then keep the session open until cancelled
    Emit(Vec<ReplicationEvent>),
}

/// Replicator double that plays back one script per session
struct ScriptedReplicator {
    scripts: Mutex<VecDeque<Script>>,
    started: Arc<AtomicUsize>,
    cancelled: Arc<AtomicUsize>,
}

impl ScriptedReplicator {
    fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            started: Arc::new(AtomicUsize::new(0)),
            cancelled: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Replicator for ScriptedReplicator {
    fn replicate(
        &self,
        _endpoint: &RemoteEndpoint,
        _mode: ReplicationMode,
    ) -> std::result::Result<ReplicationSession, ReplicationError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Emit(Vec::new()));

        match script {
            Script::Refuse(error) => Err(error),
            Script::Emit(events) => {
                let (tx, cancel, session) = ReplicationSession::channel(8);
                let cancelled = Arc::clone(&self.cancelled);
                tokio::spawn(async move {
                    for event in events {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    cancel.cancelled().await;
                    cancelled.fetch_add(1, Ordering::SeqCst);
                });
                Ok(session)
            }
        }
    }
}

async fn setup() -> DocumentStore {
    DocumentStore::new(Database::open_in_memory().await.unwrap())
}

async fn add_task(store: &DocumentStore, title: &str) -> Document {
    let task = build_task(
        &NewTask {
            title: title.to_string(),
            ..NewTask::default()
        },
        "Dana",
    );
    store.put(task.to_document().unwrap()).await.unwrap();
    store.get(task.id.as_str()).await.unwrap()
}

async fn add_report(store: &DocumentStore, title: &str) -> Document {
    let report = build_report(
        &NewReport {
            title: title.to_string(),
            ..NewReport::default()
        },
        "Dana",
    );
    store.put(report.to_document().unwrap()).await.unwrap();
    store.get(report.id.as_str()).await.unwrap()
}

fn change(docs: Vec<Document>) -> ReplicationEvent {
    ReplicationEvent::Change(ChangeBatch {
        direction: Direction::Push,
        docs,
    })
}

fn endpoint() -> RemoteEndpoint {
    RemoteEndpoint::new("file:///tmp/fieldbook-peer.db").unwrap()
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

async fn stored(store: &DocumentStore, id: &str) -> Record {
    Record::from_document(store.get(id).await.unwrap()).unwrap()
}

#[test]
fn retry_policy_doubles_up_to_cap() {
    let policy = RetryPolicy {
        initial_backoff: Duration::from_secs(1),
        max_backoff: Duration::from_secs(10),
    };
    assert_eq!(policy.delay(0), Duration::from_secs(1));
    assert_eq!(policy.delay(1), Duration::from_secs(2));
    assert_eq!(policy.delay(3), Duration::from_secs(8));
    assert_eq!(policy.delay(4), Duration::from_secs(10));
    assert_eq!(policy.delay(u32::MAX), Duration::from_secs(10));
}

#[tokio::test(flavor = "multi_thread")]
async fn mark_batch_only_flags_unsynced_records() {
    let store = setup().await;
    let task = add_task(&store, "Pour footing").await;
    let report = add_report(&store, "Daily log").await;

    let mut other = serde_json::Map::new();
    other.insert("type".into(), "photo".into());
    other.insert("synced".into(), false.into());
    store.put(Document::new("photo:1", other)).await.unwrap();
    let photo = store.get("photo:1").await.unwrap();

    let marks = mark_batch_synced(&store, &[task.clone(), report.clone(), photo])
        .await
        .unwrap();
    assert_eq!(
        marks,
        BatchMarks {
            candidates: 2,
            marked: 2,
            rejected: 0
        }
    );
    assert!(stored(&store, &task.id).await.synced);
    assert!(stored(&store, &report.id).await.synced);
    assert_eq!(
        store.get("photo:1").await.unwrap().field("synced"),
        Some(&Value::Bool(false))
    );

    // already synced now: nothing to do
    let again = store.get(&task.id).await.unwrap();
    assert_eq!(
        mark_batch_synced(&store, &[again]).await.unwrap(),
        BatchMarks::default()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn mark_batch_leaves_edited_documents_unsynced() {
    let store = setup().await;
    let exchanged = add_task(&store, "Frame walls").await;

    // edited locally after the exchange read it
    let mut edited = stored(&store, &exchanged.id).await;
    edited.touch();
    store.put(edited.to_document().unwrap()).await.unwrap();

    let marks = mark_batch_synced(&store, &[exchanged.clone()]).await.unwrap();
    assert_eq!(marks.rejected, 1);
    assert!(!stored(&store, &exchanged.id).await.synced);
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_once_flags_exchanged_documents() {
    let store = setup().await;
    let task = add_task(&store, "Install windows").await;
    let untouched = add_task(&store, "Paint").await;
    let before = stored(&store, &task.id).await.updated_at;

    let replicator = ScriptedReplicator::new(vec![Script::Emit(vec![
        change(vec![task.clone()]),
        ReplicationEvent::Complete(ReplicationSummary {
            pushed: 1,
            pulled: 0,
        }),
    ])]);
    let coordinator = SyncCoordinator::new(store.clone(), replicator);

    let report = coordinator.sync_once(&endpoint()).await.unwrap();
    assert_eq!(report.batches, 1);
    assert_eq!(report.marked, 1);
    assert_eq!(report.summary.pushed, 1);
    assert_eq!(coordinator.phase(), SyncPhase::Completed);

    let after = stored(&store, &task.id).await;
    assert!(after.synced);
    assert!(after.updated_at > before);
    assert!(!stored(&store, &untouched.id).await.synced);
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_once_surfaces_transport_failure() {
    let store = setup().await;
    let task = add_task(&store, "Roofing").await;

    let replicator = ScriptedReplicator::new(vec![Script::Emit(vec![ReplicationEvent::Error(
        ReplicationError::transient("connection reset"),
    )])]);
    let coordinator = SyncCoordinator::new(store.clone(), replicator);

    let error = coordinator.sync_once(&endpoint()).await.unwrap_err();
    assert!(matches!(error, Error::SyncTransport(_)));
    assert_eq!(coordinator.phase(), SyncPhase::Failed);
    assert!(!stored(&store, &task.id).await.synced);
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_once_does_not_retry_refused_session() {
    let store = setup().await;
    let replicator = ScriptedReplicator::new(vec![Script::Refuse(ReplicationError::transient(
        "offline",
    ))]);
    let started = Arc::clone(&replicator.started);
    let coordinator = SyncCoordinator::new(store, replicator);

    assert!(coordinator.sync_once(&endpoint()).await.is_err());
    assert_eq!(started.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn live_sync_reconnects_after_transient_failure() {
    let store = setup().await;
    let task = add_task(&store, "Pour slab").await;

    let replicator = ScriptedReplicator::new(vec![
        Script::Refuse(ReplicationError::transient("offline")),
        Script::Emit(vec![ReplicationEvent::Error(ReplicationError::transient(
            "connection reset",
        ))]),
        Script::Emit(vec![change(vec![task.clone()])]),
    ]);
    let started = Arc::clone(&replicator.started);
    let coordinator = SyncCoordinator::new(store.clone(), replicator).with_retry_policy(fast_retry());

    let mut live = coordinator.live_sync(endpoint());
    let mut retries = 0;
    loop {
        match live.next_notice().await.unwrap() {
            SyncNotice::Retrying { .. } => retries += 1,
            SyncNotice::BatchSynced { marks, .. } => {
                assert_eq!(marks.marked, 1);
                break;
            }
            SyncNotice::Failed { reason } => panic!("unexpected failure: {reason}"),
        }
    }

    assert_eq!(retries, 2);
    assert_eq!(started.load(Ordering::SeqCst), 3);
    assert!(stored(&store, &task.id).await.synced);

    live.stop().await.unwrap();
    assert_eq!(coordinator.phase(), SyncPhase::Idle);
}

#[tokio::test(flavor = "multi_thread")]
async fn live_sync_stops_on_fatal_failure() {
    let store = setup().await;
    let replicator = ScriptedReplicator::new(vec![Script::Refuse(ReplicationError::fatal(
        "credentials rejected",
    ))]);
    let started = Arc::clone(&replicator.started);
    let coordinator = SyncCoordinator::new(store, replicator).with_retry_policy(fast_retry());

    let mut live = coordinator.live_sync(endpoint());
    assert!(matches!(
        live.next_notice().await,
        Some(SyncNotice::Failed { .. })
    ));

    let error = live.join().await.unwrap_err();
    assert!(matches!(error, Error::SyncTransport(_)));
    assert_eq!(started.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.phase(), SyncPhase::Failed);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelling_live_sync_closes_the_session() {
    let store = setup().await;
    let task = add_task(&store, "Scaffold").await;
    let replicator = ScriptedReplicator::new(vec![Script::Emit(vec![change(vec![task])])]);
    let cancelled = Arc::clone(&replicator.cancelled);
    let coordinator = SyncCoordinator::new(store, replicator).with_retry_policy(fast_retry());

    let mut live = coordinator.live_sync(endpoint());
    assert!(matches!(
        live.next_notice().await,
        Some(SyncNotice::BatchSynced { .. })
    ));
    assert!(!live.is_finished());

    live.stop().await.unwrap();
    // the producer observes cancellation on its own task
    for _ in 0..100 {
        if cancelled.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(cancelled.load(Ordering::SeqCst), 1);
}
