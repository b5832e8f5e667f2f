use super::*;
use crate::application::events::{EventKind, HistoryFilter};
use crate::domain::FileStatus;
use crate::infra::adapter::memory::{AdapterVerb, MemoryAdapter, RecordedCall};

const ORIGINAL: &str = "one\ntwo\nthree\nfour\nfive\nsix\nseven\n";
const MODIFIED: &str = "one\nTWO\nthree\nfour\nFIVE\nsix\nSEVEN\n";

fn setup() -> (SnapshotStateManager, Arc<MemoryAdapter>, SnapshotEventBus) {
    let adapter = Arc::new(MemoryAdapter::new());
    let bus = SnapshotEventBus::new(1000);
    let locks = Arc::new(FileLockCoordinator::new(bus.clone(), None));
    let manager = SnapshotStateManager::new(adapter.clone(), bus.clone(), locks, DiffOptions::default());
    (manager, adapter, bus)
}

fn count(bus: &SnapshotEventBus, kind: EventKind) -> usize {
    bus.history(&HistoryFilter {
        kind: Some(kind),
        session_id: None,
    })
    .len()
}

async fn loaded(manager: &SnapshotStateManager, adapter: &MemoryAdapter, session_id: &str) -> SnapshotFile {
    adapter.put_file(session_id, "a.ts", ORIGINAL, MODIFIED);
    manager.refresh_session_state(session_id).await.unwrap();
    manager.refresh_file_state(session_id, "a.ts").await.unwrap()
}

#[tokio::test]
async fn test_block_decisions_roll_up_to_session() {
    let (manager, adapter, bus) = setup();
    let file = loaded(&manager, &adapter, "s1").await;
    assert_eq!(file.blocks.len(), 3);
    assert_eq!(file.status, FileStatus::Pending);
    assert_eq!(manager.session("s1").unwrap().status, SessionStatus::Pending);

    for id in [0, 1] {
        let outcome = manager
            .handle_user_block_action("s1", "a.ts", id, Decision::Accept)
            .await
            .unwrap();
        assert!(outcome.persisted);
    }
    let session = manager.session("s1").unwrap();
    assert_eq!(manager.file("s1", "a.ts").unwrap().status, FileStatus::Partial);
    assert_eq!(session.status, SessionStatus::Partial);
    assert_eq!(
        (session.total_blocks, session.accepted_blocks, session.pending_blocks),
        (3, 2, 1)
    );
    assert_eq!(count(&bus, EventKind::SessionCompleted), 0);

    manager
        .handle_user_block_action("s1", "a.ts", 2, Decision::Accept)
        .await
        .unwrap();
    assert_eq!(manager.file("s1", "a.ts").unwrap().status, FileStatus::Accepted);
    assert_eq!(manager.session("s1").unwrap().status, SessionStatus::Completed);
    assert_eq!(count(&bus, EventKind::SessionCompleted), 1);
    assert_eq!(count(&bus, EventKind::UserAcceptBlock), 3);
    assert_eq!(count(&bus, EventKind::BlockStateChanged), 3);
}

#[tokio::test]
async fn test_resolved_block_is_not_changed_again() {
    let (manager, adapter, _bus) = setup();
    loaded(&manager, &adapter, "s1").await;
    manager
        .handle_user_block_action("s1", "a.ts", 0, Decision::Accept)
        .await
        .unwrap();

    let err = manager
        .handle_user_block_action("s1", "a.ts", 0, Decision::Reject)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SnapshotError::BlockAlreadyResolved {
            status: BlockStatus::Accepted,
            ..
        }
    ));
    assert_eq!(
        manager.file("s1", "a.ts").unwrap().blocks[0].status,
        BlockStatus::Accepted
    );

    assert!(matches!(
        manager
            .handle_user_block_action("s1", "a.ts", 99, Decision::Accept)
            .await,
        Err(SnapshotError::BlockNotFound { block_id: 99, .. })
    ));
    assert!(matches!(
        manager
            .handle_user_block_action("s1", "missing.ts", 0, Decision::Accept)
            .await,
        Err(SnapshotError::FileNotFound { .. })
    ));
}

#[tokio::test]
async fn test_failed_block_write_keeps_local_decision() {
    let (manager, adapter, bus) = setup();
    loaded(&manager, &adapter, "s1").await;
    adapter.fail(AdapterVerb::BlockDecision);

    let outcome = manager
        .handle_user_block_action("s1", "a.ts", 1, Decision::Reject)
        .await
        .unwrap();
    assert!(!outcome.persisted);
    assert_eq!(outcome.status, BlockStatus::Rejected);
    assert_eq!(
        manager.file("s1", "a.ts").unwrap().blocks[1].status,
        BlockStatus::Rejected
    );
    assert_eq!(count(&bus, EventKind::UserRejectBlock), 1);

    let drift = manager.unpersisted_blocks(Some("s1"));
    assert_eq!(drift.len(), 1);
    assert_eq!(drift[0].block_id, 1);
    assert!(manager.unpersisted_blocks(Some("s2")).is_empty());

    assert_eq!(manager.retry_block_persistence("s1").await.len(), 1);
    assert_eq!(manager.unpersisted_blocks(None).len(), 1);

    adapter.recover(AdapterVerb::BlockDecision);
    assert!(manager.retry_block_persistence("s1").await.is_empty());
    assert!(manager.unpersisted_blocks(None).is_empty());
    assert_eq!(
        adapter.calls(),
        vec![RecordedCall::Block {
            session_id: "s1".into(),
            file_path: "a.ts".into(),
            block_id: 1,
            decision: Decision::Reject,
        }]
    );
}

#[tokio::test]
async fn test_failed_file_write_changes_nothing() {
    let (manager, adapter, bus) = setup();
    loaded(&manager, &adapter, "s1").await;
    adapter.fail(AdapterVerb::FileDecision);

    let err = manager
        .handle_user_file_action("s1", "a.ts", Decision::Reject)
        .await
        .unwrap_err();
    assert!(matches!(err, SnapshotError::Adapter(_)));

    let file = manager.file("s1", "a.ts").unwrap();
    assert_eq!(file.status, FileStatus::Pending);
    assert!(file.blocks.iter().all(|b| b.status == BlockStatus::Pending));
    assert_eq!(count(&bus, EventKind::UserRejectFile), 0);
}

#[tokio::test]
async fn test_reject_file_resolves_pending_blocks() {
    let (manager, adapter, bus) = setup();
    loaded(&manager, &adapter, "s1").await;

    let file = manager
        .handle_user_file_action("s1", "./a.ts", Decision::Reject)
        .await
        .unwrap();
    assert_eq!(file.status, FileStatus::Rejected);
    assert!(file.blocks.iter().all(|b| b.status == BlockStatus::Rejected));

    let session = manager.session("s1").unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.rejected_blocks, 3);
    assert_eq!(count(&bus, EventKind::UserRejectFile), 1);
    assert_eq!(count(&bus, EventKind::SessionCompleted), 1);
}

#[tokio::test]
async fn test_file_decision_keeps_earlier_block_decisions() {
    let (manager, adapter, _bus) = setup();
    loaded(&manager, &adapter, "s1").await;
    manager
        .handle_user_block_action("s1", "a.ts", 0, Decision::Reject)
        .await
        .unwrap();

    let file = manager
        .handle_user_file_action("s1", "a.ts", Decision::Accept)
        .await
        .unwrap();
    let statuses: Vec<_> = file.blocks.iter().map(|b| b.status).collect();
    assert_eq!(
        statuses,
        vec![BlockStatus::Rejected, BlockStatus::Accepted, BlockStatus::Accepted]
    );
    assert_eq!(file.status, FileStatus::Partial);
}

#[tokio::test]
async fn test_file_decision_requires_tracked_file() {
    let (manager, adapter, _bus) = setup();
    adapter.put_file("s1", "a.ts", ORIGINAL, MODIFIED);

    let err = manager
        .handle_user_file_action("s1", "a.ts", Decision::Accept)
        .await
        .unwrap_err();
    assert!(matches!(err, SnapshotError::FileNotFound { .. }));
    assert!(adapter.calls().is_empty());
}

#[tokio::test]
async fn test_session_decision_settles_every_file() {
    let (manager, adapter, bus) = setup();
    adapter.put_file("s1", "b.ts", "x\n", "y\n");
    loaded(&manager, &adapter, "s1").await;
    assert!(!manager.file("s1", "b.ts").unwrap().loaded);

    let session = manager
        .handle_user_session_action("s1", Decision::Accept)
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.accepted_blocks, 3);

    for file in manager.session_files("s1") {
        assert_eq!(file.status, FileStatus::Accepted, "{}", file.file_path);
    }
    assert_eq!(count(&bus, EventKind::UserAcceptSession), 1);
    assert_eq!(count(&bus, EventKind::SessionCompleted), 1);
}

#[tokio::test]
async fn test_session_decision_on_unknown_session() {
    let (manager, adapter, _bus) = setup();
    let err = manager
        .handle_user_session_action("ghost", Decision::Reject)
        .await
        .unwrap_err();
    assert!(matches!(err, SnapshotError::SessionNotFound(_)));
    assert!(adapter.calls().is_empty());
}

#[tokio::test]
async fn test_failed_session_write_changes_nothing() {
    let (manager, adapter, bus) = setup();
    adapter.put_file("s1", "b.ts", "x\n", "y\n");
    loaded(&manager, &adapter, "s1").await;
    let session_before = manager.session("s1").unwrap();
    let files_before = manager.session_files("s1");
    adapter.fail(AdapterVerb::SessionDecision);

    let err = manager
        .handle_user_session_action("s1", Decision::Accept)
        .await
        .unwrap_err();
    assert!(matches!(err, SnapshotError::Adapter(_)));

    assert_eq!(manager.session("s1").unwrap(), session_before);
    assert_eq!(manager.session_files("s1"), files_before);
    let file = manager.file("s1", "a.ts").unwrap();
    assert_eq!(file.status, FileStatus::Pending);
    assert!(file.blocks.iter().all(|b| b.status == BlockStatus::Pending));
    assert_eq!(count(&bus, EventKind::UserAcceptSession), 0);
    assert_eq!(count(&bus, EventKind::SessionCompleted), 0);
}

#[tokio::test]
async fn test_file_decision_updates_session_when_stats_are_unavailable() {
    let (manager, adapter, bus) = setup();
    loaded(&manager, &adapter, "s1").await;
    adapter.fail(AdapterVerb::SessionStats);

    manager
        .handle_user_file_action("s1", "a.ts", Decision::Accept)
        .await
        .unwrap();
    let session = manager.session("s1").unwrap();
    assert_eq!((session.pending_blocks, session.accepted_blocks), (0, 3));
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(count(&bus, EventKind::SessionCompleted), 1);
}

#[tokio::test]
async fn test_decided_session_reopens_when_new_changes_arrive() {
    let (manager, adapter, _bus) = setup();
    loaded(&manager, &adapter, "s1").await;
    manager
        .handle_user_session_action("s1", Decision::Accept)
        .await
        .unwrap();
    assert_eq!(manager.session("s1").unwrap().status, SessionStatus::Completed);

    adapter.put_file("s1", "b.ts", "x\n", "y\n");
    manager.refresh_session_state("s1").await.unwrap();
    manager.refresh_file_state("s1", "b.ts").await.unwrap();

    let session = manager.session("s1").unwrap();
    assert_eq!(session.pending_blocks, 1);
    assert_eq!(session.total_blocks, 4);
    assert_eq!(session.status, SessionStatus::Partial);

    manager
        .handle_user_block_action("s1", "b.ts", 0, Decision::Accept)
        .await
        .unwrap();
    assert_eq!(manager.session("s1").unwrap().status, SessionStatus::Completed);
}

#[tokio::test]
async fn test_same_path_in_two_sessions_is_independent() {
    let (manager, adapter, _bus) = setup();
    loaded(&manager, &adapter, "s1").await;
    loaded(&manager, &adapter, "s2").await;

    manager
        .handle_user_block_action("s1", "a.ts", 0, Decision::Accept)
        .await
        .unwrap();
    assert_eq!(
        manager.file("s2", "a.ts").unwrap().blocks[0].status,
        BlockStatus::Pending
    );
    assert_eq!(manager.session("s2").unwrap().pending_blocks, 3);
    assert_eq!(manager.sessions().len(), 2);
}

#[tokio::test]
async fn test_file_refresh_carries_over_matching_blocks() {
    let (manager, adapter, _bus) = setup();
    loaded(&manager, &adapter, "s1").await;
    manager
        .handle_user_block_action("s1", "a.ts", 1, Decision::Accept)
        .await
        .unwrap();

    let file = manager.refresh_file_state("s1", "a.ts").await.unwrap();
    assert_eq!(file.blocks[1].status, BlockStatus::Accepted);

    adapter.put_file("s1", "a.ts", ORIGINAL, MODIFIED.replace("TWO", "DOS"));
    let file = manager.refresh_file_state("s1", "a.ts").await.unwrap();
    let statuses: Vec<_> = file.blocks.iter().map(|b| b.status).collect();
    assert_eq!(
        statuses,
        vec![BlockStatus::Pending, BlockStatus::Accepted, BlockStatus::Pending]
    );
}

#[tokio::test]
async fn test_session_refresh_resets_contents_but_keeps_review_state() {
    let (manager, adapter, _bus) = setup();
    loaded(&manager, &adapter, "s1").await;
    manager
        .handle_user_block_action("s1", "a.ts", 0, Decision::Accept)
        .await
        .unwrap();

    let session = manager.refresh_session_state("s1").await.unwrap();
    assert_eq!(session.accepted_blocks, 1);
    assert_eq!(session.stats.unwrap().total_files, 1);

    let file = manager.file("s1", "a.ts").unwrap();
    assert!(!file.loaded);
    assert!(file.modified_content.is_empty());
    assert_eq!(file.blocks[0].status, BlockStatus::Accepted);
}

#[tokio::test]
async fn test_read_failures_return_last_known_state() {
    let (manager, adapter, _bus) = setup();
    assert!(manager.refresh_session_state("unknown").await.is_none());

    let file = loaded(&manager, &adapter, "s1").await;
    let before = manager.session("s1").unwrap();

    adapter.fail(AdapterVerb::SessionStats);
    assert_eq!(manager.refresh_session_state("s1").await, Some(before));
    adapter.recover(AdapterVerb::SessionStats);

    adapter.fail(AdapterVerb::SessionFiles);
    let session = manager.refresh_session_state("s1").await.unwrap();
    assert_eq!(session.files, vec!["a.ts".to_string()]);
    adapter.recover(AdapterVerb::SessionFiles);

    manager.refresh_file_state("s1", "a.ts").await.unwrap();
    adapter.fail(AdapterVerb::OperationDiff);
    let cached = manager.refresh_file_state("s1", "a.ts").await.unwrap();
    assert_eq!(cached.blocks, file.blocks);
    assert!(cached.loaded);
}

#[tokio::test]
async fn test_track_file_modification_creates_session_once() {
    let (manager, _adapter, bus) = setup();
    manager.track_file_modification("s1", "./src/a.rs", "Write");
    let session = manager.track_file_modification("s1", "src/a.rs", "Edit");

    assert_eq!(session.files, vec!["src/a.rs".to_string()]);
    assert_eq!(session.status, SessionStatus::Working);
    assert!(manager.file("s1", "src/a.rs").is_some());
    assert_eq!(count(&bus, EventKind::SessionCreated), 1);
    assert_eq!(count(&bus, EventKind::FileModified), 2);
}

#[tokio::test]
async fn test_file_operations_hand_over_locks() {
    let (manager, _adapter, bus) = setup();
    assert!(
        manager
            .begin_file_operation("s1", "a.ts", "write", "Write")
            .is_granted()
    );
    let outcome = manager.begin_file_operation("s2", "a.ts", "edit", "Edit");
    assert!(matches!(outcome, LockOutcome::Queued { position: 0, .. }));
    assert!(manager.file("s2", "a.ts").is_none());

    let release = manager.complete_file_operation("s1", "a.ts").unwrap();
    assert_eq!(release.granted.unwrap().session_id, "s2");
    assert_eq!(count(&bus, EventKind::FileOperationCompleted), 1);
    assert_eq!(count(&bus, EventKind::ConflictResolved), 1);

    assert!(matches!(
        manager.complete_file_operation("s2", "b.ts"),
        Err(LockError::NotLocked(_))
    ));
}

#[tokio::test]
async fn test_rejecting_file_releases_its_lock() {
    let (manager, adapter, _bus) = setup();
    manager.begin_file_operation("s1", "a.ts", "write", "Write");
    loaded(&manager, &adapter, "s1").await;

    manager
        .handle_user_file_action("s1", "a.ts", Decision::Reject)
        .await
        .unwrap();
    assert!(manager.locks().holder("a.ts").is_none());
}

#[tokio::test]
async fn test_clear_session() {
    let (manager, _adapter, _bus) = setup();
    manager.begin_file_operation("s1", "a.ts", "write", "Write");
    assert!(manager.clear_session("s1"));
    assert!(manager.session("s1").is_none());
    assert!(manager.file("s1", "a.ts").is_none());
    assert!(manager.locks().holder("a.ts").is_none());
    assert!(!manager.clear_session("s1"));
}

#[tokio::test]
async fn test_rollback_reloads_session() {
    let (manager, adapter, _bus) = setup();
    loaded(&manager, &adapter, "s1").await;
    adapter.put_file("s1", "b.ts", "x\n", "y\n");

    let session = manager
        .on_rollback_completed("s1", 2, vec!["b.ts".into()])
        .await
        .unwrap();
    assert_eq!(session.files, vec!["a.ts".to_string(), "b.ts".to_string()]);
}
