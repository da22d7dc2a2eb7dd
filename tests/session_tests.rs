mod fixtures;

use chrono::{Duration, Utc};
use fixtures::project::TestProject;

use storyloop::config::LoopConfig;
use storyloop::error::LoopError;
use storyloop::session::{ExecutionStatus, Resolution, SessionStore};

#[tokio::test]
async fn test_open_creates_worktree_and_record() {
    let project = TestProject::new();
    let config = LoopConfig::default();
    let manager = project.session_manager(&config);
    manager.init().await.unwrap();

    let session = manager.open("US-001", "build the login page").await.unwrap();

    assert!(session.worktree_path.exists());
    assert_eq!(session.branch, "loop/US-001");
    assert_eq!(session.status, ExecutionStatus::Running);
    assert_eq!(session.resolution, Resolution::Unresolved);
    assert!(project.branch_exists("loop/US-001"));

    // Record survives a fresh manager instance
    let fresh = project.session_manager(&config);
    let loaded = fresh.get(&session.id).await.unwrap();
    assert_eq!(loaded.story_id, "US-001");
    assert_eq!(loaded.instructions, "build the login page");
}

#[tokio::test]
async fn test_open_rejects_second_active_session_for_story() {
    let project = TestProject::new();
    let config = LoopConfig::default();
    let manager = project.session_manager(&config);
    manager.init().await.unwrap();

    manager.open("US-001", "first").await.unwrap();
    assert!(matches!(
        manager.open("US-001", "second").await,
        Err(LoopError::Invariant(_))
    ));
}

#[tokio::test]
async fn test_status_reflects_live_uncommitted_changes() {
    let project = TestProject::new();
    let config = LoopConfig::default();
    let manager = project.session_manager(&config);
    manager.init().await.unwrap();

    let session = manager.open("US-001", "work").await.unwrap();

    let (status, stats) = manager.status(&session.id).await.unwrap();
    assert_eq!(status, ExecutionStatus::Running);
    assert_eq!(stats.files_changed, 0);

    std::fs::write(session.worktree_path.join("a.txt"), "one\ntwo\n").unwrap();
    std::fs::write(session.worktree_path.join("b.txt"), "three\n").unwrap();

    let (_, stats) = manager.status(&session.id).await.unwrap();
    assert_eq!(stats.files_changed, 2);
    assert_eq!(stats.added, 3);
    assert_eq!(stats.removed, 0);
}

#[tokio::test]
async fn test_diff_names_files_with_unified_bodies() {
    let project = TestProject::new();
    let config = LoopConfig::default();
    let manager = project.session_manager(&config);
    manager.init().await.unwrap();

    let session = manager.open("US-001", "work").await.unwrap();
    std::fs::write(session.worktree_path.join("feature.txt"), "hello\n").unwrap();

    let files = manager.diff(&session.id).await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path, "feature.txt");
    assert_eq!(files[0].added, 1);
    assert!(files[0].unified_diff.contains("+hello"));
}

#[tokio::test]
async fn test_transcript_records_summary() {
    let project = TestProject::new();
    let config = LoopConfig::default();
    let manager = project.session_manager(&config);
    manager.init().await.unwrap();

    let session = manager.open("US-001", "do the thing").await.unwrap();
    manager
        .record_summary(&session.id, "implemented and tested")
        .await
        .unwrap();

    let transcript = manager.transcript(&session.id).await.unwrap();
    assert_eq!(transcript.instructions, "do the thing");
    assert_eq!(
        transcript.latest_summary.as_deref(),
        Some("implemented and tested")
    );
}

#[tokio::test]
async fn test_merge_integrates_onto_target() {
    let project = TestProject::new();
    let config = LoopConfig::default();
    let manager = project.session_manager(&config);
    manager.init().await.unwrap();

    let session = manager.open("US-001", "work").await.unwrap();
    std::fs::write(session.worktree_path.join("feature.txt"), "done\n").unwrap();
    manager.mark_completed(&session.id).await.unwrap();

    let outcome = manager
        .resolve(&session.id, Resolution::Merged)
        .await
        .unwrap();

    assert_eq!(outcome.resolution, Resolution::Merged);
    assert_eq!(
        outcome.merge_commit.as_deref(),
        Some(project.head_commit("main").as_str())
    );
    assert_eq!(
        project.file_at("main", "feature.txt").as_deref(),
        Some("done\n")
    );

    // Sandbox and branch are spent after merge
    assert!(!session.worktree_path.exists());
    assert!(!project.branch_exists("loop/US-001"));

    let resolved = manager.get(&session.id).await.unwrap();
    assert_eq!(resolved.resolution, Resolution::Merged);
}

#[tokio::test]
async fn test_merge_on_merged_session_fails_without_target_mutation() {
    let project = TestProject::new();
    let config = LoopConfig::default();
    let manager = project.session_manager(&config);
    manager.init().await.unwrap();

    let session = manager.open("US-001", "work").await.unwrap();
    std::fs::write(session.worktree_path.join("feature.txt"), "done\n").unwrap();
    manager.mark_completed(&session.id).await.unwrap();
    manager
        .resolve(&session.id, Resolution::Merged)
        .await
        .unwrap();

    let head_before = project.head_commit("main");

    assert!(matches!(
        manager.resolve(&session.id, Resolution::Merged).await,
        Err(LoopError::AlreadyResolved { .. })
    ));
    assert_eq!(project.head_commit("main"), head_before);
}

#[tokio::test]
async fn test_discard_is_idempotent() {
    let project = TestProject::new();
    let config = LoopConfig::default();
    let manager = project.session_manager(&config);
    manager.init().await.unwrap();

    let session = manager.open("US-001", "work").await.unwrap();
    std::fs::write(session.worktree_path.join("junk.txt"), "scrap\n").unwrap();
    manager.mark_failed(&session.id).await.unwrap();

    let first = manager
        .resolve(&session.id, Resolution::Discarded)
        .await
        .unwrap();
    assert_eq!(first.resolution, Resolution::Discarded);
    assert!(!session.worktree_path.exists());
    assert!(!project.branch_exists("loop/US-001"));

    // Second discard is a no-op, not an error
    let second = manager
        .resolve(&session.id, Resolution::Discarded)
        .await
        .unwrap();
    assert_eq!(second.resolution, Resolution::Discarded);

    // Target untouched throughout
    assert!(project.file_at("main", "junk.txt").is_none());
}

#[tokio::test]
async fn test_resolve_requires_terminal_status() {
    let project = TestProject::new();
    let config = LoopConfig::default();
    let manager = project.session_manager(&config);
    manager.init().await.unwrap();

    let session = manager.open("US-001", "work").await.unwrap();

    assert!(matches!(
        manager.resolve(&session.id, Resolution::Merged).await,
        Err(LoopError::Invariant(_))
    ));
    assert!(matches!(
        manager.resolve(&session.id, Resolution::Discarded).await,
        Err(LoopError::Invariant(_))
    ));
}

#[tokio::test]
async fn test_conflicting_merge_leaves_target_intact_and_names_paths() {
    let project = TestProject::new();
    let config = LoopConfig::default();
    let manager = project.session_manager(&config);
    manager.init().await.unwrap();

    let session = manager.open("US-001", "work").await.unwrap();

    // Diverge: main and the session both create the same file differently
    project.commit_file("conflict.txt", "main version\n", "main side");
    std::fs::write(
        session.worktree_path.join("conflict.txt"),
        "session version\n",
    )
    .unwrap();
    manager.mark_completed(&session.id).await.unwrap();

    let head_before = project.head_commit("main");

    let err = manager
        .resolve(&session.id, Resolution::Merged)
        .await
        .unwrap_err();
    match err {
        LoopError::MergeConflicts { target, paths } => {
            assert_eq!(target, "main");
            assert_eq!(paths, vec!["conflict.txt".to_string()]);
        }
        other => panic!("expected MergeConflicts, got {other}"),
    }

    // All-or-nothing: the target is byte-identical to its pre-merge state
    assert_eq!(project.head_commit("main"), head_before);
    assert_eq!(
        project.file_at("main", "conflict.txt").as_deref(),
        Some("main version\n")
    );

    // The session stays unresolved for inspection
    let unresolved = manager.get(&session.id).await.unwrap();
    assert_eq!(unresolved.resolution, Resolution::Unresolved);
}

#[tokio::test]
async fn test_kill_is_terminal() {
    let project = TestProject::new();
    let config = LoopConfig::default();
    let manager = project.session_manager(&config);
    manager.init().await.unwrap();

    let session = manager.open("US-001", "work").await.unwrap();
    manager.kill(&session.id).await.unwrap();

    let killed = manager.get(&session.id).await.unwrap();
    assert_eq!(killed.status, ExecutionStatus::Killed);

    assert!(matches!(
        manager.kill(&session.id).await,
        Err(LoopError::Invariant(_))
    ));
}

#[tokio::test]
async fn test_retry_opens_fresh_session_from_prior_work() {
    let project = TestProject::new();
    let config = LoopConfig::default();
    let manager = project.session_manager(&config);
    manager.init().await.unwrap();

    let first = manager.open("US-001", "attempt one").await.unwrap();
    std::fs::write(first.worktree_path.join("progress.txt"), "half done\n").unwrap();
    manager.mark_failed(&first.id).await.unwrap();

    // Opening a retry retires the failed session and carries its work
    // forward on the story branch
    let second = manager.open("US-001", "attempt two").await.unwrap();
    assert_ne!(first.id, second.id);
    assert!(!first.worktree_path.exists());
    assert!(
        second.worktree_path.join("progress.txt").exists(),
        "prior work should carry into the retry worktree"
    );

    let retired = manager.get(&first.id).await.unwrap();
    assert_eq!(retired.resolution, Resolution::Discarded);
}

#[tokio::test]
async fn test_reclaim_expired_session() {
    let project = TestProject::new();
    let config = LoopConfig::default();
    let manager = project.session_manager(&config);
    manager.init().await.unwrap();

    let session = manager.open("US-001", "work").await.unwrap();
    manager.mark_failed(&session.id).await.unwrap();

    // Backdate activity past the TTL
    let store = SessionStore::new(&project.paths().sessions_dir);
    let mut record = store.load(&session.id).await.unwrap();
    record.last_activity_at = Utc::now() - Duration::days(3);
    store.save(&record).await.unwrap();

    let report = manager.reclaim().await.unwrap();
    assert_eq!(report.expired, vec![session.id.clone()]);
    assert!(!session.worktree_path.exists());

    let reclaimed = manager.get(&session.id).await.unwrap();
    assert_eq!(reclaimed.resolution, Resolution::Discarded);
}

#[tokio::test]
async fn test_reclaim_orphaned_session() {
    let project = TestProject::new();
    let config = LoopConfig::default();
    let manager = project.session_manager(&config);
    manager.init().await.unwrap();

    let session = manager.open("US-001", "work").await.unwrap();

    // Fake a dead owner; the session is still "running"
    let store = SessionStore::new(&project.paths().sessions_dir);
    let mut record = store.load(&session.id).await.unwrap();
    // Positive, far above any real pid_max, so the liveness probe sees it dead
    record.owner_pid = 2_000_000_000;
    store.save(&record).await.unwrap();

    let report = manager.reclaim().await.unwrap();
    assert_eq!(report.orphans, vec![session.id.clone()]);

    let reclaimed = manager.get(&session.id).await.unwrap();
    assert_eq!(reclaimed.status, ExecutionStatus::Killed);
    assert_eq!(reclaimed.resolution, Resolution::Discarded);
}

#[tokio::test]
async fn test_reclaim_honors_keep_alive() {
    let project = TestProject::new();
    let mut config = LoopConfig::default();
    config.session.keep_alive = true;
    let manager = project.session_manager(&config);
    manager.init().await.unwrap();

    let session = manager.open("US-001", "work").await.unwrap();
    manager.mark_failed(&session.id).await.unwrap();

    let store = SessionStore::new(&project.paths().sessions_dir);
    let mut record = store.load(&session.id).await.unwrap();
    record.last_activity_at = Utc::now() - Duration::days(3);
    store.save(&record).await.unwrap();

    let report = manager.reclaim().await.unwrap();
    assert!(report.is_empty());
    assert!(session.worktree_path.exists());
}

#[tokio::test]
async fn test_adopt_reuses_live_session() {
    let project = TestProject::new();
    let config = LoopConfig::default();
    let manager = project.session_manager(&config);
    manager.init().await.unwrap();

    let opened = manager.open("US-001", "work").await.unwrap();

    let adopted = manager.adopt_for_story("US-001").await.unwrap().unwrap();
    assert_eq!(adopted.id, opened.id);
    assert_eq!(adopted.owner_pid, std::process::id());

    // Nothing to adopt for an unknown story
    assert!(manager.adopt_for_story("US-999").await.unwrap().is_none());
}
