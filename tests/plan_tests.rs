use storyloop::config::ControllerConfig;
use storyloop::error::LoopError;
use storyloop::plan::{Plan, PlanStore, Story};
use tempfile::TempDir;

fn store_in(dir: &TempDir) -> PlanStore {
    PlanStore::new(
        &dir.path().join("plan.json"),
        &dir.path().join("locks"),
        &ControllerConfig::default(),
    )
}

fn three_story_plan() -> Plan {
    Plan::new("Implement the next story.")
        .with_story(Story::new("A", "first"))
        .with_story(Story::new("B", "second"))
        .with_story(Story::new("C", "third"))
}

#[tokio::test]
async fn test_load_missing_plan_is_not_found() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.init().await.unwrap();

    assert!(matches!(
        store.load().await,
        Err(LoopError::PlanNotFound(_))
    ));
}

#[tokio::test]
async fn test_create_twice_fails() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.init().await.unwrap();

    store.create(&three_story_plan()).await.unwrap();
    assert!(matches!(
        store.create(&three_story_plan()).await,
        Err(LoopError::PlanAlreadyExists(_))
    ));
}

#[tokio::test]
async fn test_claim_follows_authoring_order() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.init().await.unwrap();

    let mut plan = three_story_plan();
    plan.story_mut("C").unwrap().passes = true;
    store.create(&plan).await.unwrap();

    let claimed = store.claim_next_story().await.unwrap().unwrap();
    assert_eq!(claimed.story.id, "A");
    assert!(!claimed.resumed);

    store.complete_story("A", true).await.unwrap();

    let claimed = store.claim_next_story().await.unwrap().unwrap();
    assert_eq!(claimed.story.id, "B");
}

#[tokio::test]
async fn test_claim_resumes_interrupted_story() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.init().await.unwrap();

    // Simulate a crash mid-attempt: B was claimed but never concluded
    let mut plan = three_story_plan();
    plan.story_mut("A").unwrap().passes = true;
    plan.story_mut("B").unwrap().in_progress = true;
    store.create(&plan).await.unwrap();

    let claimed = store.claim_next_story().await.unwrap().unwrap();
    assert_eq!(claimed.story.id, "B");
    assert!(claimed.resumed);

    // Idempotent: the claim changed nothing, still exactly one in progress
    let reloaded = store.load().await.unwrap();
    let in_progress: Vec<_> = reloaded.stories.iter().filter(|s| s.in_progress).collect();
    assert_eq!(in_progress.len(), 1);
    assert_eq!(in_progress[0].id, "B");
}

#[tokio::test]
async fn test_claim_none_when_all_pass() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.init().await.unwrap();

    let mut plan = three_story_plan();
    for id in ["A", "B", "C"] {
        plan.story_mut(id).unwrap().passes = true;
    }
    store.create(&plan).await.unwrap();

    assert!(store.claim_next_story().await.unwrap().is_none());
}

#[tokio::test]
async fn test_complete_clears_in_progress_and_persists() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.init().await.unwrap();
    store.create(&three_story_plan()).await.unwrap();

    store.claim_next_story().await.unwrap();
    store.complete_story("A", true).await.unwrap();

    // A second store instance sees the post-state: durability before ack
    let fresh = store_in(&dir);
    let plan = fresh.load().await.unwrap();
    let a = plan.story("A").unwrap();
    assert!(a.passes);
    assert!(!a.in_progress);
}

#[tokio::test]
async fn test_complete_requires_in_progress() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.init().await.unwrap();
    store.create(&three_story_plan()).await.unwrap();

    assert!(matches!(
        store.complete_story("A", true).await,
        Err(LoopError::Invariant(_))
    ));
}

#[tokio::test]
async fn test_complete_unknown_story() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.init().await.unwrap();
    store.create(&three_story_plan()).await.unwrap();

    assert!(matches!(
        store.complete_story("ZZ", true).await,
        Err(LoopError::StoryNotFound(_))
    ));
}

#[tokio::test]
async fn test_mark_started() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.init().await.unwrap();
    store.create(&three_story_plan()).await.unwrap();

    store.mark_started().await.unwrap();
    assert!(store.load().await.unwrap().started);
}

#[tokio::test]
async fn test_invariants_hold_across_operations() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.init().await.unwrap();
    store.create(&three_story_plan()).await.unwrap();

    for expected in ["A", "B", "C"] {
        let claimed = store.claim_next_story().await.unwrap().unwrap();
        assert_eq!(claimed.story.id, expected);

        let plan = store.load().await.unwrap();
        assert!(plan.stories.iter().filter(|s| s.in_progress).count() <= 1);
        assert!(!plan.stories.iter().any(|s| s.in_progress && s.passes));

        store.complete_story(expected, true).await.unwrap();
    }

    assert!(store.claim_next_story().await.unwrap().is_none());
}

#[tokio::test]
async fn test_corrupt_plan_with_two_in_progress_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.init().await.unwrap();

    let doc = r#"{
        "started": true,
        "iterationPrompt": "p",
        "stories": [
            {"id": "A", "title": "a", "passes": false, "inProgress": true, "checkpoint": false},
            {"id": "B", "title": "b", "passes": false, "inProgress": true, "checkpoint": false}
        ]
    }"#;
    std::fs::write(dir.path().join("plan.json"), doc).unwrap();

    assert!(matches!(store.load().await, Err(LoopError::Invariant(_))));
}

#[tokio::test]
async fn test_unknown_fields_survive_atomic_updates() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.init().await.unwrap();

    let doc = r#"{
        "started": false,
        "iterationPrompt": "p",
        "boardUrl": "https://kanban.example/p1",
        "stories": [
            {"id": "A", "title": "a", "passes": false, "inProgress": false,
             "checkpoint": false, "assignee": "sam"}
        ]
    }"#;
    std::fs::write(dir.path().join("plan.json"), doc).unwrap();

    store.claim_next_story().await.unwrap();
    store.complete_story("A", true).await.unwrap();

    let raw = std::fs::read_to_string(dir.path().join("plan.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["boardUrl"], "https://kanban.example/p1");
    assert_eq!(value["stories"][0]["assignee"], "sam");
    assert_eq!(value["stories"][0]["passes"], true);
}
