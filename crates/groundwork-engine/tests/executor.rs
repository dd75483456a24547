mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use groundwork_core::Document;
use groundwork_engine::{ApplyOutcome, EngineConfig, ProviderRegistry};
use groundwork_state::{Outcome, StateStore};

use support::{Event, FailPlan, ScriptedProvider};

fn doc(text: &str) -> Document {
    Document::from_str(text).unwrap()
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        retry_base_delay: Duration::from_millis(5),
        resource_timeout: Duration::from_secs(5),
        ..EngineConfig::default()
    }
}

type Events = Arc<Mutex<Vec<Event>>>;

fn registry(events: &Events) -> ProviderRegistry {
    registry_from(ScriptedProvider::new("cell", events.clone()))
}

fn registry_from(provider: ScriptedProvider) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(provider));
    registry
}

const FAN: &str = r#"
name: s
resources:
  base: { type: cell }
  left:
    type: cell
    properties:
      parent: { "$ref": "base.id" }
  right:
    type: cell
    depends_on: [base]
outputs:
  base_id: { "$ref": "base" }
"#;

#[tokio::test]
async fn dependencies_complete_before_dependents_start() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let events: Events = Arc::default();

    let report = groundwork_engine::apply(
        &doc(FAN),
        &registry(&events),
        &store,
        &fast_config(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.outcome, ApplyOutcome::Applied);
    let events = events.lock().unwrap();
    assert_eq!(events[0], Event::Create("base".to_string()));
    assert_eq!(events.len(), 3);
    assert!(events.contains(&Event::Create("left".to_string())));
    assert!(events.contains(&Event::Create("right".to_string())));
}

#[tokio::test]
async fn outputs_resolve_from_fresh_attributes() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let events: Events = Arc::default();

    let report = groundwork_engine::apply(
        &doc(FAN),
        &registry(&events),
        &store,
        &fast_config(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let base_id = report.outputs["base_id"].as_str().unwrap();
    assert!(base_id.starts_with("cell-base-"), "got {base_id}");
}

#[tokio::test]
async fn reference_inputs_carry_dependency_attributes() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let events: Events = Arc::default();

    groundwork_engine::apply(
        &doc(FAN),
        &registry(&events),
        &store,
        &fast_config(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let snapshot = store.load("s").await.unwrap();
    let base_physical = &snapshot.resources["base"].physical_id;
    assert_eq!(
        snapshot.resources["left"].inputs["parent"],
        json!(base_physical)
    );

    // The execution log captures what was sent to the target.
    let history = store.history("s").await.unwrap();
    let left = history.iter().find(|r| r.resource_id == "left").unwrap();
    assert_eq!(left.properties, Some(json!({ "parent": base_physical })));
}

#[tokio::test]
async fn second_apply_makes_no_provider_calls() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let events: Events = Arc::default();
    let registry = registry(&events);
    let document = doc(FAN);
    let config = fast_config();

    groundwork_engine::apply(&document, &registry, &store, &config, CancellationToken::new())
        .await
        .unwrap();
    let calls_after_first = events.lock().unwrap().len();

    let report =
        groundwork_engine::apply(&document, &registry, &store, &config, CancellationToken::new())
            .await
            .unwrap();

    assert_eq!(report.outcome, ApplyOutcome::Applied);
    assert!(report.records.is_empty());
    assert_eq!(events.lock().unwrap().len(), calls_after_first);
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let events: Events = Arc::default();
    let registry = registry_from(
        ScriptedProvider::new("cell", events.clone())
            .fail_create("base", FailPlan::Transient(2)),
    );

    let report = groundwork_engine::apply(
        &doc("name: s\nresources:\n  base: { type: cell }\n"),
        &registry,
        &store,
        &fast_config(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.outcome, ApplyOutcome::Applied);
    let attempts = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| **e == Event::Create("base".to_string()))
        .count();
    assert_eq!(attempts, 3);
}

#[tokio::test]
async fn exhausted_retries_fail_the_action() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let events: Events = Arc::default();
    let registry = registry_from(
        ScriptedProvider::new("cell", events.clone())
            .fail_create("base", FailPlan::Transient(10)),
    );
    let config = EngineConfig {
        max_attempts: 2,
        ..fast_config()
    };

    let report = groundwork_engine::apply(
        &doc("name: s\nresources:\n  base: { type: cell }\n"),
        &registry,
        &store,
        &config,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.outcome, ApplyOutcome::RolledBack);
    match &report.records[0].outcome {
        Outcome::Failed { cause } => assert!(cause.contains("retries exhausted"), "got {cause}"),
        other => panic!("expected a failure record, got {other:?}"),
    }
}

#[tokio::test]
async fn actions_that_never_settle_time_out() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let events: Events = Arc::default();
    let registry = registry_from(
        ScriptedProvider::new("cell", events.clone()).fail_create("base", FailPlan::Hang),
    );
    let config = EngineConfig {
        resource_timeout: Duration::from_millis(50),
        ..fast_config()
    };

    let report = groundwork_engine::apply(
        &doc("name: s\nresources:\n  base: { type: cell }\n"),
        &registry,
        &store,
        &config,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    match &report.records[0].outcome {
        Outcome::Failed { cause } => assert!(cause.contains("timed out"), "got {cause}"),
        other => panic!("expected a failure record, got {other:?}"),
    }
}

#[tokio::test]
async fn cancelled_apply_skips_all_pending_work() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let events: Events = Arc::default();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = groundwork_engine::apply(
        &doc(FAN),
        &registry(&events),
        &store,
        &fast_config(),
        cancel,
    )
    .await
    .unwrap();

    assert_eq!(report.outcome, ApplyOutcome::Cancelled);
    assert_eq!(report.records.len(), 3);
    assert!(report.records.iter().all(|r| r.outcome == Outcome::Skipped));
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn dependents_of_a_failed_action_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let events: Events = Arc::default();
    let registry = registry_from(
        ScriptedProvider::new("cell", events.clone()).fail_create("base", FailPlan::Fatal),
    );

    let report = groundwork_engine::apply(
        &doc(FAN),
        &registry,
        &store,
        &fast_config(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let left = report
        .records
        .iter()
        .find(|r| r.resource_id == "left")
        .unwrap();
    assert_eq!(left.outcome, Outcome::Skipped);
    let events = events.lock().unwrap();
    assert!(!events.contains(&Event::Create("left".to_string())));
    assert!(!events.contains(&Event::Create("right".to_string())));
}

#[tokio::test]
async fn cancelled_destroy_leaves_recorded_state_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let events: Events = Arc::default();
    let registry = registry(&events);
    let document = doc("name: s\nresources:\n  base: { type: cell }\n");
    let config = fast_config();

    groundwork_engine::apply(&document, &registry, &store, &config, CancellationToken::new())
        .await
        .unwrap();
    events.lock().unwrap().clear();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = groundwork_engine::destroy(&document, &registry, &store, &config, cancel)
        .await
        .unwrap();

    assert_eq!(report.outcome, ApplyOutcome::Cancelled);
    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].outcome, Outcome::Skipped);
    assert!(events.lock().unwrap().is_empty());

    let snapshot = store.load("s").await.unwrap();
    assert!(snapshot.resources.contains_key("base"));
}

#[tokio::test]
async fn unresolvable_reference_fails_and_skips_dependents() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let events: Events = Arc::default();

    let report = groundwork_engine::apply(
        &doc(
            r#"
name: s
resources:
  base: { type: cell }
  mid:
    type: cell
    properties:
      peer: { "$ref": "base.no_such_attr" }
  tail:
    type: cell
    depends_on: [mid]
"#,
        ),
        &registry(&events),
        &store,
        &fast_config(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.outcome, ApplyOutcome::RolledBack);
    let mid = report
        .records
        .iter()
        .find(|r| r.resource_id == "mid")
        .unwrap();
    match &mid.outcome {
        Outcome::Failed { cause } => assert!(cause.contains("no_such_attr"), "got {cause}"),
        other => panic!("expected a failure record, got {other:?}"),
    }
    let tail = report
        .records
        .iter()
        .find(|r| r.resource_id == "tail")
        .unwrap();
    assert_eq!(tail.outcome, Outcome::Skipped);

    // The failure made it into the durable log, like any other failure.
    let history = store.history("s").await.unwrap();
    assert!(history
        .iter()
        .any(|r| r.resource_id == "mid" && matches!(r.outcome, Outcome::Failed { .. })));
}

#[tokio::test]
async fn replacement_retries_do_not_repeat_the_delete() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let events: Events = Arc::default();
    let config = fast_config();

    let first = registry_from(
        ScriptedProvider::new("cell", events.clone()).with_replace_on_change(vec!["size"]),
    );
    let v1 = doc("name: s\nresources:\n  base:\n    type: cell\n    properties:\n      size: small\n");
    groundwork_engine::apply(&v1, &first, &store, &config, CancellationToken::new())
        .await
        .unwrap();
    events.lock().unwrap().clear();

    let second = registry_from(
        ScriptedProvider::new("cell", events.clone())
            .with_replace_on_change(vec!["size"])
            .fail_create("base", FailPlan::Transient(1)),
    );
    let v2 = doc("name: s\nresources:\n  base:\n    type: cell\n    properties:\n      size: large\n");
    let report = groundwork_engine::apply(&v2, &second, &store, &config, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, ApplyOutcome::Applied);
    // One delete of the old incarnation, then the create retried alone.
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            Event::Delete("base".to_string()),
            Event::Create("base".to_string()),
            Event::Create("base".to_string()),
        ]
    );
}

#[tokio::test]
async fn destroy_deletes_everything_dependents_first() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let events: Events = Arc::default();
    let registry = registry(&events);
    let document = doc(FAN);
    let config = fast_config();

    groundwork_engine::apply(&document, &registry, &store, &config, CancellationToken::new())
        .await
        .unwrap();
    events.lock().unwrap().clear();

    let report =
        groundwork_engine::destroy(&document, &registry, &store, &config, CancellationToken::new())
            .await
            .unwrap();

    assert_eq!(report.outcome, ApplyOutcome::Applied);
    let deletes = events.lock().unwrap().clone();
    assert_eq!(deletes.len(), 3);
    assert_eq!(deletes[2], Event::Delete("base".to_string()));
    assert!(deletes[0] != Event::Delete("base".to_string()));

    let snapshot = store.load("s").await.unwrap();
    assert!(snapshot.resources.is_empty());
}

#[test]
fn backoff_doubles_until_attempts_run_out() {
    let mut backoff = groundwork_engine::retry::Backoff::new(Duration::from_millis(100), 4);
    assert_eq!(backoff.next(), Some(Duration::from_millis(100)));
    assert_eq!(backoff.next(), Some(Duration::from_millis(200)));
    assert_eq!(backoff.next(), Some(Duration::from_millis(400)));
    assert_eq!(backoff.next(), None);

    let mut single = groundwork_engine::retry::Backoff::new(Duration::from_millis(100), 1);
    assert_eq!(single.next(), None);
}
