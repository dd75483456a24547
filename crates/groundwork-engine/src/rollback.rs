use std::collections::{BTreeSet, HashMap};

use jiff::Timestamp;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use groundwork_core::ResourceGraph;
use groundwork_state::{
    ApplyAction, ExecutionRecord, Outcome, ResourceStatus, StateSnapshot, StateStore,
};

use crate::config::EngineConfig;
use crate::executor::{invoke_with_retry, Commit};
use crate::error::EngineError;
use crate::plan::ActionKind;
use crate::provider::ProviderRegistry;

/// Reverse this run's committed work for the failed branch: compensating
/// deletes for creates and replacements, reverts for updates, walked in
/// reverse dependency order.
///
/// Best-effort: a failed compensation is recorded and logged but never
/// stops rollback of the remaining resources. Returns the rollback records
/// plus whether every compensation succeeded.
pub(crate) async fn run(
    graph: &ResourceGraph,
    registry: &ProviderRegistry,
    store: &StateStore,
    config: &EngineConfig,
    snapshot: &mut StateSnapshot,
    commits: &HashMap<String, Commit>,
    targets: &BTreeSet<String>,
) -> Result<(Vec<ExecutionRecord>, bool), EngineError> {
    let order: Vec<String> = graph
        .topo_order()
        .into_iter()
        .filter(|id| targets.contains(id))
        .rev()
        .collect();

    tracing::info!(resources = order.len(), "rolling back failed branch");

    let mut records = Vec::with_capacity(order.len());
    let mut clean = true;
    let never = CancellationToken::new();

    for id in order {
        let commit = commits.get(&id).expect("rollback targets were committed");
        let node = graph.node(&id).expect("committed node is in the graph");
        let provider = registry
            .get(&node.resource_type)
            .expect("providers were checked before execution");

        let started_at = Timestamp::now();
        let result = match commit {
            Commit::Created { physical_id } | Commit::Replaced { physical_id } => {
                tracing::info!(resource = %id, physical_id = %physical_id, "rollback: deleting");
                invoke_with_retry(
                    provider,
                    ActionKind::Delete,
                    &id,
                    Some(physical_id),
                    &Value::Null,
                    config.resource_timeout,
                    config.max_attempts,
                    config.retry_base_delay,
                    &never,
                )
                .await
                .map(|_| None)
            }
            Commit::Updated { prior } => {
                tracing::info!(resource = %id, physical_id = %prior.physical_id, "rollback: reverting update");
                invoke_with_retry(
                    provider,
                    ActionKind::Update,
                    &id,
                    Some(&prior.physical_id),
                    &prior.inputs,
                    config.resource_timeout,
                    config.max_attempts,
                    config.retry_base_delay,
                    &never,
                )
                .await
                .map(Some)
            }
        };
        let finished_at = Timestamp::now();

        let record = match result {
            Ok(reverted) => {
                match (commit, reverted) {
                    (Commit::Updated { prior }, output) => {
                        let mut restored = prior.clone();
                        restored.status = ResourceStatus::RolledBack;
                        if let Some(output) = output {
                            restored.attributes = output.attributes;
                        }
                        snapshot.resources.insert(id.clone(), restored);
                    }
                    _ => {
                        snapshot.resources.remove(&id);
                    }
                }
                ExecutionRecord {
                    resource_id: id.clone(),
                    action: ApplyAction::Rollback,
                    outcome: Outcome::RolledBack,
                    physical_id: commit_physical_id(commit),
                    properties: commit_properties(commit),
                    started_at,
                    finished_at,
                }
            }
            Err(cause) => {
                clean = false;
                tracing::error!(resource = %id, error = %cause, "rollback failed");
                ExecutionRecord {
                    resource_id: id.clone(),
                    action: ApplyAction::Rollback,
                    outcome: Outcome::RollbackFailed { cause },
                    physical_id: commit_physical_id(commit),
                    properties: commit_properties(commit),
                    started_at,
                    finished_at,
                }
            }
        };
        store.record(snapshot, &record).await?;
        records.push(record);
    }

    Ok((records, clean))
}

fn commit_physical_id(commit: &Commit) -> Option<String> {
    match commit {
        Commit::Created { physical_id } | Commit::Replaced { physical_id } => {
            Some(physical_id.clone())
        }
        Commit::Updated { prior } => Some(prior.physical_id.clone()),
    }
}

/// For an update revert, the inputs the target was reverted to.
fn commit_properties(commit: &Commit) -> Option<serde_json::Value> {
    match commit {
        Commit::Updated { prior } => Some(prior.inputs.clone()),
        _ => None,
    }
}
