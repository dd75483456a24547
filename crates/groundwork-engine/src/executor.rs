use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use jiff::Timestamp;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use groundwork_core::{resolve_properties, AttrSource, PropValue, ResourceGraph};
use groundwork_state::{
    ApplyAction, ExecutionRecord, Outcome, ResourceState, ResourceStatus, StateSnapshot, StateStore,
};

use crate::config::{EngineConfig, RollbackPolicy};
use crate::error::EngineError;
use crate::plan::{ActionKind, Plan, PlanAction};
use crate::provider::{Provider, ProviderOutput, ProviderRegistry};
use crate::report::{ApplyOutcome, ApplyReport};
use crate::retry::Backoff;
use crate::rollback;

/// A resource whose physical id and attributes are known in this run,
/// either carried over from the snapshot (no-op) or just created/updated.
#[derive(Debug, Clone)]
pub(crate) struct Resolved {
    pub physical_id: String,
    pub attributes: Value,
}

/// Reference lookups for the resources resolved so far.
pub(crate) struct ResolvedSet(pub HashMap<String, Resolved>);

impl AttrSource for ResolvedSet {
    fn physical_id(&self, node: &str) -> Option<String> {
        self.0.get(node).map(|r| r.physical_id.clone())
    }

    fn attribute(&self, node: &str, attr: &str) -> Option<Value> {
        self.0.get(node).and_then(|r| r.attributes.get(attr)).cloned()
    }
}

/// What an action committed, kept for the rollback decision.
#[derive(Debug, Clone)]
pub(crate) enum Commit {
    Created { physical_id: String },
    Updated { prior: ResourceState },
    /// The prior incarnation is gone; rollback can only delete the new one.
    Replaced { physical_id: String },
}

struct SpawnedMeta {
    kind: ActionKind,
    resource_type: String,
    desired: Value,
    inputs: Value,
    depends_on: Vec<String>,
}

struct TaskDone {
    resource_id: String,
    started_at: Timestamp,
    finished_at: Timestamp,
    result: Result<ProviderOutput, String>,
}

/// Walks a plan: creates/updates in parallel as dependencies are satisfied,
/// then deletes in plan order, then the rollback decision on failure.
pub struct Executor<'a> {
    graph: &'a ResourceGraph,
    registry: &'a ProviderRegistry,
    store: &'a StateStore,
    config: &'a EngineConfig,
}

impl<'a> Executor<'a> {
    pub fn new(
        graph: &'a ResourceGraph,
        registry: &'a ProviderRegistry,
        store: &'a StateStore,
        config: &'a EngineConfig,
    ) -> Self {
        Executor {
            graph,
            registry,
            store,
            config,
        }
    }

    pub async fn apply(
        &self,
        outputs: &BTreeMap<String, PropValue>,
        plan: Plan,
        mut snapshot: StateSnapshot,
        cancel: CancellationToken,
    ) -> Result<ApplyReport, EngineError> {
        // Every action must have a provider before any side effect happens.
        for action in &plan.actions {
            self.registry
                .require(&action.resource_id, &action.resource_type)?;
        }

        let mut resolved = ResolvedSet(HashMap::new());
        let mut records: Vec<ExecutionRecord> = Vec::new();
        let mut commits: HashMap<String, Commit> = HashMap::new();
        let mut failed: BTreeSet<String> = BTreeSet::new();
        let mut skipped: BTreeSet<String> = BTreeSet::new();

        // No-op resources resolve from their recorded state.
        for action in &plan.actions {
            if action.kind == ActionKind::NoOp {
                let rs = snapshot
                    .resources
                    .get(&action.resource_id)
                    .expect("no-op action implies a recorded resource");
                resolved.0.insert(
                    action.resource_id.clone(),
                    Resolved {
                        physical_id: rs.physical_id.clone(),
                        attributes: rs.attributes.clone(),
                    },
                );
            }
        }

        let mut pending: BTreeMap<String, PlanAction> = plan
            .actions
            .iter()
            .filter(|a| {
                matches!(
                    a.kind,
                    ActionKind::Create | ActionKind::Update | ActionKind::Replace
                )
            })
            .map(|a| (a.resource_id.clone(), a.clone()))
            .collect();
        let deletes: Vec<PlanAction> = plan
            .actions
            .iter()
            .filter(|a| a.kind == ActionKind::Delete)
            .cloned()
            .collect();

        let mut tasks: JoinSet<TaskDone> = JoinSet::new();
        let mut spawned: HashMap<String, SpawnedMeta> = HashMap::new();

        loop {
            self.skip_blocked(&mut pending, &failed, &mut skipped, &mut records);

            if cancel.is_cancelled() {
                for (id, action) in std::mem::take(&mut pending) {
                    skipped.insert(id.clone());
                    records.push(skip_record(&id, apply_action(action.kind)));
                    tracing::info!(resource = %id, "skipped (cancelled)");
                }
            } else {
                let ready: Vec<String> = pending
                    .iter()
                    .filter(|(_, a)| a.depends_on.iter().all(|d| resolved.0.contains_key(d)))
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in ready {
                    let action = pending.remove(&id).expect("ready action is pending");
                    if let Some(record) = self.spawn_action(
                        action,
                        &resolved,
                        &snapshot,
                        &mut tasks,
                        &mut spawned,
                        &mut failed,
                        &cancel,
                    ) {
                        self.store.record(&snapshot, &record).await?;
                        records.push(record);
                    }
                }
            }

            let Some(joined) = tasks.join_next().await else {
                // A synchronous resolution failure can leave dependents
                // pending with nothing in flight; sweep them before ending
                // the phase.
                self.skip_blocked(&mut pending, &failed, &mut skipped, &mut records);
                break;
            };
            let done = joined?;
            let meta = spawned
                .remove(&done.resource_id)
                .expect("completed task was spawned");

            match done.result {
                Ok(output) => {
                    let status = match meta.kind {
                        ActionKind::Update => ResourceStatus::Updated,
                        _ => ResourceStatus::Created,
                    };
                    let prior = snapshot.resources.get(&done.resource_id).cloned();
                    snapshot.resources.insert(
                        done.resource_id.clone(),
                        ResourceState {
                            resource_type: meta.resource_type.clone(),
                            physical_id: output.physical_id.clone(),
                            status,
                            properties: meta.desired,
                            inputs: meta.inputs.clone(),
                            attributes: output.attributes.clone(),
                            depends_on: meta.depends_on,
                        },
                    );
                    let commit = match meta.kind {
                        ActionKind::Create => Commit::Created {
                            physical_id: output.physical_id.clone(),
                        },
                        ActionKind::Update => Commit::Updated {
                            prior: prior.expect("update implies a recorded resource"),
                        },
                        _ => Commit::Replaced {
                            physical_id: output.physical_id.clone(),
                        },
                    };
                    commits.insert(done.resource_id.clone(), commit);

                    let record = ExecutionRecord {
                        resource_id: done.resource_id.clone(),
                        action: apply_action(meta.kind),
                        outcome: Outcome::Succeeded,
                        physical_id: Some(output.physical_id.clone()),
                        properties: Some(meta.inputs),
                        started_at: done.started_at,
                        finished_at: done.finished_at,
                    };
                    // Durable before dependents are released.
                    self.store.record(&snapshot, &record).await?;
                    records.push(record);

                    resolved.0.insert(
                        done.resource_id.clone(),
                        Resolved {
                            physical_id: output.physical_id,
                            attributes: output.attributes,
                        },
                    );
                }
                Err(cause) => {
                    tracing::error!(
                        resource = %done.resource_id,
                        error = %cause,
                        "action failed"
                    );
                    let record = ExecutionRecord {
                        resource_id: done.resource_id.clone(),
                        action: apply_action(meta.kind),
                        outcome: Outcome::Failed { cause },
                        physical_id: None,
                        properties: Some(meta.inputs),
                        started_at: done.started_at,
                        finished_at: done.finished_at,
                    };
                    self.store.record(&snapshot, &record).await?;
                    records.push(record);
                    failed.insert(done.resource_id);
                }
            }
        }

        // Delete phase, sequential: a delete only runs after the deletes
        // that depend on it, which precede it in the plan.
        let mut delete_failed = false;
        if failed.is_empty() && !cancel.is_cancelled() {
            let mut failed_deletes: BTreeSet<String> = BTreeSet::new();
            for action in &deletes {
                if action
                    .depends_on
                    .iter()
                    .any(|d| failed_deletes.contains(d))
                {
                    records.push(skip_record(&action.resource_id, ApplyAction::Delete));
                    continue;
                }
                let record = self.run_delete(action, &mut snapshot).await?;
                if !record.succeeded() {
                    failed_deletes.insert(action.resource_id.clone());
                    delete_failed = true;
                }
                records.push(record);
            }
        } else {
            for action in &deletes {
                skipped.insert(action.resource_id.clone());
                records.push(skip_record(&action.resource_id, ApplyAction::Delete));
            }
        }

        // Rollback decision.
        let phase_failed = !failed.is_empty();
        let mut rollback_clean = true;
        let mut rolled_back: BTreeSet<String> = BTreeSet::new();
        if phase_failed && self.config.rollback == RollbackPolicy::Automatic {
            let mut targets: BTreeSet<String> = BTreeSet::new();
            for id in &failed {
                targets.extend(
                    self.graph
                        .transitive_dependencies_of(id)
                        .into_iter()
                        .filter(|dep| commits.contains_key(dep)),
                );
            }
            let (rollback_records, clean) = rollback::run(
                self.graph,
                self.registry,
                self.store,
                self.config,
                &mut snapshot,
                &commits,
                &targets,
            )
            .await?;
            rolled_back = targets;
            rollback_clean = clean;
            records.extend(rollback_records);
        }

        let outcome = if phase_failed || delete_failed {
            let automatic = self.config.rollback == RollbackPolicy::Automatic;
            let fully_reverted = automatic
                && !delete_failed
                && rollback_clean
                && commits.keys().all(|id| rolled_back.contains(id));
            if fully_reverted {
                ApplyOutcome::RolledBack
            } else {
                ApplyOutcome::PartiallyApplied
            }
        } else if !skipped.is_empty() {
            ApplyOutcome::Cancelled
        } else {
            ApplyOutcome::Applied
        };

        let resolved_outputs = if outcome == ApplyOutcome::Applied {
            let mut map = BTreeMap::new();
            for (name, value) in outputs {
                map.insert(name.clone(), value.resolve(&resolved)?);
            }
            map
        } else {
            BTreeMap::new()
        };

        self.store.flush(&snapshot).await?;

        tracing::info!(
            document = %snapshot.document,
            outcome = ?outcome,
            actions = records.len(),
            "apply finished"
        );

        Ok(ApplyReport {
            outcome,
            records,
            outputs: resolved_outputs,
        })
    }

    /// Mark every pending action downstream of a failure as skipped, to a
    /// fixpoint.
    fn skip_blocked(
        &self,
        pending: &mut BTreeMap<String, PlanAction>,
        failed: &BTreeSet<String>,
        skipped: &mut BTreeSet<String>,
        records: &mut Vec<ExecutionRecord>,
    ) {
        loop {
            let blocked: Vec<String> = pending
                .iter()
                .filter(|(_, a)| {
                    a.depends_on
                        .iter()
                        .any(|d| failed.contains(d) || skipped.contains(d))
                })
                .map(|(id, _)| id.clone())
                .collect();
            if blocked.is_empty() {
                return;
            }
            for id in blocked {
                let action = pending.remove(&id).expect("blocked action is pending");
                skipped.insert(id.clone());
                tracing::info!(resource = %id, "skipped (dependency failed)");
                records.push(skip_record(&id, apply_action(action.kind)));
            }
        }
    }

    /// Spawn one create/update/replace task. Returns a failure record
    /// instead when reference resolution fails synchronously; the caller
    /// persists it like any other failure.
    #[allow(clippy::too_many_arguments)]
    fn spawn_action(
        &self,
        action: PlanAction,
        resolved: &ResolvedSet,
        snapshot: &StateSnapshot,
        tasks: &mut JoinSet<TaskDone>,
        spawned: &mut HashMap<String, SpawnedMeta>,
        failed: &mut BTreeSet<String>,
        cancel: &CancellationToken,
    ) -> Option<ExecutionRecord> {
        let id = action.resource_id.clone();
        let node = self.graph.node(&id).expect("planned node is in the graph");
        let provider = self
            .registry
            .get(&node.resource_type)
            .expect("providers were checked before execution");

        // Dependencies are complete here, so resolution only fails when a
        // target reports no such attribute: a real failure of this action.
        let inputs = match resolve_properties(&node.properties, resolved) {
            Ok(inputs) => inputs,
            Err(e) => {
                let now = Timestamp::now();
                failed.insert(id.clone());
                return Some(ExecutionRecord {
                    resource_id: id,
                    action: apply_action(action.kind),
                    outcome: Outcome::Failed {
                        cause: e.to_string(),
                    },
                    physical_id: None,
                    properties: None,
                    started_at: now,
                    finished_at: now,
                });
            }
        };

        let desired = serde_json::to_value(&node.properties)
            .expect("property bags serialize to JSON");
        spawned.insert(
            id.clone(),
            SpawnedMeta {
                kind: action.kind,
                resource_type: node.resource_type.clone(),
                desired,
                inputs: inputs.clone(),
                depends_on: node.depends_on.iter().cloned().collect(),
            },
        );

        let physical_id = snapshot
            .resources
            .get(&id)
            .map(|rs| rs.physical_id.clone());
        let kind = action.kind;
        let timeout = self.config.resource_timeout;
        let max_attempts = self.config.max_attempts;
        let base_delay = self.config.retry_base_delay;
        let cancel = cancel.clone();

        tracing::info!(resource = %id, action = %apply_action(kind), "starting action");
        tasks.spawn(async move {
            let started_at = Timestamp::now();
            let result = invoke_with_retry(
                provider,
                kind,
                &id,
                physical_id.as_deref(),
                &inputs,
                timeout,
                max_attempts,
                base_delay,
                &cancel,
            )
            .await;
            TaskDone {
                resource_id: id,
                started_at,
                finished_at: Timestamp::now(),
                result,
            }
        });
        None
    }

    async fn run_delete(
        &self,
        action: &PlanAction,
        snapshot: &mut StateSnapshot,
    ) -> Result<ExecutionRecord, EngineError> {
        let id = &action.resource_id;
        let provider = self
            .registry
            .get(&action.resource_type)
            .expect("providers were checked before execution");
        let physical_id = snapshot
            .resources
            .get(id)
            .map(|rs| rs.physical_id.clone())
            .unwrap_or_default();

        tracing::info!(resource = %id, physical_id = %physical_id, "deleting resource");
        let started_at = Timestamp::now();
        let result = invoke_with_retry(
            provider,
            ActionKind::Delete,
            id,
            Some(&physical_id),
            &Value::Null,
            self.config.resource_timeout,
            self.config.max_attempts,
            self.config.retry_base_delay,
            &CancellationToken::new(),
        )
        .await;
        let finished_at = Timestamp::now();

        let record = match result {
            Ok(_) => {
                snapshot.resources.remove(id);
                ExecutionRecord {
                    resource_id: id.clone(),
                    action: ApplyAction::Delete,
                    outcome: Outcome::Succeeded,
                    physical_id: Some(physical_id),
                    properties: None,
                    started_at,
                    finished_at,
                }
            }
            Err(cause) => {
                tracing::error!(resource = %id, error = %cause, "delete failed");
                ExecutionRecord {
                    resource_id: id.clone(),
                    action: ApplyAction::Delete,
                    outcome: Outcome::Failed { cause },
                    physical_id: Some(physical_id),
                    properties: None,
                    started_at,
                    finished_at,
                }
            }
        };
        self.store.record(snapshot, &record).await?;
        Ok(record)
    }
}

fn apply_action(kind: ActionKind) -> ApplyAction {
    match kind {
        ActionKind::Create => ApplyAction::Create,
        ActionKind::Update => ApplyAction::Update,
        ActionKind::Replace => ApplyAction::Replace,
        ActionKind::Delete => ApplyAction::Delete,
        // No-ops never produce records; create is a harmless placeholder.
        ActionKind::NoOp => ApplyAction::Create,
    }
}

fn skip_record(resource_id: &str, action: ApplyAction) -> ExecutionRecord {
    let now = Timestamp::now();
    ExecutionRecord {
        resource_id: resource_id.to_string(),
        action,
        outcome: Outcome::Skipped,
        physical_id: None,
        properties: None,
        started_at: now,
        finished_at: now,
    }
}

/// Invoke one provider operation: bounded by the per-resource timeout,
/// transient errors retried with exponential backoff, cancellation aborts
/// between attempts.
///
/// A replacement is two separately-retried calls, so a transient failure
/// of the follow-up create never re-issues the delete of the old
/// incarnation.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn invoke_with_retry(
    provider: Arc<dyn Provider>,
    kind: ActionKind,
    resource_id: &str,
    physical_id: Option<&str>,
    inputs: &Value,
    timeout: Duration,
    max_attempts: u32,
    base_delay: Duration,
    cancel: &CancellationToken,
) -> Result<ProviderOutput, String> {
    if kind == ActionKind::Replace {
        if let Some(old) = physical_id {
            retry_call(
                provider.clone(),
                ActionKind::Delete,
                resource_id,
                Some(old),
                &Value::Null,
                timeout,
                max_attempts,
                base_delay,
                cancel,
            )
            .await?;
        }
        return retry_call(
            provider,
            ActionKind::Create,
            resource_id,
            None,
            inputs,
            timeout,
            max_attempts,
            base_delay,
            cancel,
        )
        .await;
    }
    retry_call(
        provider,
        kind,
        resource_id,
        physical_id,
        inputs,
        timeout,
        max_attempts,
        base_delay,
        cancel,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn retry_call(
    provider: Arc<dyn Provider>,
    kind: ActionKind,
    resource_id: &str,
    physical_id: Option<&str>,
    inputs: &Value,
    timeout: Duration,
    max_attempts: u32,
    base_delay: Duration,
    cancel: &CancellationToken,
) -> Result<ProviderOutput, String> {
    let mut backoff = Backoff::new(base_delay, max_attempts);
    loop {
        let call = async {
            match kind {
                ActionKind::Create => provider.create(resource_id, inputs).await,
                ActionKind::Update => {
                    provider
                        .update(resource_id, physical_id.unwrap_or_default(), inputs)
                        .await
                }
                ActionKind::Replace => unreachable!("replacements are split before retry"),
                ActionKind::Delete => {
                    provider
                        .delete(resource_id, physical_id.unwrap_or_default())
                        .await?;
                    Ok(ProviderOutput {
                        physical_id: physical_id.unwrap_or_default().to_string(),
                        attributes: Value::Null,
                    })
                }
                ActionKind::NoOp => Ok(ProviderOutput {
                    physical_id: physical_id.unwrap_or_default().to_string(),
                    attributes: Value::Null,
                }),
            }
        };

        let attempt = tokio::select! {
            _ = cancel.cancelled() => return Err("cancelled".to_string()),
            outcome = tokio::time::timeout(timeout, call) => outcome,
        };

        match attempt {
            Err(_) => {
                return Err(format!(
                    "timed out after {}s waiting for terminal state",
                    timeout.as_secs()
                ));
            }
            Ok(Ok(output)) => return Ok(output),
            Ok(Err(e)) if e.is_transient() => match backoff.next() {
                Some(delay) => {
                    tracing::warn!(
                        resource = %resource_id,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "transient target error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return Err(format!("retries exhausted: {e}")),
            },
            Ok(Err(e)) => return Err(e.to_string()),
        }
    }
}
