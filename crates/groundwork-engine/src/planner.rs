use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use groundwork_core::ResourceGraph;
use groundwork_state::{ResourceState, StateSnapshot};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::plan::{ActionKind, Plan, PlanAction};
use crate::provider::ProviderRegistry;

/// Diff the graph against the last recorded snapshot and produce an ordered
/// plan: creates/updates in topological order (lexical tie-break), then
/// orphan deletes in reverse dependency order.
///
/// With `config.refresh` set, each recorded resource is also described
/// against the live target: a missing resource is re-created and diverged
/// attributes surface as a drift update, even when the document itself is
/// unchanged.
pub async fn build_plan(
    graph: &ResourceGraph,
    snapshot: &StateSnapshot,
    registry: &ProviderRegistry,
    config: &EngineConfig,
) -> Result<Plan, EngineError> {
    let mut actions = Vec::with_capacity(graph.len());

    for id in graph.topo_order() {
        let node = graph.node(&id).expect("topo order yields known nodes");
        let provider = registry.require(&id, &node.resource_type)?;
        let desired = serde_json::to_value(&node.properties)
            .expect("property bags serialize to JSON");

        let recorded = snapshot.resources.get(&id);
        let live = match recorded {
            Some(rs) if config.refresh => match provider.describe(&rs.physical_id).await {
                Ok(live) => Some(live),
                Err(e) => {
                    // Can't tell; assume the record is accurate rather than
                    // planning a destructive recreate.
                    tracing::warn!(resource = %id, error = %e, "describe failed during refresh");
                    None
                }
            },
            _ => None,
        };

        let (kind, reason) = match recorded {
            None => (ActionKind::Create, "not yet provisioned".to_string()),
            Some(rs) => {
                if let Some(None) = live {
                    (
                        ActionKind::Create,
                        "missing from target, needs recreation".to_string(),
                    )
                } else if rs.resource_type != node.resource_type {
                    (
                        ActionKind::Replace,
                        format!("type changed from {}", rs.resource_type),
                    )
                } else {
                    let changed = changed_keys(&rs.properties, &desired);
                    if !changed.is_empty() {
                        let replaces = provider.replace_on_change();
                        if changed.iter().any(|k| replaces.contains(&k.as_str())) {
                            (
                                ActionKind::Replace,
                                format!("replacement forced by: {}", changed.join(", ")),
                            )
                        } else {
                            (
                                ActionKind::Update,
                                format!("properties changed: {}", changed.join(", ")),
                            )
                        }
                    } else if matches!(&live, Some(Some(actual)) if *actual != rs.attributes) {
                        (ActionKind::Update, "drift detected".to_string())
                    } else {
                        (ActionKind::NoOp, "in sync".to_string())
                    }
                }
            }
        };

        if kind == ActionKind::Replace {
            let dependents = graph.dependents_of(&id);
            if !dependents.is_empty() && !config.allow_replace {
                return Err(EngineError::PlanConflict {
                    resource_id: id.clone(),
                    dependents: dependents.into_iter().collect(),
                });
            }
        }

        actions.push(PlanAction {
            resource_id: id.clone(),
            resource_type: node.resource_type.clone(),
            kind,
            reason,
            depends_on: graph.dependencies_of(&id),
        });
    }

    // Orphans: recorded but no longer declared. Deleted dependents-first,
    // using the edges recorded at the time of the last apply.
    for id in orphan_delete_order(snapshot, graph) {
        let rs = &snapshot.resources[&id];
        let dependents: BTreeSet<String> = snapshot
            .resources
            .iter()
            .filter(|(other, state)| {
                !graph.contains(other) && state.depends_on.contains(&id)
            })
            .map(|(other, _)| other.clone())
            .collect();
        actions.push(PlanAction {
            resource_id: id.clone(),
            resource_type: rs.resource_type.clone(),
            kind: ActionKind::Delete,
            reason: "no longer declared".to_string(),
            depends_on: dependents,
        });
    }

    Ok(Plan {
        document: snapshot.document.clone(),
        actions,
    })
}

/// Top-level property names whose values differ between two bags.
fn changed_keys(recorded: &serde_json::Value, desired: &serde_json::Value) -> Vec<String> {
    let empty = serde_json::Map::new();
    let recorded = recorded.as_object().unwrap_or(&empty);
    let desired = desired.as_object().unwrap_or(&empty);

    let mut keys: BTreeSet<&String> = recorded.keys().collect();
    keys.extend(desired.keys());

    keys.into_iter()
        .filter(|k| recorded.get(*k) != desired.get(*k))
        .cloned()
        .collect()
}

/// Order orphaned resources dependents-first: topological sort over the
/// recorded edges restricted to the orphan set, then reversed. Lexical
/// tie-break keeps the order deterministic; resources with stale or
/// missing edges still come out in reverse-lexical order.
fn orphan_delete_order(snapshot: &StateSnapshot, graph: &ResourceGraph) -> Vec<String> {
    let orphans: BTreeMap<&String, &ResourceState> = snapshot
        .resources
        .iter()
        .filter(|(id, _)| !graph.contains(id))
        .collect();

    let mut in_degree: BTreeMap<&str, usize> = orphans
        .iter()
        .map(|(id, rs)| {
            let deps = rs
                .depends_on
                .iter()
                .filter(|d| orphans.contains_key(d))
                .count();
            (id.as_str(), deps)
        })
        .collect();

    let mut ready: BinaryHeap<Reverse<&str>> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| Reverse(*id))
        .collect();

    let mut order = Vec::with_capacity(orphans.len());
    while let Some(Reverse(id)) = ready.pop() {
        order.push(id.to_string());
        for (other, rs) in &orphans {
            if rs.depends_on.iter().any(|d| d == id) {
                let d = in_degree.get_mut(other.as_str()).expect("orphan is known");
                *d -= 1;
                if *d == 0 {
                    ready.push(Reverse(other.as_str()));
                }
            }
        }
    }

    // A cycle in recorded edges should be impossible; if the file was
    // hand-edited into one, fall back to reverse-lexical for the leftovers.
    if order.len() < orphans.len() {
        for id in orphans.keys() {
            if !order.iter().any(|o| o == *id) {
                order.push(id.to_string());
            }
        }
    }

    order.reverse();
    order
}
