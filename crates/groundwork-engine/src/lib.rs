//! groundwork-engine
//!
//! The dependency-ordered apply/rollback engine.
//!
//! Public API:
//! - `plan()`: build the graph, diff against recorded state, produce an
//!   ordered plan
//! - `apply()`: execute a document's plan with bounded concurrency,
//!   recording state after each action; rolls back the failed branch per
//!   policy and reports the final outcome
//! - `destroy()`: tear down every recorded resource in reverse dependency
//!   order

pub mod config;
pub mod error;
pub mod executor;
pub mod plan;
pub mod planner;
pub mod provider;
pub mod report;
pub mod retry;
mod rollback;
pub mod sim;

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use groundwork_core::{Document, ResourceGraph};
use groundwork_state::StateStore;

pub use crate::config::{EngineConfig, RollbackPolicy};
pub use crate::error::EngineError;
pub use crate::executor::Executor;
pub use crate::plan::{ActionKind, Plan, PlanAction};
pub use crate::planner::build_plan;
pub use crate::provider::{Provider, ProviderError, ProviderOutput, ProviderRegistry};
pub use crate::report::{ApplyOutcome, ApplyReport};
pub use crate::sim::SimProvider;

/// Validate the document and produce its plan without side effects.
pub async fn plan(
    document: &Document,
    registry: &ProviderRegistry,
    store: &StateStore,
    config: &EngineConfig,
) -> Result<Plan, EngineError> {
    let graph = ResourceGraph::build(document)?;
    let snapshot = store.load(&document.name).await?;
    planner::build_plan(&graph, &snapshot, registry, config).await
}

/// Plan and execute: the full provisioning path.
pub async fn apply(
    document: &Document,
    registry: &ProviderRegistry,
    store: &StateStore,
    config: &EngineConfig,
    cancel: CancellationToken,
) -> Result<ApplyReport, EngineError> {
    let graph = ResourceGraph::build(document)?;
    let snapshot = store.load(&document.name).await?;
    let plan = planner::build_plan(&graph, &snapshot, registry, config).await?;

    if !plan.has_changes() {
        tracing::info!(document = %document.name, "all resources in sync, no changes needed");
    }

    Executor::new(&graph, registry, store, config)
        .apply(&document.outputs, plan, snapshot, cancel)
        .await
}

/// Delete every recorded resource, dependents first.
///
/// Implemented as an apply of the document with its resources emptied, so
/// everything recorded becomes an orphan delete.
pub async fn destroy(
    document: &Document,
    registry: &ProviderRegistry,
    store: &StateStore,
    config: &EngineConfig,
    cancel: CancellationToken,
) -> Result<ApplyReport, EngineError> {
    let empty = Document {
        name: document.name.clone(),
        parameters: BTreeMap::new(),
        resources: BTreeMap::new(),
        outputs: BTreeMap::new(),
    };
    apply(&empty, registry, store, config, cancel).await
}
