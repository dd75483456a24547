use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use groundwork_state::ExecutionRecord;

/// How an apply (or destroy) ended, as reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// Every planned action succeeded.
    Applied,
    /// A branch failed and all of this run's committed work was reverted.
    RolledBack,
    /// A branch failed and some committed work remains (rollback disabled,
    /// rollback failures, or independent branches that completed).
    PartiallyApplied,
    /// User-initiated abort; completed actions are left in place.
    Cancelled,
}

/// Final report for one apply: outcome, per-resource records in completion
/// order, and resolved outputs (only populated on full success).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyReport {
    pub outcome: ApplyOutcome,
    pub records: Vec<ExecutionRecord>,
    pub outputs: BTreeMap<String, serde_json::Value>,
}

impl ApplyReport {
    pub fn succeeded(&self) -> bool {
        self.outcome == ApplyOutcome::Applied
    }
}
