use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// The operation attempted against the provisioning target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyAction {
    Create,
    Update,
    Replace,
    Delete,
    Rollback,
}

impl std::fmt::Display for ApplyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            ApplyAction::Create => "create",
            ApplyAction::Update => "update",
            ApplyAction::Replace => "replace",
            ApplyAction::Delete => "delete",
            ApplyAction::Rollback => "rollback",
        };
        f.write_str(s)
    }
}

/// How a single action ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed { cause: String },
    RolledBack,
    RollbackFailed { cause: String },
    /// Never started: a dependency failed, or the apply was cancelled.
    Skipped,
}

/// Per-resource outcome of one action, appended to the document's log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub resource_id: String,
    pub action: ApplyAction,
    pub outcome: Outcome,
    /// Identifier assigned by the provisioning target, when one exists.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub physical_id: Option<String>,
    /// Resolved properties as sent to the target; absent for deletes and
    /// actions that never reached the provider.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub properties: Option<serde_json::Value>,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
}

impl ExecutionRecord {
    pub fn succeeded(&self) -> bool {
        self.outcome == Outcome::Succeeded
    }
}
