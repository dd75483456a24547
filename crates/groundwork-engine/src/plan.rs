use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Update,
    /// Delete-then-create; scheduled only when `allow_replace` is set.
    Replace,
    Delete,
    NoOp,
}

/// One planned step. `depends_on` names the other actions that must have
/// completed before this one may start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanAction {
    pub resource_id: String,
    pub resource_type: String,
    pub kind: ActionKind,
    pub reason: String,
    pub depends_on: BTreeSet<String>,
}

/// Ordered actions covering every node of the document plus orphan deletes.
///
/// Creates/updates come first in topological order; deletes follow in
/// reverse dependency order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub document: String,
    pub actions: Vec<PlanAction>,
}

impl Plan {
    pub fn has_changes(&self) -> bool {
        self.actions.iter().any(|a| a.kind != ActionKind::NoOp)
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        let creates = self
            .actions
            .iter()
            .filter(|a| matches!(a.kind, ActionKind::Create | ActionKind::Replace))
            .count();
        let updates = self
            .actions
            .iter()
            .filter(|a| a.kind == ActionKind::Update)
            .count();
        let deletes = self
            .actions
            .iter()
            .filter(|a| a.kind == ActionKind::Delete)
            .count();
        (creates, updates, deletes)
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Plan for {}:", self.document)?;
        for action in &self.actions {
            let marker = match action.kind {
                ActionKind::Create => "+",
                ActionKind::Update => "~",
                ActionKind::Replace => "±",
                ActionKind::Delete => "-",
                ActionKind::NoOp => " ",
            };
            writeln!(
                f,
                "  {marker} {} ({}): {}",
                action.resource_id, action.resource_type, action.reason
            )?;
        }
        let (creates, updates, deletes) = self.counts();
        writeln!(
            f,
            "{creates} to create, {updates} to update, {deletes} to delete"
        )
    }
}
