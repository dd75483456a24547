use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Bump when the snapshot shape changes.
pub const SNAPSHOT_VERSION: u32 = 1;

/// The materialized latest-known state of every resource in one document.
///
/// This is what the planner diffs desired state against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u32,
    /// Document identity this snapshot belongs to.
    pub document: String,
    pub resources: BTreeMap<String, ResourceState>,
}

impl StateSnapshot {
    pub fn fresh(document: &str) -> Self {
        StateSnapshot {
            version: SNAPSHOT_VERSION,
            document: document.to_string(),
            resources: BTreeMap::new(),
        }
    }
}

/// Last-known real-world state of a single resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    pub resource_type: String,
    /// Identifier assigned by the provisioning target.
    pub physical_id: String,
    pub status: ResourceStatus,
    /// Desired property bag as declared (references kept in `$ref` form);
    /// the planner compares this against the next document.
    pub properties: serde_json::Value,
    /// Fully resolved properties as last sent to the provider. Used to
    /// revert an update during rollback.
    pub inputs: serde_json::Value,
    /// Attributes the target reported at creation; outputs and references
    /// of unchanged resources resolve from here on later applies.
    pub attributes: serde_json::Value,
    /// Dependency edges at the time of the last apply. Orphan deletes are
    /// ordered by these even after the document stops declaring the node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Created,
    Updated,
    RolledBack,
}
