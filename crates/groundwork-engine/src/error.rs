use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] groundwork_core::ValidationError),

    #[error("no provider registered for resource type {resource_type:?} (resource {resource_id})")]
    UnknownResourceType {
        resource_id: String,
        resource_type: String,
    },

    #[error(
        "plan conflict: replacing {resource_id} would break dependents: {}",
        dependents.join(", ")
    )]
    PlanConflict {
        resource_id: String,
        dependents: Vec<String>,
    },

    #[error("state error: {0}")]
    State(#[from] groundwork_state::StateError),

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl EngineError {
    /// Validation-class errors fail fast with no side effects; the CLI maps
    /// them to exit code 2.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_)
                | EngineError::UnknownResourceType { .. }
                | EngineError::PlanConflict { .. }
        )
    }
}
