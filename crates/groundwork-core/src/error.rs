use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("failed to parse document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("document name {0:?} is invalid (letters, digits, '-', '_', '.' only)")]
    InvalidName(String),

    #[error("{from} refers to unknown resource {target:?}")]
    UnresolvedReference { from: String, target: String },

    #[error("dependency cycle: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("reference to {target} cannot be resolved: {reason}")]
    Unresolvable { target: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
