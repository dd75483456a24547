use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state file for {document} has version {found}, this build supports up to {supported}")]
    UnsupportedVersion {
        document: String,
        found: u32,
        supported: u32,
    },

    #[error("state file for {expected} records document {found:?}")]
    DocumentMismatch { expected: String, found: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
