//! Error type for pipeline operations.

use crate::config::ConfigError;

/// Errors surfaced by the pipeline and its debug log.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Proto(#[from] agentbus_proto::Error),

    #[error("invalid debug log timestamp `{0}`")]
    Timestamp(String),

    #[error("event pipeline task has shut down")]
    Closed,
}
