use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a run before any item is scheduled.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("dataset not found: {}", path.display())]
    DatasetNotFound { path: PathBuf },

    #[error("no datasets configured")]
    NoDatasets,

    #[error("failed to read dataset {}: {source}", path.display())]
    DatasetRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported agent version: {version} (available: {})", available.join(", "))]
    UnsupportedAgentVersion {
        version: String,
        available: Vec<String>,
    },

    #[error("failed to initialise agent {version}: {message}")]
    AgentSetup { version: String, message: String },
}

/// Failures while persisting a run report.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
