use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("No executor registered for node type: {0}")]
    ExecutorNotFound(String),

    #[error("No executors registered for node types: {}", .0.join(", "))]
    MissingExecutors(Vec<String>),

    #[error("Interface directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Failed to spawn {path}: {source}")]
    SpawnFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
