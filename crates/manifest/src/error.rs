use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Manifest directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("YAML parse error in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid extra variables: {0}")]
    InvalidExtraVars(String),

    #[error(transparent)]
    Core(#[from] cutover_core::CoreError),

    #[error("Directory traversal error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ManifestError>;
