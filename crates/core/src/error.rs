use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Tried to overwrite real node with duplicate node: {name} ({existing} and {duplicate})")]
    DuplicateNode {
        name: String,
        existing: String,
        duplicate: String,
    },

    #[error("The {environment} environment is not found for node `{node}`")]
    UnknownEnvironment { node: String, environment: String },

    #[error("Node not found: {0}")]
    NodeNotFound(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
