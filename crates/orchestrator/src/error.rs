use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid phase transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("The {environment} environment is not available, the valid environments are: {available}")]
    UnknownEnvironment {
        environment: String,
        available: String,
    },

    #[error("Action {action} failed for node {node} with exit code {exit_code}")]
    ActionFailed {
        node: String,
        action: String,
        exit_code: i32,
    },

    #[error("Process {process} failed running `{command}` with exit code {exit_code}")]
    ProcessFailed {
        process: String,
        command: String,
        exit_code: i32,
    },

    #[error("Manifest error: {0}")]
    Manifest(#[from] manifest::ManifestError),

    #[error("Graph error: {0}")]
    Graph(#[from] graph::GraphError),

    #[error("Executor error: {0}")]
    Executor(#[from] interfaces::ExecutorError),

    #[error(transparent)]
    Core(#[from] cutover_core::CoreError),

    #[error("Worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    pub fn action_failed(node: impl Into<String>, action: impl Into<String>, exit_code: i32) -> Self {
        Self::ActionFailed {
            node: node.into(),
            action: action.into(),
            exit_code,
        }
    }

    /// Process exit code for this failure. External failures propagate the
    /// external exit code; everything else is 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ActionFailed { exit_code, .. } | Self::ProcessFailed { exit_code, .. }
                if *exit_code != 0 =>
            {
                *exit_code
            }
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
