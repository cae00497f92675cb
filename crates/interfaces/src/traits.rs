use async_trait::async_trait;
use std::path::PathBuf;

use cutover_core::Node;

use crate::error::Result;

/// One call of an action on one node.
#[derive(Debug, Clone)]
pub struct ActionInvocation {
    /// Snapshot of the node; executors never see shared state.
    pub node: Node,
    /// Action name as passed to the executable (`startdryrun` in dry runs).
    pub action: String,
    pub environment: String,
    pub phase: u32,
    pub worker_id: usize,
    /// Materialized `KEY="value"` file for this node and worker.
    pub env_file: Option<PathBuf>,
    /// Per-worker log file that output lines are appended to.
    pub log_file: Option<PathBuf>,
}

impl ActionInvocation {
    pub fn new(node: Node, action: impl Into<String>, environment: impl Into<String>, phase: u32) -> Self {
        Self {
            node,
            action: action.into(),
            environment: environment.into(),
            phase,
            worker_id: 0,
            env_file: None,
            log_file: None,
        }
    }

    pub fn with_worker(mut self, worker_id: usize) -> Self {
        self.worker_id = worker_id;
        self.node.thread_id = worker_id;
        self
    }

    pub fn with_env_file(mut self, path: PathBuf) -> Self {
        self.env_file = Some(path);
        self
    }

    pub fn with_log_file(mut self, path: Option<PathBuf>) -> Self {
        self.log_file = path;
        self
    }
}

/// Result of an action: the executable's exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionOutcome {
    pub exit_code: i32,
}

impl ActionOutcome {
    pub fn success() -> Self {
        Self { exit_code: 0 }
    }

    pub fn failed(exit_code: i32) -> Self {
        Self { exit_code }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs actions for one node type
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// The node type this executor serves
    fn node_type(&self) -> &str;

    /// Run `invocation.action` against `invocation.node`.
    ///
    /// A non-zero exit is an `Ok` outcome; `Err` means the action could not
    /// be run at all.
    async fn execute(&self, invocation: &ActionInvocation) -> Result<ActionOutcome>;
}
