//! The per-node decision procedure run by every worker.
//!
//! Order: filter, action resolution, lock, resumption check, environment
//! materialization, invocation, marker, failure handling.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use cutover_core::Node;
use interfaces::{ActionInvocation, ExecutorRegistry};

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::files::RunPaths;
use crate::lock::{lock_key, LockManager};
use crate::markers::{MarkerKey, MarkerStore};
use crate::node_env::NodeEnvironment;

/// Action every node runs in preflight mode.
pub const PREFLIGHT_ACTION: &str = "preflight";
/// Suffix appended to the action name passed to executables in dry runs.
pub const DRYRUN_SUFFIX: &str = "dryrun";

/// What happened to one action of a dispatched node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionStatus {
    Succeeded,
    /// Another worker or process holds the lock.
    AlreadyRunning,
    /// A completion marker exists.
    AlreadyCompleted,
    /// Failed, but the run goes on (dry run or force).
    Tolerated { exit_code: i32 },
    PreflightFailed { exit_code: i32 },
}

impl ActionStatus {
    pub fn invoked(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Tolerated { .. } | Self::PreflightFailed { .. }
        )
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::AlreadyRunning => write!(f, "already running"),
            Self::AlreadyCompleted => write!(f, "already completed"),
            Self::Tolerated { exit_code } => write!(f, "failed with {exit_code}, tolerated"),
            Self::PreflightFailed { exit_code } => write!(f, "preflight failed with {exit_code}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRecord {
    pub action: String,
    pub status: ActionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Skipped(String),
    Ran(Vec<ActionRecord>),
}

/// Everything a worker needs to dispatch nodes. Shared read-only across
/// workers.
pub struct ExecutionGate {
    config: Arc<OrchestratorConfig>,
    registry: Arc<ExecutorRegistry>,
    locks: Arc<dyn LockManager>,
    markers: Arc<dyn MarkerStore>,
    environment: NodeEnvironment,
    paths: RunPaths,
}

impl ExecutionGate {
    pub fn new(
        config: Arc<OrchestratorConfig>,
        registry: Arc<ExecutorRegistry>,
        locks: Arc<dyn LockManager>,
        markers: Arc<dyn MarkerStore>,
        environment: NodeEnvironment,
        paths: RunPaths,
    ) -> Self {
        Self {
            config,
            registry,
            locks,
            markers,
            environment,
            paths,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Actions to run for `node` in `phase`, or why there are none.
    fn resolve_actions(&self, node: &Node, phase: u32) -> std::result::Result<Vec<String>, String> {
        if self.config.preflight {
            return Ok(vec![PREFLIGHT_ACTION.to_string()]);
        }
        if let Some(action) = &self.config.single_action {
            if self.config.force || node.action_fires_in(action, phase) {
                return Ok(vec![action.clone()]);
            }
            return Err(format!("action {action} not scheduled in phase {phase}"));
        }
        let actions: Vec<String> = node
            .actions_in_phase(phase)
            .into_iter()
            .map(str::to_string)
            .collect();
        if actions.is_empty() {
            return Err(format!("no actions in phase {phase}"));
        }
        Ok(actions)
    }

    /// Run every applicable action of `node` for `phase` on `worker_id`.
    ///
    /// `Err` is fatal for the whole run; tolerated failures come back as
    /// records.
    pub async fn dispatch(&self, mut node: Node, phase: u32, worker_id: usize) -> Result<DispatchOutcome> {
        if let Some(reason) = self.config.filter.rejects(&node.name, &node.node_type) {
            debug!(node = %node.name, reason, "Node filtered out");
            return Ok(DispatchOutcome::Skipped(reason.to_string()));
        }
        if node.is_virtual() {
            debug!(node = %node.name, "Virtual node skipped");
            return Ok(DispatchOutcome::Skipped("virtual node".to_string()));
        }
        let actions = match self.resolve_actions(&node, phase) {
            Ok(actions) => actions,
            Err(reason) => {
                debug!(node = %node.name, phase, reason = %reason, "Nothing to run");
                return Ok(DispatchOutcome::Skipped(reason));
            }
        };

        let mut records = Vec::with_capacity(actions.len());
        for action in actions {
            let status = self.run_action(&mut node, &action, phase, worker_id).await?;
            records.push(ActionRecord { action, status });
        }
        Ok(DispatchOutcome::Ran(records))
    }

    async fn run_action(
        &self,
        node: &mut Node,
        action: &str,
        phase: u32,
        worker_id: usize,
    ) -> Result<ActionStatus> {
        let config = &self.config;
        let key = lock_key(&node.name, action);
        let Some(_guard) = self.locks.try_acquire(&key).await? else {
            info!(node = %node.name, action, "Action already running, skipping");
            return Ok(ActionStatus::AlreadyRunning);
        };

        let marker = MarkerKey::new(&node.name, &config.environment, phase, action);
        if !config.force && !config.dryrun && self.markers.is_completed(&marker).await? {
            debug!(node = %node.name, action, phase, "Already executed, skipping");
            return Ok(ActionStatus::AlreadyCompleted);
        }

        let env_file = self.environment.materialize(node, worker_id).await?;
        let invoked_action = if config.dryrun {
            format!("{action}{DRYRUN_SUFFIX}")
        } else {
            action.to_string()
        };
        let log_file = config
            .is_parallel()
            .then(|| self.paths.worker_log(worker_id, phase));

        let executor = self.registry.get(&node.node_type)?;
        let invocation = ActionInvocation::new(node.clone(), &invoked_action, &config.environment, phase)
            .with_worker(worker_id)
            .with_env_file(env_file)
            .with_log_file(log_file);

        info!(
            node = %node.name,
            action = %invoked_action,
            phase,
            worker = worker_id,
            environment = %config.environment,
            "Executing action"
        );
        let outcome = executor.execute(&invocation).await?;

        if outcome.is_success() {
            if !config.dryrun {
                self.markers.mark_completed(&marker).await?;
            }
            return Ok(ActionStatus::Succeeded);
        }

        let exit_code = outcome.exit_code;
        if config.dryrun {
            warn!(node = %node.name, action = %invoked_action, exit_code, "Dry run action failed");
            return Ok(ActionStatus::Tolerated { exit_code });
        }
        if action == PREFLIGHT_ACTION {
            error!(node = %node.name, exit_code, "Preflight failed");
            self.markers
                .record_failed_preflight(&node.node_type, &node.name)
                .await?;
            return Ok(ActionStatus::PreflightFailed { exit_code });
        }
        if config.force {
            warn!(node = %node.name, action, exit_code, "Action failed, continuing because of force");
            return Ok(ActionStatus::Tolerated { exit_code });
        }

        error!(node = %node.name, action, exit_code, "Action failed");
        Err(OrchestratorError::action_failed(&node.name, action, exit_code))
    }
}
