use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use cutover_core::{Node, NodeSet};
use graph::{
    query_nodes, serial_order, DependencyGraph, GraphValidator, InspectionReport, NodeQuery,
    WavePlan,
};
use interfaces::ExecutorRegistry;
use manifest::{discover_wellknown_environments, ManifestIndex, NodeLoader};

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::files::{append_wave_audit, write_graph_dot, RunPaths};
use crate::gate::{ActionStatus, DispatchOutcome, ExecutionGate};
use crate::lock::{FileLockManager, LockManager};
use crate::markers::{FsMarkerStore, MarkerStore};
use crate::node_env::NodeEnvironment;
use crate::processes::ProcessRunner;
use crate::state_machine::PhaseCursor;
use crate::workers::{Dispatched, WavePool};

#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// `--query`: matching node names.
    Queried(Vec<String>),
    /// `--inspect`: findings across every environment.
    Inspected(InspectionReport),
    /// `--charts-only`: path of the exported graph.
    ChartsExported(PathBuf),
    Completed(RunSummary),
}

/// Tally of an execution run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub environment: String,
    pub phases: Vec<u32>,
    pub invocations: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub tolerated: usize,
    pub failed_preflight: BTreeSet<String>,
}

impl RunSummary {
    fn new(environment: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            environment: environment.to_string(),
            ..Default::default()
        }
    }

    fn record(&mut self, node: &str, outcome: &DispatchOutcome) {
        let records = match outcome {
            DispatchOutcome::Skipped(_) => {
                self.skipped += 1;
                return;
            }
            DispatchOutcome::Ran(records) => records,
        };
        for record in records {
            if record.status.invoked() {
                self.invocations += 1;
            }
            match &record.status {
                ActionStatus::Succeeded => self.succeeded += 1,
                ActionStatus::AlreadyRunning | ActionStatus::AlreadyCompleted => self.skipped += 1,
                ActionStatus::Tolerated { .. } => self.tolerated += 1,
                ActionStatus::PreflightFailed { .. } => {
                    self.failed_preflight.insert(node.to_string());
                }
            }
        }
    }
}

/// Certified input of the phase loop.
struct Prepared {
    nodes: NodeSet,
    graph: DependencyGraph,
}

/// Runs one orchestration from an immutable configuration.
pub struct Orchestrator {
    config: Arc<OrchestratorConfig>,
    registry: Arc<ExecutorRegistry>,
    paths: RunPaths,
    locks: Arc<dyn LockManager>,
    markers: Arc<dyn MarkerStore>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, registry: ExecutorRegistry) -> Self {
        let paths = RunPaths::new(&config.state_dir).with_thread_logs_dir(config.thread_log_dir.clone());
        let locks = Arc::new(FileLockManager::new(paths.locks_dir()));
        let markers = Arc::new(FsMarkerStore::new(
            paths.executed_dir(),
            paths.failed_preflight_dir(),
        ));
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            paths,
            locks,
            markers,
        }
    }

    pub fn with_lock_manager(mut self, locks: Arc<dyn LockManager>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_marker_store(mut self, markers: Arc<dyn MarkerStore>) -> Self {
        self.markers = markers;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    pub async fn run(&self) -> Result<RunOutcome> {
        let config = &self.config;
        info!(
            environment = %config.environment,
            data = %config.data_dir.display(),
            workers = config.max_workers,
            preflight = config.preflight,
            dryrun = config.dryrun,
            force = config.force,
            "Setting up"
        );
        self.paths.ensure_dirs().await?;
        if config.restart {
            self.markers.clear().await?;
        }

        let index = NodeLoader::new(config.nodes_dir()).load()?;

        if let Some(query) = &config.query {
            return self.query(&index, query);
        }
        if config.inspect {
            return self.inspect(&index);
        }

        let prepared = self.prepare(&index)?;
        if config.draw_charts {
            let path = self.paths.graph_dot(&config.environment);
            write_graph_dot(&path, &prepared.graph).await?;
            info!("Charts generated");
        }
        if config.charts_only {
            info!("Execution completed due to charts-only");
            return Ok(RunOutcome::ChartsExported(self.paths.graph_dot(&config.environment)));
        }

        let summary = self.execute(&prepared).await?;
        Ok(RunOutcome::Completed(summary))
    }

    /// Manifest and well-known environments, normalized into `nodes`.
    fn environments(&self, nodes: &NodeSet) -> Result<BTreeSet<String>> {
        let mut environments = discover_wellknown_environments(&self.config.environments_dir())?;
        environments.extend(nodes.manifest_environments());
        debug!(?environments, "Environments discovered");
        Ok(environments)
    }

    fn query(&self, index: &ManifestIndex, query: &str) -> Result<RunOutcome> {
        let query: NodeQuery = query.parse()?;
        let mut nodes = index.resolve_lenient();
        let environments = self.environments(&nodes)?;
        nodes.normalize_environments(&environments);

        let names: Vec<String> = query_nodes(&nodes, &query)?
            .into_iter()
            .map(|node| node.name.clone())
            .collect();
        info!(query = ?query, matches = names.len(), "Query finished");
        Ok(RunOutcome::Queried(names))
    }

    fn inspect(&self, index: &ManifestIndex) -> Result<RunOutcome> {
        info!("Inspecting dependencies");
        let mut nodes = index.resolve_lenient();
        let environments = self.environments(&nodes)?;
        nodes.normalize_environments(&environments);

        let report = InspectionReport::collect(index.definitions(), &nodes, &environments)?;
        info!("Inspection report:\n{report}");
        Ok(RunOutcome::Inspected(report))
    }

    /// Resolve, validate and certify the node set of the selected
    /// environment.
    fn prepare(&self, index: &ManifestIndex) -> Result<Prepared> {
        let config = &self.config;
        let mut nodes = index.resolve()?;
        let environments = self.environments(&nodes)?;
        nodes.normalize_environments(&environments);

        if !environments.contains(&config.environment) {
            return Err(OrchestratorError::UnknownEnvironment {
                environment: config.environment.clone(),
                available: environments.iter().cloned().collect::<Vec<_>>().join(" & "),
            });
        }
        nodes.find_parents(&config.environment);

        if config.dryrun {
            let added = nodes.virtualize_missing();
            if !added.is_empty() {
                info!(nodes = %added.join("|"), "Missing dependencies virtualized for dry run");
                nodes.normalize_environments(&environments);
            }
        }
        if !config.charts_only {
            self.registry.validate(&nodes)?;
        }

        let validated = GraphValidator::enforcing(config.force).validate(&nodes, &config.environment)?;
        Ok(Prepared {
            nodes,
            graph: validated.graph,
        })
    }

    fn gate(&self) -> Result<ExecutionGate> {
        let environment = NodeEnvironment::load(&self.config, self.paths.meta_dir())?;
        Ok(ExecutionGate::new(
            self.config.clone(),
            self.registry.clone(),
            self.locks.clone(),
            self.markers.clone(),
            environment,
            self.paths.clone(),
        ))
    }

    /// Owned copies of the named nodes that take part in this environment.
    fn snapshots<'a>(&self, nodes: &NodeSet, names: impl IntoIterator<Item = &'a String>) -> Vec<Node> {
        names
            .into_iter()
            .filter_map(|name| nodes.get(name))
            .filter(|node| node.active_in(&self.config.environment) == Some(true))
            .cloned()
            .collect()
    }

    async fn execute(&self, prepared: &Prepared) -> Result<RunSummary> {
        let config = &self.config;
        let gate = Arc::new(self.gate()?);
        let pool = WavePool::new(gate.clone(), config.max_workers);
        let processes = ProcessRunner::new(config.processes_dir());
        let mut summary = RunSummary::new(&config.environment);

        let mut cursor = PhaseCursor::new(config.phase_range(prepared.nodes.max_phase()));
        info!(run_id = %summary.run_id, phases = cursor.total(), "Executing orchestration");

        while let Some(phase) = cursor.advance()? {
            info!(phase, "Starting phase");
            if config.is_parallel() {
                let plan = WavePlan::plan(&prepared.graph);
                append_wave_audit(&self.paths.wave_audit(), &plan, &prepared.nodes).await?;
                for (idx, wave) in plan.waves().iter().enumerate() {
                    debug!(phase, wave = idx + 1, nodes = wave.len(), "Dispatching wave");
                    let dispatched = pool.run_wave(self.snapshots(&prepared.nodes, wave), phase).await?;
                    for Dispatched { node, outcome } in &dispatched {
                        summary.record(node, outcome);
                    }
                }
            } else {
                let order = serial_order(&prepared.graph)?;
                debug!(phase, order = %order.join(","), "Serial order");
                for node in self.snapshots(&prepared.nodes, &order) {
                    let name = node.name.clone();
                    let outcome = gate.dispatch(node, phase, 0).await?;
                    summary.record(&name, &outcome);
                }
            }
            info!(phase, "Phase completed");

            processes.run_phase(phase).await?;
            summary.phases.push(phase);
        }

        if !summary.failed_preflight.is_empty() {
            error!(
                nodes = %summary.failed_preflight.iter().cloned().collect::<Vec<_>>().join(", "),
                "Nodes failed preflight"
            );
        }
        info!(
            run_id = %summary.run_id,
            invocations = summary.invocations,
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            tolerated = summary.tolerated,
            "Run finished"
        );
        Ok(summary)
    }
}
