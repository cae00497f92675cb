use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

/// Which phases `--phase` asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PhaseSelection {
    /// Every phase from 1 to the highest one referenced by an action.
    #[default]
    All,
    Single(u32),
}

/// Node selection applied by the execution gate before anything runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFilter {
    pub single: Option<String>,
    pub many: Vec<String>,
    /// Substring the node name must contain.
    pub contains: Option<String>,
    pub node_type: Option<String>,
    pub skip: BTreeSet<String>,
}

impl NodeFilter {
    pub fn with_single(mut self, name: impl Into<String>) -> Self {
        self.single = Some(name.into());
        self
    }

    pub fn with_many(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.many = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_contains(mut self, text: impl Into<String>) -> Self {
        self.contains = Some(text.into());
        self
    }

    pub fn with_node_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = Some(node_type.into());
        self
    }

    pub fn with_skip(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.skip = names.into_iter().map(Into::into).collect();
        self
    }

    /// Why a node is filtered out, or `None` when it is admitted.
    pub fn rejects(&self, name: &str, node_type: &str) -> Option<&'static str> {
        if self.skip.contains(name) {
            return Some("in skip list");
        }
        if self.single.as_deref().is_some_and(|single| single != name) {
            return Some("not the selected node");
        }
        if !self.many.is_empty() && !self.many.iter().any(|n| n == name) {
            return Some("not in the selected node list");
        }
        if self.contains.as_deref().is_some_and(|text| !name.contains(text)) {
            return Some("does not match the node filter");
        }
        if self.node_type.as_deref().is_some_and(|t| t != node_type) {
            return Some("not the selected node type");
        }
        None
    }
}

/// Everything one run needs, fixed before the run starts.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Root holding `nodes/`, `environments/` and `processes/`.
    pub data_dir: PathBuf,
    /// Directory of node interface executables.
    pub interfaces_dir: PathBuf,
    /// Root of `logs/` and `.meta/`.
    pub state_dir: PathBuf,
    /// Worker logs and wave audit; `logs/thread_logs/` when unset.
    pub thread_log_dir: Option<PathBuf>,
    pub environment: String,
    pub phase: PhaseSelection,
    pub single_action: Option<String>,
    pub filter: NodeFilter,
    pub extra_vars: Option<String>,
    pub query: Option<String>,
    pub max_workers: usize,
    pub preflight: bool,
    pub dryrun: bool,
    pub force: bool,
    pub restart: bool,
    pub inspect: bool,
    pub draw_charts: bool,
    pub charts_only: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("mock_data_files"),
            interfaces_dir: PathBuf::from("node_interfaces"),
            state_dir: PathBuf::from("."),
            thread_log_dir: None,
            environment: "local".to_string(),
            phase: PhaseSelection::All,
            single_action: None,
            filter: NodeFilter::default(),
            extra_vars: None,
            query: None,
            max_workers: 1,
            preflight: false,
            dryrun: false,
            force: false,
            restart: false,
            inspect: false,
            draw_charts: false,
            charts_only: false,
        }
    }
}

impl OrchestratorConfig {
    pub fn new(data_dir: impl Into<PathBuf>, environment: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            environment: environment.into(),
            ..Default::default()
        }
    }

    pub fn with_interfaces_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.interfaces_dir = dir.into();
        self
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    pub fn with_thread_log_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.thread_log_dir = dir;
        self
    }

    pub fn with_phase(mut self, phase: PhaseSelection) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_single_action(mut self, action: Option<String>) -> Self {
        self.single_action = action;
        self
    }

    pub fn with_filter(mut self, filter: NodeFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_extra_vars(mut self, extra_vars: Option<String>) -> Self {
        self.extra_vars = extra_vars;
        self
    }

    pub fn with_query(mut self, query: Option<String>) -> Self {
        self.query = query;
        self
    }

    /// Worker count; values below 1 are raised to 1.
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    pub fn with_preflight(mut self, preflight: bool) -> Self {
        self.preflight = preflight;
        self
    }

    pub fn with_dryrun(mut self, dryrun: bool) -> Self {
        self.dryrun = dryrun;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_restart(mut self, restart: bool) -> Self {
        self.restart = restart;
        self
    }

    pub fn with_inspect(mut self, inspect: bool) -> Self {
        self.inspect = inspect;
        self
    }

    pub fn with_draw_charts(mut self, draw: bool) -> Self {
        self.draw_charts = draw;
        self
    }

    /// Export charts and stop. Implies chart drawing and a dry run.
    pub fn with_charts_only(mut self, charts_only: bool) -> Self {
        self.charts_only = charts_only;
        if charts_only {
            self.draw_charts = true;
            self.dryrun = true;
        }
        self
    }

    pub fn nodes_dir(&self) -> PathBuf {
        self.data_dir.join("nodes")
    }

    pub fn environments_dir(&self) -> PathBuf {
        self.data_dir.join("environments")
    }

    pub fn processes_dir(&self) -> PathBuf {
        self.data_dir.join("processes")
    }

    pub fn interfaces_dir(&self) -> &Path {
        &self.interfaces_dir
    }

    pub fn is_parallel(&self) -> bool {
        self.max_workers > 1
    }

    /// Phases this run walks through, given the highest phase any action
    /// references.
    ///
    /// Phase 0 belongs to preflight and dry runs. A forced single action runs
    /// in phase 0 only; an explicit `--phase` pins that phase.
    pub fn phase_range(&self, max_phase: u32) -> RangeInclusive<u32> {
        if self.preflight || (self.force && self.single_action.is_some()) {
            return 0..=0;
        }
        match self.phase {
            PhaseSelection::Single(phase) => phase..=phase,
            PhaseSelection::All if self.dryrun => 0..=max_phase,
            PhaseSelection::All => 1..=max_phase,
        }
    }
}
