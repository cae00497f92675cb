mod settings;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use interfaces::ExecutorRegistry;
use orchestrator::{
    NodeFilter, Orchestrator, OrchestratorConfig, OrchestratorError, PhaseSelection, RunOutcome,
    RunPaths,
};
use settings::{FileSettings, CONFIG_FILE};

const DEFAULT_LOG_FILTER: &str = "cutover=info,orchestrator=info,graph=info,manifest=info,interfaces=info";
/// Exit code after Ctrl-C.
const INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "cutover")]
#[command(about = "Phase-based multi-service migration orchestrator", long_about = None)]
#[command(version)]
struct Cli {
    /// Environment to execute against
    #[arg(short, long, env = "CUTOVER_ENVIRONMENT")]
    environment: Option<String>,

    /// Data files root holding nodes/, environments/ and processes/
    #[arg(long, env = "CUTOVER_DATAFILES")]
    datafiles: Option<PathBuf>,

    /// Run a single phase
    #[arg(long)]
    phase: Option<u32>,

    /// Process a single node, by name
    #[arg(long)]
    node: Option<String>,

    /// Process several nodes, by comma-separated names
    #[arg(long, value_delimiter = ',')]
    nodes: Vec<String>,

    /// Process the nodes whose name contains this text
    #[arg(long)]
    node_filter: Option<String>,

    /// Process the nodes of one type
    #[arg(long)]
    node_type: Option<String>,

    /// Skip nodes, by comma-separated names
    #[arg(long, value_delimiter = ',')]
    skip_nodes: Vec<String>,

    /// Run one action only
    #[arg(long)]
    action: Option<String>,

    /// `K=V K2=V2` pairs, or a path to a KEY="value" file
    #[arg(long)]
    extra_vars: Option<String>,

    #[arg(long)]
    preflight: bool,

    #[arg(long)]
    dryrun: bool,

    /// Ignore completion markers, tolerate failures and delete conflicting nodes
    #[arg(long)]
    force: bool,

    /// Clear completion markers and failed-preflight records first
    #[arg(long)]
    restart: bool,

    /// Report manifest problems across every environment and exit
    #[arg(long)]
    inspect: bool,

    /// List nodes: `type=<T>[,phase=<p> <p>...][,environment=<e>][,services=<a>,<b>...]`
    #[arg(long)]
    query: Option<String>,

    /// Export the dependency graph and exit
    #[arg(long)]
    charts_only: bool,

    /// Export the dependency graph before running
    #[arg(long)]
    draw_charts: bool,

    #[arg(long)]
    max_workers: Option<usize>,

    /// Directory of node interface executables
    #[arg(long)]
    interfaces_dir: Option<PathBuf>,

    /// Root of logs/ and .meta/
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Directory for worker logs and the wave audit, instead of logs/thread_logs/
    #[arg(long)]
    thread_log_path: Option<PathBuf>,

    /// Tracing filter, overrides RUST_LOG
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Flags and environment variables first, then the settings file, then
    /// defaults.
    fn into_config(self, file: &FileSettings) -> OrchestratorConfig {
        let defaults = OrchestratorConfig::default();

        let mut filter = NodeFilter::default()
            .with_many(self.nodes)
            .with_skip(self.skip_nodes);
        if let Some(node) = self.node {
            filter = filter.with_single(node);
        }
        if let Some(text) = self.node_filter {
            filter = filter.with_contains(text);
        }
        if let Some(node_type) = self.node_type {
            filter = filter.with_node_type(node_type);
        }

        let phase = self.phase.map_or(PhaseSelection::All, PhaseSelection::Single);

        OrchestratorConfig::new(
            self.datafiles
                .or_else(|| file.datafiles.clone())
                .unwrap_or(defaults.data_dir),
            self.environment
                .or_else(|| file.environment.clone())
                .unwrap_or(defaults.environment),
        )
        .with_interfaces_dir(
            self.interfaces_dir
                .or_else(|| file.interfaces_dir.clone())
                .unwrap_or(defaults.interfaces_dir),
        )
        .with_state_dir(
            self.state_dir
                .or_else(|| file.state_dir.clone())
                .unwrap_or(defaults.state_dir),
        )
        .with_thread_log_dir(self.thread_log_path.or_else(|| file.thread_log_dir.clone()))
        .with_max_workers(
            self.max_workers
                .or(file.max_workers)
                .unwrap_or(defaults.max_workers),
        )
        .with_phase(phase)
        .with_single_action(self.action)
        .with_filter(filter)
        .with_extra_vars(self.extra_vars)
        .with_query(self.query)
        .with_preflight(self.preflight)
        .with_dryrun(self.dryrun)
        .with_force(self.force)
        .with_restart(self.restart)
        .with_inspect(self.inspect)
        .with_draw_charts(self.draw_charts)
        .with_charts_only(self.charts_only)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<OrchestratorError>()
                .map_or(1, OrchestratorError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let file = FileSettings::load(&std::env::current_dir()?.join(CONFIG_FILE))?;
    let log_level = cli.log_level.clone().or_else(|| file.log_level.clone());
    let config = cli.into_config(&file);

    let paths = RunPaths::new(&config.state_dir);
    init_tracing(&paths, log_level.as_deref())?;

    let registry = if config.charts_only || config.inspect || config.query.is_some() {
        ExecutorRegistry::discover(config.interfaces_dir()).unwrap_or_default()
    } else {
        ExecutorRegistry::discover(config.interfaces_dir()).with_context(|| {
            format!(
                "Failed to load node interfaces from {}",
                config.interfaces_dir().display()
            )
        })?
    };
    let orchestrator = Orchestrator::new(config, registry);

    let outcome = tokio::select! {
        outcome = orchestrator.run() => outcome?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, stopping all running actions");
            return Ok(ExitCode::from(INTERRUPTED));
        }
    };

    match outcome {
        RunOutcome::Queried(names) => {
            for name in names {
                println!("{name}");
            }
        }
        RunOutcome::Inspected(report) => println!("{report}"),
        RunOutcome::ChartsExported(path) => println!("Graph exported to {}", path.display()),
        RunOutcome::Completed(summary) => {
            println!(
                "Run {} finished in {}: {} invocations, {} succeeded, {} skipped, {} tolerated",
                summary.run_id,
                summary.environment,
                summary.invocations,
                summary.succeeded,
                summary.skipped,
                summary.tolerated
            );
            if !summary.failed_preflight.is_empty() {
                println!(
                    "Nodes failed preflight: {}",
                    summary.failed_preflight.into_iter().collect::<Vec<_>>().join(", ")
                );
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Console output plus `logs/cutover.log` under the state directory.
fn init_tracing(paths: &RunPaths, level: Option<&str>) -> Result<()> {
    std::fs::create_dir_all(paths.logs_dir())?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(paths.run_log())
        .with_context(|| format!("Failed to open {}", paths.run_log().display()))?;

    let filter = match level {
        Some(level) => tracing_subscriber::EnvFilter::new(level),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(log_file)),
        )
        .with(filter)
        .init();
    Ok(())
}
