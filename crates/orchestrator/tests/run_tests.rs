use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use interfaces::{ActionExecutor, ActionInvocation, ActionOutcome, ExecutorRegistry};
use orchestrator::{
    NodeFilter, Orchestrator, OrchestratorConfig, OrchestratorError, PhaseSelection, RunOutcome,
    RunSummary,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Call {
    node: String,
    action: String,
    phase: u32,
    worker: usize,
}

/// Records every invocation; fails actions listed in `failures`. Successful
/// actions take `delay`.
struct RecordingExecutor {
    node_type: String,
    calls: Arc<Mutex<Vec<Call>>>,
    failures: Vec<(String, i32)>,
    delay: Duration,
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    fn node_type(&self) -> &str {
        &self.node_type
    }

    async fn execute(&self, invocation: &ActionInvocation) -> interfaces::Result<ActionOutcome> {
        self.calls.lock().unwrap().push(Call {
            node: invocation.node.name.clone(),
            action: invocation.action.clone(),
            phase: invocation.phase,
            worker: invocation.worker_id,
        });
        let failure = self
            .failures
            .iter()
            .find(|(action, _)| *action == invocation.action);
        match failure {
            Some((_, code)) => Ok(ActionOutcome::failed(*code)),
            None => {
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                Ok(ActionOutcome::success())
            }
        }
    }
}

struct Workspace {
    temp: TempDir,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl Workspace {
    fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        fs::create_dir_all(temp.path().join("data/environments")).expect("Failed to create environments");
        fs::write(temp.path().join("data/environments/dev.meta"), "REGION=\"eu\"\n")
            .expect("Failed to write env meta");
        Self {
            temp,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn manifest(&self, relative: &str, content: &str) -> &Self {
        let path = self.temp.path().join("data/nodes").join(relative);
        fs::create_dir_all(path.parent().unwrap()).expect("Failed to create nodes dir");
        fs::write(path, content).expect("Failed to write manifest");
        self
    }

    fn root(&self) -> &Path {
        self.temp.path()
    }

    fn config(&self) -> OrchestratorConfig {
        OrchestratorConfig::new(self.root().join("data"), "dev").with_state_dir(self.root().join("state"))
    }

    fn registry(&self, failures: &[(&str, i32)]) -> ExecutorRegistry {
        self.slow_registry(failures, Duration::ZERO)
    }

    fn slow_registry(&self, failures: &[(&str, i32)], delay: Duration) -> ExecutorRegistry {
        let mut registry = ExecutorRegistry::new();
        for node_type in ["App", "Database"] {
            registry.register(Arc::new(RecordingExecutor {
                node_type: node_type.to_string(),
                calls: self.calls.clone(),
                failures: failures.iter().map(|(a, c)| (a.to_string(), *c)).collect(),
                delay,
            }));
        }
        registry
    }

    async fn run(&self, config: OrchestratorConfig) -> Result<RunOutcome, OrchestratorError> {
        Orchestrator::new(config, self.registry(&[])).run().await
    }

    async fn complete(&self, config: OrchestratorConfig) -> RunSummary {
        match self.run(config).await.expect("Run failed") {
            RunOutcome::Completed(summary) => summary,
            other => panic!("expected a completed run, got {other:?}"),
        }
    }

    fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    fn called_nodes(&self) -> Vec<String> {
        self.take_calls().into_iter().map(|c| c.node).collect()
    }

    /// `a -> b -> c`, each starting in phase 1.
    fn chain(&self) -> &Self {
        self.manifest(
            "team/a.yaml",
            "name: a\ntype: App\ndependencies:\n  App: [b]\nactions:\n  start:\n    phases: [1]\n",
        )
        .manifest(
            "team/b.yaml",
            "name: b\ntype: App\ndependencies:\n  Database: [c]\nactions:\n  start:\n    phases: [1]\n",
        )
        .manifest(
            "db/c.yaml",
            "name: c\ntype: Database\nactions:\n  start:\n    phases: [1]\n",
        )
    }
}

mod ordering {
    use super::*;

    #[tokio::test]
    async fn test_serial_runs_dependencies_first() {
        let ws = Workspace::new();
        ws.chain();

        let summary = ws.complete(ws.config()).await;
        assert_eq!(summary.phases, vec![1]);
        assert_eq!(summary.invocations, 3);
        let calls = ws.take_calls();
        assert_eq!(
            calls.iter().map(|c| c.node.as_str()).collect::<Vec<_>>(),
            vec!["c", "b", "a"]
        );
        assert!(calls.iter().all(|c| c.worker == 0));
    }

    #[tokio::test]
    async fn test_waves_run_dependencies_first() {
        let ws = Workspace::new();
        ws.chain();

        let summary = ws.complete(ws.config().with_max_workers(3)).await;
        assert_eq!(summary.succeeded, 3);
        let calls = ws.take_calls();
        assert_eq!(
            calls.iter().map(|c| c.node.as_str()).collect::<Vec<_>>(),
            vec!["c", "b", "a"]
        );
        assert!(calls.iter().all(|c| c.worker >= 1));

        let audit = fs::read_to_string(ws.root().join("state/logs/thread_logs/nodes_to_exec.csv"))
            .expect("Failed to read wave audit");
        let rows: Vec<&str> = audit.lines().collect();
        assert_eq!(rows[0], "timestamp,wave,type,node");
        assert!(rows[1].ends_with(",1,Database,c"));
        assert!(rows[3].ends_with(",3,App,a"));
    }

    #[tokio::test]
    async fn test_wave_audit_follows_thread_log_dir() {
        let ws = Workspace::new();
        ws.chain();
        let threads = ws.root().join("threads");

        ws.complete(ws.config().with_max_workers(2).with_thread_log_dir(Some(threads.clone())))
            .await;
        assert!(threads.join("nodes_to_exec.csv").is_file());
        assert!(!ws.root().join("state/logs/thread_logs").exists());
    }

    #[tokio::test]
    async fn test_independent_nodes_share_a_wave() {
        let ws = Workspace::new();
        ws.manifest(
            "api.yaml",
            "name: api\ntype: App\ndependencies:\n  Database: [db]\nactions:\n  start:\n    phases: [1]\n",
        )
        .manifest(
            "worker.yaml",
            "name: worker\ntype: App\ndependencies:\n  Database: [db]\nactions:\n  start:\n    phases: [1]\n",
        )
        .manifest("db.yaml", "name: db\ntype: Database\nactions:\n  start:\n    phases: [1]\n");

        ws.complete(ws.config().with_max_workers(2)).await;
        let nodes = ws.called_nodes();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0], "db");
    }
}

mod resumption {
    use super::*;

    fn single_node(ws: &Workspace) {
        ws.manifest(
            "d.yaml",
            "name: d\ntype: App\ndependencies:\n  Database: [store]\nactions:\n  start:\n    phases: [1]\n",
        )
        .manifest("store.yaml", "name: store\ntype: Database\n");
    }

    #[tokio::test]
    async fn test_marker_prevents_second_invocation() {
        let ws = Workspace::new();
        single_node(&ws);
        let config = ws.config().with_phase(PhaseSelection::Single(1));

        let first = ws.complete(config.clone()).await;
        assert_eq!(first.invocations, 1);
        assert_eq!(ws.take_calls()[0].action, "start");
        assert!(ws.root().join("state/logs/executed_nodes/d-dev-1-start").exists());

        let second = ws.complete(config.clone()).await;
        assert_eq!(second.invocations, 0);
        assert!(ws.take_calls().is_empty());

        let restarted = ws.complete(config.with_restart(true)).await;
        assert_eq!(restarted.invocations, 1);
    }

    #[tokio::test]
    async fn test_force_reruns_completed_actions() {
        let ws = Workspace::new();
        single_node(&ws);
        ws.complete(ws.config()).await;
        ws.take_calls();

        ws.complete(ws.config().with_force(true)).await;
        assert_eq!(ws.called_nodes(), vec!["d"]);
    }
}

mod failures {
    use super::*;

    #[tokio::test]
    async fn test_preflight_failures_are_collected() {
        let ws = Workspace::new();
        ws.chain();

        let orchestrator = Orchestrator::new(ws.config().with_preflight(true), ws.registry(&[("preflight", 1)]));
        let RunOutcome::Completed(summary) = orchestrator.run().await.expect("Preflight run failed") else {
            panic!("expected a completed run");
        };
        assert_eq!(summary.phases, vec![0]);
        assert_eq!(summary.invocations, 3);
        assert_eq!(summary.failed_preflight.len(), 3);
        assert!(summary.failed_preflight.contains("a"));
        assert!(ws.root().join("state/logs/failed_preflight/App_a").exists());
        assert!(ws.take_calls().iter().all(|c| c.action == "preflight" && c.phase == 0));
    }

    #[tokio::test]
    async fn test_action_failure_stops_the_run() {
        let ws = Workspace::new();
        ws.chain();

        let orchestrator = Orchestrator::new(ws.config(), ws.registry(&[("start", 3)]));
        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ActionFailed { ref node, .. } if node == "c"));
        assert_eq!(err.exit_code(), 3);
        assert_eq!(ws.called_nodes(), vec!["c"]);
    }

    #[tokio::test]
    async fn test_wave_failure_stops_later_waves() {
        let ws = Workspace::new();
        ws.chain();

        let orchestrator = Orchestrator::new(
            ws.config().with_max_workers(2),
            ws.registry(&[("start", 3)]),
        );
        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ActionFailed { ref node, .. } if node == "c"));
        assert_eq!(err.exit_code(), 3);
        assert_eq!(ws.called_nodes(), vec!["c"]);
        assert!(!ws.root().join("state/logs/executed_nodes/c-dev-1-start").exists());
    }

    #[tokio::test]
    async fn test_wave_failure_stops_idle_workers() {
        let ws = Workspace::new();
        ws.manifest(
            "api.yaml",
            "name: api\ntype: App\ndependencies:\n  Database: [db1, db2, db3, db4]\nactions:\n  start:\n    phases: [1]\n",
        );
        ws.manifest("db1.yaml", "name: db1\ntype: Database\nactions:\n  cutover:\n    phases: [1]\n");
        for name in ["db2", "db3", "db4"] {
            ws.manifest(
                &format!("{name}.yaml"),
                &format!("name: {name}\ntype: Database\nactions:\n  start:\n    phases: [1]\n"),
            );
        }

        // db1 fails at once while the other worker is busy with db2.
        let orchestrator = Orchestrator::new(
            ws.config().with_max_workers(2),
            ws.slow_registry(&[("cutover", 4)], Duration::from_millis(500)),
        );
        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ActionFailed { ref node, .. } if node == "db1"));
        assert_eq!(err.exit_code(), 4);

        let mut nodes = ws.called_nodes();
        nodes.sort();
        assert_eq!(nodes, vec!["db1", "db2"]);
        assert!(ws.root().join("state/logs/executed_nodes/db2-dev-1-start").exists());
    }

    #[tokio::test]
    async fn test_force_continues_past_failures() {
        let ws = Workspace::new();
        ws.chain();

        let orchestrator = Orchestrator::new(ws.config().with_force(true), ws.registry(&[("start", 3)]));
        let RunOutcome::Completed(summary) = orchestrator.run().await.expect("Forced run failed") else {
            panic!("expected a completed run");
        };
        assert_eq!(summary.tolerated, 3);
        assert!(!ws.root().join("state/logs/executed_nodes/a-dev-1-start").exists());
    }

    #[tokio::test]
    async fn test_unknown_environment() {
        let ws = Workspace::new();
        ws.chain();

        let config = OrchestratorConfig::new(ws.root().join("data"), "qa").with_state_dir(ws.root().join("state"));
        let err = ws.run(config).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownEnvironment { .. }));
        assert_eq!(err.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_missing_executor_fails_before_dispatch() {
        let ws = Workspace::new();
        ws.chain()
            .manifest("q.yaml", "name: q\ntype: Queue\ndependencies:\n  App: [a]\n");

        let err = ws.run(ws.config()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Executor(_)));
        assert!(ws.take_calls().is_empty());
    }
}

mod validation {
    use super::*;

    fn conflicting(ws: &Workspace) {
        fs::write(ws.root().join("data/environments/prod.meta"), "").expect("Failed to write env meta");
        ws.chain()
            .manifest(
                "legacy.yaml",
                "name: legacy\ntype: App\nenvironments: [dev]\ndependencies:\n  App: [prod-only]\nactions:\n  start:\n    phases: [1]\n",
            )
            .manifest(
                "prod-only.yaml",
                "name: prod-only\ntype: App\nenvironments: [prod]\nactions:\n  start:\n    phases: [1]\n",
            );
    }

    #[tokio::test]
    async fn test_conflict_is_fatal_without_force() {
        let ws = Workspace::new();
        conflicting(&ws);

        let err = ws.run(ws.config()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Graph(graph::GraphError::Conflicts { .. })));
        assert!(ws.take_calls().is_empty());
    }

    #[tokio::test]
    async fn test_force_removes_conflicting_dependent() {
        let ws = Workspace::new();
        conflicting(&ws);

        ws.complete(ws.config().with_force(true)).await;
        let nodes = ws.called_nodes();
        assert_eq!(nodes, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_isolated_node_is_fatal_without_force() {
        let ws = Workspace::new();
        ws.chain()
            .manifest("loner.yaml", "name: loner\ntype: App\nactions:\n  start:\n    phases: [1]\n");

        let err = ws.run(ws.config()).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Graph(graph::GraphError::Isolated { ref nodes, .. }) if nodes == &vec!["loner".to_string()]
        ));
        assert_eq!(err.exit_code(), 1);
        assert!(ws.take_calls().is_empty());

        ws.complete(ws.config().with_force(true)).await;
        assert_eq!(ws.called_nodes(), vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_cycle_is_fatal_even_with_force() {
        let ws = Workspace::new();
        ws.manifest("x.yaml", "name: x\ntype: App\ndependencies:\n  App: [y]\n")
            .manifest("y.yaml", "name: y\ntype: App\ndependencies:\n  App: [x]\n");

        let err = ws.run(ws.config().with_force(true)).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Graph(graph::GraphError::Cycles { .. })));
    }

    #[tokio::test]
    async fn test_produced_target_stays_virtual_and_is_never_invoked() {
        let ws = Workspace::new();
        ws.manifest(
            "producer.yaml",
            "name: producer\ntype: App\nproduces: [topic]\nactions:\n  start:\n    phases: [1]\n",
        )
        .manifest(
            "consumer.yaml",
            "name: consumer\ntype: App\ndependencies:\n  App: [producer]\n  Topic: [topic]\nactions:\n  start:\n    phases: [1]\n",
        );

        ws.complete(ws.config()).await;
        let nodes = ws.called_nodes();
        assert_eq!(nodes.len(), 2);
        assert!(!nodes.contains(&"topic".to_string()));
        assert_eq!(nodes.last().map(String::as_str), Some("consumer"));
    }
}

mod modes {
    use super::*;

    #[tokio::test]
    async fn test_dryrun_virtualizes_and_suffixes() {
        let ws = Workspace::new();
        ws.manifest(
            "a.yaml",
            "name: a\ntype: App\ndependencies:\n  Database: [ghost]\nactions:\n  start:\n    phases: [1]\n",
        );

        let err = ws.run(ws.config()).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Graph(graph::GraphError::MissingDependencies(_))
        ));

        let summary = ws.complete(ws.config().with_dryrun(true)).await;
        assert_eq!(summary.phases, vec![0, 1]);
        let calls = ws.take_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].action, "startdryrun");
        let executed = fs::read_dir(ws.root().join("state/logs/executed_nodes"))
            .expect("Failed to list markers")
            .count();
        assert_eq!(executed, 0);
    }

    #[tokio::test]
    async fn test_dryrun_leaves_no_markers() {
        let ws = Workspace::new();
        ws.chain();
        let config = ws.config().with_dryrun(true).with_max_workers(2);

        let summary = ws.complete(config.clone()).await;
        assert_eq!(summary.succeeded, 3);
        let calls = ws.take_calls();
        assert_eq!(
            calls.iter().map(|c| c.node.as_str()).collect::<Vec<_>>(),
            vec!["c", "b", "a"]
        );
        assert!(calls.iter().all(|c| c.action == "startdryrun"));
        let executed = fs::read_dir(ws.root().join("state/logs/executed_nodes"))
            .expect("Failed to list markers")
            .count();
        assert_eq!(executed, 0);

        // Nothing was marked, so a second dry run invokes everything again.
        let again = ws.complete(config).await;
        assert_eq!(again.invocations, 3);
    }

    #[tokio::test]
    async fn test_forced_single_action_runs_in_phase_zero() {
        let ws = Workspace::new();
        ws.chain();

        let config = ws
            .config()
            .with_single_action(Some("restart".into()))
            .with_force(true)
            .with_filter(NodeFilter::default().with_single("b"));
        let summary = ws.complete(config).await;
        assert_eq!(summary.phases, vec![0]);
        assert_eq!(
            ws.take_calls(),
            vec![Call {
                node: "b".into(),
                action: "restart".into(),
                phase: 0,
                worker: 0
            }]
        );
    }

    #[tokio::test]
    async fn test_node_type_filter() {
        let ws = Workspace::new();
        ws.chain();

        let config = ws.config().with_filter(NodeFilter::default().with_node_type("Database"));
        let summary = ws.complete(config).await;
        assert_eq!(summary.skipped, 2);
        assert_eq!(ws.called_nodes(), vec!["c"]);
    }

    #[tokio::test]
    async fn test_query_and_inspect_do_not_execute() {
        let ws = Workspace::new();
        ws.chain().manifest("dup/c.yaml", "name: c\ntype: Database\n");

        let outcome = ws
            .run(ws.config().with_query(Some("type=App,phase=1".into())))
            .await
            .expect("Query failed");
        let RunOutcome::Queried(names) = outcome else {
            panic!("expected query results");
        };
        assert_eq!(names, vec!["a", "b"]);

        let outcome = ws.run(ws.config().with_inspect(true)).await.expect("Inspect failed");
        let RunOutcome::Inspected(report) = outcome else {
            panic!("expected an inspection report");
        };
        assert_eq!(report.repeated["c"].len(), 2);
        assert!(!report.is_clean());
        assert!(ws.take_calls().is_empty());
    }

    #[tokio::test]
    async fn test_charts_only_exports_graph() {
        let ws = Workspace::new();
        ws.chain();

        let outcome = ws
            .run(ws.config().with_charts_only(true))
            .await
            .expect("Chart export failed");
        let RunOutcome::ChartsExported(path) = outcome else {
            panic!("expected a chart export");
        };
        let dot = fs::read_to_string(path).expect("Failed to read graph");
        assert!(dot.contains("digraph"));
        assert!(ws.take_calls().is_empty());
    }

    #[tokio::test]
    async fn test_processes_run_after_phase() {
        let ws = Workspace::new();
        ws.chain();
        let out = ws.root().join("processed");
        let processes = ws.root().join("data/processes/Phase 1");
        fs::create_dir_all(&processes).expect("Failed to create processes dir");
        fs::write(
            processes.join("notify.yaml"),
            format!("actions:\n  - echo done > '{}'\n", out.display()),
        )
        .expect("Failed to write process");

        ws.complete(ws.config()).await;
        assert_eq!(fs::read_to_string(out).expect("Process did not run"), "done\n");
    }
}

#[cfg(unix)]
mod scripts {
    use super::*;

    #[tokio::test]
    async fn test_script_interface_receives_env_file() {
        let ws = Workspace::new();
        ws.manifest(
            "api.yaml",
            "name: api\ntype: App\ndependencies:\n  App: [cache]\nactions:\n  start:\n    phases: [1]\n",
        )
        .manifest("cache.yaml", "name: cache\ntype: App\n");

        let interfaces = ws.root().join("interfaces");
        fs::create_dir_all(&interfaces).expect("Failed to create interfaces dir");
        let out = ws.root().join("seen");
        fs::write(
            interfaces.join("App.sh"),
            format!(
                "echo \"$1\" >> '{out}'\ngrep REGION \"$CUTOVER_ENV_FILE\" >> '{out}'\n",
                out = out.display()
            ),
        )
        .expect("Failed to write interface");

        let registry = ExecutorRegistry::discover(&interfaces).expect("Failed to discover interfaces");
        let outcome = Orchestrator::new(ws.config().with_interfaces_dir(&interfaces), registry)
            .run()
            .await
            .expect("Run failed");
        assert!(matches!(outcome, RunOutcome::Completed(_)));

        let seen = fs::read_to_string(out).expect("Interface did not run");
        assert_eq!(seen, "start\nREGION=\"eu\"\n");
        assert!(ws.root().join("state/.meta/api-thread0.env").exists());
    }

    fn echo_interfaces(ws: &Workspace) -> std::path::PathBuf {
        ws.manifest(
            "api.yaml",
            "name: api\ntype: App\ndependencies:\n  App: [cache]\nactions:\n  start:\n    phases: [1]\n",
        )
        .manifest("cache.yaml", "name: cache\ntype: App\nactions:\n  start:\n    phases: [1]\n");

        let interfaces = ws.root().join("interfaces");
        fs::create_dir_all(&interfaces).expect("Failed to create interfaces dir");
        fs::write(interfaces.join("App.sh"), "echo \"ran $1\"\n").expect("Failed to write interface");
        interfaces
    }

    fn worker_logs(ws: &Workspace) -> Vec<String> {
        let mut logs: Vec<String> = fs::read_dir(ws.root().join("state/logs/thread_logs"))
            .expect("Failed to list thread logs")
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("worker-"))
            .collect();
        logs.sort();
        logs
    }

    #[tokio::test]
    async fn test_worker_logs_written_only_in_parallel() {
        let ws = Workspace::new();
        let interfaces = echo_interfaces(&ws);
        let config = ws.config().with_interfaces_dir(&interfaces);

        let registry = ExecutorRegistry::discover(&interfaces).expect("Failed to discover interfaces");
        Orchestrator::new(config.clone(), registry)
            .run()
            .await
            .expect("Serial run failed");
        assert!(worker_logs(&ws).is_empty());

        let registry = ExecutorRegistry::discover(&interfaces).expect("Failed to discover interfaces");
        Orchestrator::new(config.with_max_workers(2).with_restart(true), registry)
            .run()
            .await
            .expect("Parallel run failed");
        // One node per wave, so worker 1 takes both.
        assert_eq!(worker_logs(&ws), vec!["worker-1-phase1.log"]);
        let log = fs::read_to_string(ws.root().join("state/logs/thread_logs/worker-1-phase1.log"))
            .expect("Failed to read worker log");
        assert_eq!(log, "ran start\nran start\n");
    }
}
