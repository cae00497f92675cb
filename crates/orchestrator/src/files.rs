//! On-disk layout of a run.
//!
//! Everything lives under the state directory:
//! `logs/executed_nodes/`, `logs/failed_preflight/`, `logs/thread_logs/`,
//! `logs/locks/`, `.meta/`, plus the run log and exported graphs in `logs/`.
//! The thread log directory can be moved elsewhere.

use chrono::Local;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use cutover_core::NodeSet;
use graph::{DependencyGraph, WavePlan};

use crate::error::Result;

const LOGS_DIR: &str = "logs";
const EXECUTED_DIR: &str = "executed_nodes";
const FAILED_PREFLIGHT_DIR: &str = "failed_preflight";
const THREAD_LOGS_DIR: &str = "thread_logs";
const LOCKS_DIR: &str = "locks";
const META_DIR: &str = ".meta";
const WAVE_AUDIT_FILE: &str = "nodes_to_exec.csv";
const RUN_LOG_FILE: &str = "cutover.log";

#[derive(Debug, Clone)]
pub struct RunPaths {
    root: PathBuf,
    thread_logs: Option<PathBuf>,
}

impl RunPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            thread_logs: None,
        }
    }

    /// Put worker logs and the wave audit in `dir` instead of
    /// `logs/thread_logs/`.
    pub fn with_thread_logs_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.thread_logs = dir;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    pub fn executed_dir(&self) -> PathBuf {
        self.logs_dir().join(EXECUTED_DIR)
    }

    pub fn failed_preflight_dir(&self) -> PathBuf {
        self.logs_dir().join(FAILED_PREFLIGHT_DIR)
    }

    pub fn thread_logs_dir(&self) -> PathBuf {
        match &self.thread_logs {
            Some(dir) => dir.clone(),
            None => self.logs_dir().join(THREAD_LOGS_DIR),
        }
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.logs_dir().join(LOCKS_DIR)
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.root.join(META_DIR)
    }

    pub fn run_log(&self) -> PathBuf {
        self.logs_dir().join(RUN_LOG_FILE)
    }

    pub fn wave_audit(&self) -> PathBuf {
        self.thread_logs_dir().join(WAVE_AUDIT_FILE)
    }

    pub fn worker_log(&self, worker_id: usize, phase: u32) -> PathBuf {
        self.thread_logs_dir()
            .join(format!("worker-{worker_id}-phase{phase}.log"))
    }

    pub fn graph_dot(&self, environment: &str) -> PathBuf {
        self.logs_dir().join(format!("graph-{environment}.dot"))
    }

    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.executed_dir(),
            self.failed_preflight_dir(),
            self.thread_logs_dir(),
            self.locks_dir(),
            self.meta_dir(),
        ] {
            fs::create_dir_all(&dir).await?;
        }
        debug!(root = %self.root.display(), "State directories ready");
        Ok(())
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Append the wave plan to the audit trail, one row per node with a 1-based
/// wave index. The header is written when the file is new.
pub async fn append_wave_audit(path: &Path, plan: &WavePlan, nodes: &NodeSet) -> Result<()> {
    let exists = fs::try_exists(path).await.unwrap_or(false);
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

    let mut content = String::new();
    if !exists {
        content.push_str("timestamp,wave,type,node\n");
    }
    for (idx, wave) in plan.waves().iter().enumerate() {
        for name in wave {
            let node_type = nodes.get(name).map(|n| n.node_type.as_str()).unwrap_or_default();
            content.push_str(&format!(
                "{},{},{},{}\n",
                timestamp,
                idx + 1,
                csv_field(node_type),
                csv_field(name)
            ));
        }
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await?;
    debug!(path = %path.display(), waves = plan.len(), "Wave plan recorded");
    Ok(())
}

/// Write the graph as Graphviz DOT.
pub async fn write_graph_dot(path: &Path, graph: &DependencyGraph) -> Result<()> {
    fs::write(path, graph.to_dot()).await?;
    info!(path = %path.display(), environment = graph.environment(), "Graph exported");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutover_core::Node;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_ensure_dirs() {
        let temp = TempDir::new().unwrap();
        let paths = RunPaths::new(temp.path());
        paths.ensure_dirs().await.unwrap();
        assert!(paths.executed_dir().is_dir());
        assert!(paths.failed_preflight_dir().is_dir());
        assert!(paths.locks_dir().is_dir());
        assert!(paths.meta_dir().is_dir());
        assert_eq!(
            paths.worker_log(2, 1),
            temp.path().join("logs/thread_logs/worker-2-phase1.log")
        );
    }

    #[tokio::test]
    async fn test_thread_logs_override() {
        let temp = TempDir::new().unwrap();
        let threads = temp.path().join("elsewhere/threads");
        let paths = RunPaths::new(temp.path().join("state")).with_thread_logs_dir(Some(threads.clone()));
        paths.ensure_dirs().await.unwrap();

        assert!(threads.is_dir());
        assert!(!temp.path().join("state/logs/thread_logs").exists());
        assert_eq!(paths.worker_log(1, 3), threads.join("worker-1-phase3.log"));
        assert_eq!(paths.wave_audit(), threads.join("nodes_to_exec.csv"));
        assert_eq!(paths.run_log(), temp.path().join("state/logs/cutover.log"));
    }

    #[tokio::test]
    async fn test_wave_audit_rows() {
        let temp = TempDir::new().unwrap();
        let paths = RunPaths::new(temp.path());
        paths.ensure_dirs().await.unwrap();

        let mut graph = DependencyGraph::new("dev");
        graph.add_edge("api", "db", false);
        let plan = WavePlan::plan(&graph);
        let nodes: NodeSet = vec![Node::new("api", "App"), Node::new("db", "Database")]
            .into_iter()
            .collect();

        append_wave_audit(&paths.wave_audit(), &plan, &nodes).await.unwrap();
        append_wave_audit(&paths.wave_audit(), &plan, &nodes).await.unwrap();

        let content = std::fs::read_to_string(paths.wave_audit()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "timestamp,wave,type,node");
        assert!(lines[1].ends_with(",1,Database,db"));
        assert!(lines[2].ends_with(",2,App,api"));
    }

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
