use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use cutover_core::NodeSet;

use crate::error::{ExecutorError, Result};
use crate::script::ScriptExecutor;
use crate::traits::ActionExecutor;

/// Node type -> executor mapping, checked against the node set before the
/// first dispatch.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: BTreeMap<String, Arc<dyn ActionExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one [`ScriptExecutor`] per file in `dir`, keyed by file stem
    /// (`Database.py` serves type `Database`). Files with a known script
    /// extension run through the matching interpreter.
    pub fn discover(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(ExecutorError::DirectoryNotFound(dir.to_path_buf()));
        }

        let mut registry = Self::new();
        let mut paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        paths.sort();

        for path in paths {
            let Some(node_type) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            if node_type.starts_with('.') || node_type.starts_with('_') {
                continue;
            }
            let mut executor = ScriptExecutor::new(&node_type, &path);
            match path.extension().and_then(|e| e.to_str()) {
                Some("py") => executor = executor.with_interpreter("python3"),
                Some("sh") | Some("bash") => executor = executor.with_interpreter("bash"),
                _ => {}
            }
            debug!(node_type = %node_type, path = %path.display(), "Discovered node interface");
            registry.register(Arc::new(executor));
        }

        info!(count = registry.len(), dir = %dir.display(), "Node interfaces loaded");
        Ok(registry)
    }

    /// Register an executor; a later registration for the same type wins.
    pub fn register(&mut self, executor: Arc<dyn ActionExecutor>) {
        self.executors.insert(executor.node_type().to_string(), executor);
    }

    pub fn get(&self, node_type: &str) -> Result<Arc<dyn ActionExecutor>> {
        self.executors
            .get(node_type)
            .cloned()
            .ok_or_else(|| ExecutorError::ExecutorNotFound(node_type.to_string()))
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.executors.contains_key(node_type)
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    pub fn node_types(&self) -> BTreeSet<&str> {
        self.executors.keys().map(String::as_str).collect()
    }

    /// Fail when a non-virtual node type has no executor.
    pub fn validate(&self, nodes: &NodeSet) -> Result<()> {
        let missing: Vec<String> = nodes
            .node_types()
            .into_iter()
            .filter(|node_type| !self.contains(node_type))
            .map(str::to_string)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ExecutorError::MissingExecutors(missing))
        }
    }
}
