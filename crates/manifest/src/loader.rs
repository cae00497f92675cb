//! Node manifest discovery.
//!
//! Every `.yaml`/`.yml` file under the nodes root holds one node definition.
//! Loading indexes all definitions by name, including the virtual
//! placeholders synthesized from `produces`, without applying the uniqueness
//! rules; [`ManifestIndex::resolve`] applies them. Keeping the raw index
//! around lets inspection report every repeated definition in one pass.

use indexmap::IndexMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use cutover_core::{DependencyRef, EnvironmentFlags, Node, NodeSet};

use crate::error::{ManifestError, Result};

/// Meta key recording the owning team (directory of the manifest).
pub const TEAM_META_KEY: &str = "team";

/// Every definition found under a nodes root, grouped by name in load order.
#[derive(Debug, Clone, Default)]
pub struct ManifestIndex {
    definitions: IndexMap<String, Vec<Node>>,
    skipped: Vec<PathBuf>,
}

impl ManifestIndex {
    fn push(&mut self, node: Node) {
        self.definitions
            .entry(node.name.clone())
            .or_default()
            .push(node);
    }

    /// Files that could not be parsed and were skipped.
    pub fn skipped(&self) -> &[PathBuf] {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Every definition, virtual placeholders included.
    pub fn definitions(&self) -> impl Iterator<Item = &Node> {
        self.definitions.values().flatten()
    }

    /// Real definitions only.
    pub fn real_definitions(&self) -> impl Iterator<Item = &Node> {
        self.definitions().filter(|node| !node.is_virtual())
    }

    /// Whether some definition, real or virtual, carries this name.
    pub fn is_defined(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Apply the uniqueness rules and produce the run's node set.
    pub fn resolve(&self) -> Result<NodeSet> {
        let mut nodes = NodeSet::new();
        for node in self.definitions() {
            let outcome = nodes.insert(node.clone())?;
            debug!(node = %node.name, ?outcome, "Node added to set");
        }
        Ok(nodes)
    }

    /// One node per name for inspection: the first real definition, or the
    /// placeholder when only virtual ones exist. Never fails on duplicates.
    pub fn resolve_lenient(&self) -> NodeSet {
        self.definitions
            .values()
            .filter_map(|defs| {
                defs.iter()
                    .find(|node| !node.is_virtual())
                    .or_else(|| defs.first())
                    .cloned()
            })
            .collect()
    }
}

/// Reads node manifests from a directory tree.
pub struct NodeLoader {
    root: PathBuf,
}

impl NodeLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load and index every manifest under the root.
    ///
    /// A malformed file is logged and skipped; it never fails the load.
    pub fn load(&self) -> Result<ManifestIndex> {
        if !self.root.is_dir() {
            return Err(ManifestError::DirectoryNotFound(self.root.clone()));
        }
        debug!(root = %self.root.display(), "Loading nodes");

        let mut index = ManifestIndex::default();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() || !is_yaml(entry.path()) {
                continue;
            }

            match self.read_node(entry.path()) {
                Ok(Some(node)) => self.add_definition(&mut index, node),
                Ok(None) => debug!(path = %entry.path().display(), "Empty manifest skipped"),
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "Skipping malformed manifest");
                    index.skipped.push(entry.path().to_path_buf());
                }
            }
        }

        info!(
            nodes = index.len(),
            skipped = index.skipped.len(),
            "Manifests loaded"
        );
        Ok(index)
    }

    fn read_node(&self, path: &Path) -> Result<Option<Node>> {
        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(None);
        }
        let mut node: Node = serde_yaml::from_str(&content).map_err(|source| ManifestError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;

        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        node.file_name = relative.to_string_lossy().into_owned();
        if let Some(team) = relative
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
        {
            node.meta
                .entry(TEAM_META_KEY.to_string())
                .or_insert_with(|| team.to_string_lossy().into_owned().into());
        }
        Ok(Some(node))
    }

    /// Index a definition and a virtual placeholder for each produced target.
    fn add_definition(&self, index: &mut ManifestIndex, node: Node) {
        let declared = node.environments.active_names();
        let placeholders: Vec<Node> = node
            .produces
            .iter()
            .map(|output| {
                let environments = match output {
                    DependencyRef::Name(_) => EnvironmentFlags::active_in(declared.iter().cloned()),
                    DependencyRef::Scoped { environments, .. } => {
                        EnvironmentFlags::active_in(environments.iter().cloned())
                    }
                };
                Node::virtual_node(output.name(), environments, node.file_name.clone())
            })
            .collect();

        debug!(node = %node.name, file = %node.file_name, "Adding node");
        index.push(node);
        for placeholder in placeholders {
            debug!(node = %placeholder.name, "Adding virtual node");
            index.push(placeholder);
        }
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "yaml" | "yml"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, relative: &str, content: &str) {
        let path = dir.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_load_missing_directory() {
        let temp = TempDir::new().unwrap();
        let loader = NodeLoader::new(temp.path().join("nodes"));
        assert!(matches!(
            loader.load(),
            Err(ManifestError::DirectoryNotFound(_))
        ));
    }

    #[test]
    fn test_load_records_relative_file_and_team() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "payments/api.yaml", "name: api\ntype: App\n");

        let index = NodeLoader::new(temp.path()).load().unwrap();
        let nodes = index.resolve().unwrap();
        let api = nodes.get("api").unwrap();
        assert_eq!(api.file_name, "payments/api.yaml");
        assert_eq!(api.meta[TEAM_META_KEY], "payments");
    }

    #[test]
    fn test_malformed_file_is_skipped() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "good.yaml", "name: good\ntype: App\n");
        write(temp.path(), "bad.yml", "name: [unterminated\n");
        write(temp.path(), "notes.txt", "not a manifest");

        let index = NodeLoader::new(temp.path()).load().unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.skipped().len(), 1);
    }

    #[test]
    fn test_produces_creates_virtual_then_real_replaces() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "a-producer.yaml",
            "name: producer\ntype: App\nenvironments: [dev]\nproduces: [topic]\n",
        );
        write(temp.path(), "b-topic.yaml", "name: topic\ntype: Kafka\n");

        let index = NodeLoader::new(temp.path()).load().unwrap();
        let nodes = index.resolve().unwrap();
        assert_eq!(nodes.get("topic").unwrap().node_type, "Kafka");
    }

    #[test]
    fn test_produced_target_stays_virtual_when_undefined() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "producer.yaml",
            "name: producer\ntype: App\nenvironments: [dev]\nproduces: [topic]\n",
        );

        let nodes = NodeLoader::new(temp.path()).load().unwrap().resolve().unwrap();
        let topic = nodes.get("topic").unwrap();
        assert!(topic.is_virtual());
        assert_eq!(topic.active_in("dev"), Some(true));
    }

    #[test]
    fn test_duplicate_real_definitions() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a/api.yaml", "name: api\ntype: App\n");
        write(temp.path(), "b/api.yaml", "name: api\ntype: App\n");

        let index = NodeLoader::new(temp.path()).load().unwrap();
        assert_eq!(index.real_definitions().count(), 2);
        let lenient = index.resolve_lenient();
        assert_eq!(lenient.get("api").unwrap().file_name, "a/api.yaml");
        assert!(matches!(
            index.resolve(),
            Err(ManifestError::Core(cutover_core::CoreError::DuplicateNode { .. }))
        ));
    }
}
