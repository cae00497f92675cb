use indexmap::IndexMap;
use std::collections::BTreeSet;

use super::environment::EnvironmentFlags;
use super::node::{Node, ParentRef};
use crate::error::{CoreError, Result};

/// What happened when a node was offered to a [`NodeSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Added,
    /// A real definition replaced a virtual placeholder.
    ReplacedVirtual,
    /// A virtual placeholder was dropped because the name is already known.
    SkippedVirtual,
}

/// The resolved nodes of one run, keyed by name in load order.
#[derive(Debug, Clone, Default)]
pub struct NodeSet {
    nodes: IndexMap<String, Node>,
}

impl NodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, enforcing the uniqueness rules.
    ///
    /// Virtual placeholders never overwrite anything. A real node replaces a
    /// virtual one in place. Two real definitions with the same name are an
    /// error.
    pub fn insert(&mut self, node: Node) -> Result<InsertOutcome> {
        let Some(existing) = self.nodes.get_mut(&node.name) else {
            self.nodes.insert(node.name.clone(), node);
            return Ok(InsertOutcome::Added);
        };

        if node.is_virtual() {
            return Ok(InsertOutcome::SkippedVirtual);
        }
        if !existing.is_virtual() {
            return Err(CoreError::DuplicateNode {
                name: node.name.clone(),
                existing: existing.file_name.clone(),
                duplicate: node.file_name,
            });
        }

        *existing = node;
        Ok(InsertOutcome::ReplacedVirtual)
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn names(&self) -> BTreeSet<&str> {
        self.nodes.keys().map(String::as_str).collect()
    }

    /// Every name referenced from any `dependencies` list.
    pub fn dependency_names(&self) -> BTreeSet<&str> {
        self.nodes
            .values()
            .flat_map(|node| node.dependency_names())
            .collect()
    }

    /// Referenced names that resolve to no node.
    pub fn missing_dependencies(&self) -> BTreeSet<String> {
        self.dependency_names()
            .into_iter()
            .filter(|name| !self.nodes.contains_key(*name))
            .map(str::to_string)
            .collect()
    }

    /// Synthesize a virtual placeholder for every missing dependency.
    ///
    /// The placeholder is active wherever one of its referencing nodes is.
    /// Returns the names that were added.
    pub fn virtualize_missing(&mut self) -> Vec<String> {
        let missing = self.missing_dependencies();
        for name in &missing {
            let environments: BTreeSet<String> = self
                .nodes
                .values()
                .filter(|node| node.dependency_names().contains(name.as_str()))
                .flat_map(|node| node.environments.active_names())
                .collect();
            let referrer = self
                .nodes
                .values()
                .find(|node| node.dependency_names().contains(name.as_str()))
                .map(|node| node.file_name.clone())
                .unwrap_or_default();
            let placeholder =
                Node::virtual_node(name.clone(), EnvironmentFlags::active_in(environments), referrer);
            self.nodes.insert(name.clone(), placeholder);
        }
        missing.into_iter().collect()
    }

    /// Environment names declared by any manifest.
    pub fn manifest_environments(&self) -> BTreeSet<String> {
        self.nodes
            .values()
            .flat_map(|node| node.environments.names().map(str::to_string))
            .collect()
    }

    /// Resolve every node's flags against the full environment list.
    pub fn normalize_environments(&mut self, all: &BTreeSet<String>) {
        for node in self.nodes.values_mut() {
            node.environments.normalize(all);
        }
    }

    /// Fill `parents` (reverse edges) as seen from `environment`.
    pub fn find_parents(&mut self, environment: &str) {
        let edges: Vec<(String, String, String)> = self
            .nodes
            .values()
            .flat_map(|parent| {
                parent
                    .children_in(environment)
                    .into_iter()
                    .map(|child| {
                        (
                            child.to_string(),
                            parent.name.clone(),
                            parent.file_name.clone(),
                        )
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        for (child, parent, file) in edges {
            if let Some(node) = self.nodes.get_mut(&child) {
                node.parents.insert(parent, ParentRef { file });
            }
        }
    }

    /// Highest phase referenced by any action, or 1 when none is.
    pub fn max_phase(&self) -> u32 {
        self.nodes
            .values()
            .flat_map(|node| node.phases())
            .max()
            .unwrap_or(1)
    }

    /// Non-virtual nodes with no actions, by originating file.
    pub fn nodes_without_actions(&self) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|node| !node.is_virtual() && node.actions.is_empty())
            .collect()
    }

    /// Distinct non-virtual node types.
    pub fn node_types(&self) -> BTreeSet<&str> {
        self.nodes
            .values()
            .filter(|node| !node.is_virtual())
            .map(|node| node.node_type.as_str())
            .collect()
    }

    /// Activity of `name` in `environment`.
    pub fn is_active(&self, name: &str, environment: &str) -> Result<bool> {
        let node = self
            .nodes
            .get(name)
            .ok_or_else(|| CoreError::NodeNotFound(name.to_string()))?;
        node.active_in(environment)
            .ok_or_else(|| CoreError::UnknownEnvironment {
                node: name.to_string(),
                environment: environment.to_string(),
            })
    }
}

impl FromIterator<Node> for NodeSet {
    /// Collects without the duplicate check; later entries win.
    fn from_iter<I: IntoIterator<Item = Node>>(iter: I) -> Self {
        Self {
            nodes: iter.into_iter().map(|n| (n.name.clone(), n)).collect(),
        }
    }
}
