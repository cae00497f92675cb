use petgraph::algo::tarjan_scc;
use petgraph::dot::{Config, Dot};
use petgraph::stable_graph::{EdgeReference, NodeIndex, StableDiGraph};
use petgraph::visit::{Dfs, EdgeRef, IntoEdgeReferences};
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

use cutover_core::NodeSet;

use crate::error::Result;

/// Edge payload: `conflicts` is set when the source is active in the
/// environment but the target is not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DependencyEdge {
    pub conflicts: bool,
}

impl fmt::Display for DependencyEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.conflicts {
            write!(f, "conflicts")
        } else {
            Ok(())
        }
    }
}

/// Directed graph of one environment; `A -> B` means A depends on B.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    environment: String,
    graph: StableDiGraph<String, DependencyEdge>,
    index: BTreeMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            graph: StableDiGraph::new(),
            index: BTreeMap::new(),
        }
    }

    /// Build the graph of `environment`.
    ///
    /// Every node active in the environment becomes a vertex. Every dependency
    /// reference of an active node that applies in the environment becomes an
    /// edge, tagged as a conflict when its target is inactive; the inactive
    /// target is added as a vertex so the conflict is visible. References to
    /// unknown names are left out; they are reported as missing dependencies.
    pub fn build(nodes: &NodeSet, environment: &str) -> Result<Self> {
        let mut graph = Self::new(environment);

        for node in nodes.iter() {
            if nodes.is_active(&node.name, environment)? {
                graph.add_node(&node.name);
            }
        }

        for node in nodes.iter() {
            if !nodes.is_active(&node.name, environment)? {
                continue;
            }
            for dependency in node.dependency_refs() {
                if !dependency.applies_in(environment) {
                    continue;
                }
                let target = dependency.name();
                if !nodes.contains(target) {
                    debug!(node = %node.name, dependency = %target, "Skipping edge to unknown node");
                    continue;
                }
                let conflicts = !nodes.is_active(target, environment)?;
                graph.add_edge(&node.name, target, conflicts);
            }
        }

        debug!(
            environment,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Graph built"
        );
        Ok(graph)
    }

    /// Graph of every node and every dependency reference to a known name,
    /// regardless of environment. Used for queries that name no environment.
    pub fn build_unscoped(nodes: &NodeSet) -> Self {
        let mut graph = Self::new("*");
        for node in nodes.iter() {
            graph.add_node(&node.name);
        }
        for node in nodes.iter() {
            for target in node.dependency_names() {
                if nodes.contains(target) {
                    graph.add_edge(&node.name, target, false);
                }
            }
        }
        graph
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn add_node(&mut self, name: &str) -> NodeIndex {
        if let Some(idx) = self.index.get(name) {
            return *idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.index.insert(name.to_string(), idx);
        idx
    }

    /// Add `from -> to`, creating either vertex as needed.
    pub fn add_edge(&mut self, from: &str, to: &str, conflicts: bool) {
        let from = self.add_node(from);
        let to = self.add_node(to);
        if let Some(existing) = self.graph.find_edge(from, to) {
            if let Some(edge) = self.graph.edge_weight_mut(existing) {
                edge.conflicts |= conflicts;
            }
            return;
        }
        self.graph.add_edge(from, to, DependencyEdge { conflicts });
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Node names in name order.
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }

    fn name(&self, idx: NodeIndex) -> &str {
        self.graph.node_weight(idx).map(String::as_str).unwrap_or_default()
    }

    fn neighbors(&self, name: &str, direction: Direction) -> BTreeSet<&str> {
        self.index
            .get(name)
            .map(|idx| {
                self.graph
                    .neighbors_directed(*idx, direction)
                    .map(|n| self.name(n))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// What `name` depends on.
    pub fn dependencies_of(&self, name: &str) -> BTreeSet<&str> {
        self.neighbors(name, Direction::Outgoing)
    }

    /// What depends on `name`.
    pub fn dependents_of(&self, name: &str) -> BTreeSet<&str> {
        self.neighbors(name, Direction::Incoming)
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        match (self.index.get(from), self.index.get(to)) {
            (Some(a), Some(b)) => self.graph.contains_edge(*a, *b),
            _ => false,
        }
    }

    /// Every edge as `(source, target, conflicts)`, sorted.
    pub fn edges(&self) -> Vec<(&str, &str, bool)> {
        let mut edges: Vec<_> = self
            .graph
            .edge_references()
            .map(|e| (self.name(e.source()), self.name(e.target()), e.weight().conflicts))
            .collect();
        edges.sort();
        edges
    }

    /// Edges tagged as conflicts, as `(source, target)`.
    pub fn conflicting_edges(&self) -> Vec<(String, String)> {
        self.edges()
            .into_iter()
            .filter(|(_, _, conflicts)| *conflicts)
            .map(|(from, to, _)| (from.to_string(), to.to_string()))
            .collect()
    }

    /// Nodes with neither dependencies nor dependents.
    pub fn isolated_nodes(&self) -> Vec<String> {
        self.index
            .iter()
            .filter(|(_, idx)| {
                self.graph
                    .neighbors_directed(**idx, Direction::Outgoing)
                    .next()
                    .is_none()
                    && self
                        .graph
                        .neighbors_directed(**idx, Direction::Incoming)
                        .next()
                        .is_none()
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Closed cycles: every strongly connected component with more than one
    /// node, plus self-loops. Each cycle is sorted by name.
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let mut cycles: Vec<Vec<String>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .map(|idx| self.graph.contains_edge(*idx, *idx))
                        .unwrap_or(false)
            })
            .map(|component| {
                let mut names: Vec<String> =
                    component.into_iter().map(|idx| self.name(idx).to_string()).collect();
                names.sort();
                names
            })
            .collect();
        cycles.sort();
        cycles
    }

    /// `root` and everything it depends on, directly or transitively.
    /// Empty when `root` is not in the graph.
    pub fn dependency_tree(&self, root: &str) -> BTreeSet<&str> {
        let Some(start) = self.index.get(root) else {
            return BTreeSet::new();
        };
        let mut tree = BTreeSet::new();
        let mut dfs = Dfs::new(&self.graph, *start);
        while let Some(idx) = dfs.next(&self.graph) {
            tree.insert(self.name(idx));
        }
        tree
    }

    /// Remove the named nodes and their edges. Returns the names removed.
    pub fn remove_nodes<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut removed = Vec::new();
        for name in names {
            if let Some(idx) = self.index.remove(name) {
                self.graph.remove_node(idx);
                removed.push(name.to_string());
            }
        }
        removed
    }

    /// Graphviz rendering; conflicting edges are drawn red and dashed.
    pub fn to_dot(&self) -> String {
        let edge_attrs = |_: &StableDiGraph<String, DependencyEdge>,
                          edge: EdgeReference<'_, DependencyEdge>| {
            if edge.weight().conflicts {
                "color = red, style = dashed".to_string()
            } else {
                String::new()
            }
        };
        let node_attrs = |_: &StableDiGraph<String, DependencyEdge>, _: (NodeIndex, &String)| String::new();
        format!(
            "{}",
            Dot::with_attr_getters(&self.graph, &[Config::EdgeNoLabel], &edge_attrs, &node_attrs)
        )
    }

    pub(crate) fn inner(&self) -> &StableDiGraph<String, DependencyEdge> {
        &self.graph
    }
}
