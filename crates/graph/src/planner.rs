//! Execution order over a certified graph.
//!
//! Both modes run dependencies before dependents. With `A -> B -> C`
//! (A depends on B, B on C) the wave plan is `[{C}, {B}, {A}]` and the serial
//! order is `C, B, A`.

use petgraph::algo::toposort;
use std::collections::BTreeSet;
use tracing::debug;

use crate::dependency_graph::DependencyGraph;
use crate::error::{GraphError, Result};

/// Ordered batches of mutually independent nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WavePlan {
    waves: Vec<BTreeSet<String>>,
}

impl WavePlan {
    /// Leaves-first batching.
    ///
    /// Wave 0 holds the nodes without dependencies. Each following wave holds
    /// the nodes whose dependencies all sit in earlier waves. Planning stops
    /// when no further node qualifies, so nodes caught in a cycle never show
    /// up; certification rejects cycles before planning.
    pub fn plan(graph: &DependencyGraph) -> Self {
        let mut done: BTreeSet<String> = BTreeSet::new();
        let mut waves = Vec::new();

        loop {
            let wave: BTreeSet<String> = graph
                .node_names()
                .filter(|name| !done.contains(*name))
                .filter(|name| graph.dependencies_of(name).iter().all(|dep| done.contains(*dep)))
                .map(str::to_string)
                .collect();
            if wave.is_empty() {
                break;
            }
            done.extend(wave.iter().cloned());
            waves.push(wave);
        }

        debug!(environment = graph.environment(), waves = waves.len(), "Wave plan computed");
        Self { waves }
    }

    pub fn waves(&self) -> &[BTreeSet<String>] {
        &self.waves
    }

    pub fn len(&self) -> usize {
        self.waves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.waves.iter().map(BTreeSet::len).sum()
    }

    /// Zero-based wave of `name`.
    pub fn wave_of(&self, name: &str) -> Option<usize> {
        self.waves.iter().position(|wave| wave.contains(name))
    }
}

/// Single-worker order: the reverse of a topological sort, so every node
/// comes after everything it depends on.
pub fn serial_order(graph: &DependencyGraph) -> Result<Vec<String>> {
    let sorted = toposort(graph.inner(), None).map_err(|cycle| {
        let name = graph
            .inner()
            .node_weight(cycle.node_id())
            .cloned()
            .unwrap_or_default();
        GraphError::Cycles {
            environment: graph.environment().to_string(),
            cycles: vec![name],
        }
    })?;

    Ok(sorted
        .into_iter()
        .rev()
        .filter_map(|idx| graph.inner().node_weight(idx).cloned())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> DependencyGraph {
        let mut graph = DependencyGraph::new("dev");
        graph.add_edge("A", "B", false);
        graph.add_edge("B", "C", false);
        graph
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_chain_waves_run_dependencies_first() {
        let plan = WavePlan::plan(&chain());
        assert_eq!(plan.waves(), &[set(&["C"]), set(&["B"]), set(&["A"])]);
    }

    #[test]
    fn test_serial_order_agrees_with_waves() {
        let graph = chain();
        assert_eq!(serial_order(&graph).unwrap(), vec!["C", "B", "A"]);
    }

    #[test]
    fn test_wave_index_increases_along_every_edge() {
        let mut graph = DependencyGraph::new("dev");
        for (from, to) in [
            ("api", "db"),
            ("api", "cache"),
            ("web", "api"),
            ("worker", "db"),
            ("worker", "topic"),
            ("topic", "cluster"),
            ("db", "cluster"),
        ] {
            graph.add_edge(from, to, false);
        }

        let plan = WavePlan::plan(&graph);
        assert_eq!(plan.node_count(), graph.node_count());
        for (from, to, _) in graph.edges() {
            assert!(plan.wave_of(from).unwrap() > plan.wave_of(to).unwrap(), "{from} -> {to}");
        }

        let order = serial_order(&graph).unwrap();
        let position = |name: &str| order.iter().position(|n| n == name).unwrap();
        for (from, to, _) in graph.edges() {
            assert!(position(from) > position(to), "{from} -> {to}");
        }
    }

    #[test]
    fn test_independent_nodes_share_a_wave() {
        let mut graph = DependencyGraph::new("dev");
        graph.add_edge("a", "shared", false);
        graph.add_edge("b", "shared", false);
        let plan = WavePlan::plan(&graph);
        assert_eq!(plan.waves(), &[set(&["shared"]), set(&["a", "b"])]);
    }

    #[test]
    fn test_serial_order_rejects_cycle() {
        let mut graph = DependencyGraph::new("dev");
        graph.add_edge("a", "b", false);
        graph.add_edge("b", "a", false);
        assert!(matches!(serial_order(&graph), Err(GraphError::Cycles { .. })));
        assert!(WavePlan::plan(&graph).is_empty());
    }
}
