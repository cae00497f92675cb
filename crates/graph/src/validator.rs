//! Graph certification for one environment.
//!
//! Every check runs and lands in a [`ValidationReport`] before anything is
//! enforced, so a single pass surfaces every problem. In enforcing mode the
//! first failing check (in check order) becomes the error; with `force`,
//! conflicting dependents and isolated nodes are removed instead. Missing
//! dependencies, self-references and cycles are never forceable.

use std::collections::BTreeSet;
use std::fmt;
use tracing::{info, warn};

use cutover_core::{Node, NodeSet};

use crate::dependency_graph::DependencyGraph;
use crate::error::{GraphError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// Inspect: collect findings, never fail, never remove anything.
    Report,
    /// Fail on findings; `force` removes conflicting and isolated nodes.
    Enforce { force: bool },
}

/// A node referencing names that resolve to nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDependency {
    pub node: String,
    pub file: String,
    pub missing: Vec<String>,
}

/// A definition listing its own name among its dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfReference {
    pub node: String,
    pub file: String,
}

/// Findings of one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub environment: String,
    pub missing: Vec<MissingDependency>,
    pub self_references: Vec<SelfReference>,
    pub conflicts: Vec<(String, String)>,
    pub isolated: Vec<String>,
    pub cycles: Vec<Vec<String>>,
    /// Nodes removed under `force`.
    pub removed: Vec<String>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty()
            && self.self_references.is_empty()
            && self.conflicts.is_empty()
            && self.isolated.is_empty()
            && self.cycles.is_empty()
    }

    fn section(f: &mut fmt::Formatter<'_>, title: &str, lines: &[String]) -> fmt::Result {
        writeln!(f, "------------ {title} ------------")?;
        if lines.is_empty() {
            writeln!(f, " No conflicts")?;
        }
        for line in lines {
            writeln!(f, " {line}")?;
        }
        writeln!(f)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env = &self.environment;
        let missing: Vec<String> = self
            .missing
            .iter()
            .map(|m| {
                let names: Vec<String> = m.missing.iter().map(|n| format!("//{n}//")).collect();
                format!("#{} ({}): {}", m.node, m.file, names.join(" "))
            })
            .collect();
        let self_refs: Vec<String> = self
            .self_references
            .iter()
            .map(|r| format!("#{}: {}", r.node, r.file))
            .collect();
        let conflicts: Vec<String> = self
            .conflicts
            .iter()
            .map(|(from, to)| format!("Conflict with {from}->{to}"))
            .collect();
        let isolated: Vec<String> = if self.isolated.is_empty() {
            Vec::new()
        } else {
            vec![format!("Isolated nodes: {}", self.isolated.join("|"))]
        };
        let cycles: Vec<String> = self.cycles.iter().map(|c| format!("[{}]", c.join(", "))).collect();

        Self::section(f, "Missing nodes", &missing)?;
        Self::section(f, "Cyclic conflicts", &self_refs)?;
        Self::section(f, &format!("Dependency conflicts in {env}"), &conflicts)?;
        Self::section(f, &format!("Isolated conflicts in {env}"), &isolated)?;
        Self::section(f, &format!("Cyclic closed conflicts in {env}"), &cycles)?;
        if !self.removed.is_empty() {
            writeln!(f, "Nodes removed: {}", self.removed.join("|"))?;
        }
        Ok(())
    }
}

/// A certified graph and the report that certified it.
#[derive(Debug, Clone)]
pub struct ValidatedGraph {
    pub graph: DependencyGraph,
    pub report: ValidationReport,
}

/// Definitions that list their own name as a dependency.
///
/// Runs over raw definitions, so it also catches a duplicate definition
/// depending on the name it shares.
pub fn self_references<'a>(definitions: impl IntoIterator<Item = &'a Node>) -> Vec<SelfReference> {
    definitions
        .into_iter()
        .filter(|node| node.dependency_names().contains(node.name.as_str()))
        .map(|node| SelfReference {
            node: node.name.clone(),
            file: node.file_name.clone(),
        })
        .collect()
}

fn missing_dependencies(nodes: &NodeSet) -> Vec<MissingDependency> {
    nodes
        .iter()
        .filter(|node| !node.is_virtual())
        .filter_map(|node| {
            let missing: Vec<String> = node
                .dependency_names()
                .into_iter()
                .filter(|dep| !nodes.contains(dep))
                .map(str::to_string)
                .collect();
            (!missing.is_empty()).then(|| MissingDependency {
                node: node.name.clone(),
                file: node.file_name.clone(),
                missing,
            })
        })
        .collect()
}

pub struct GraphValidator {
    mode: ValidationMode,
}

impl GraphValidator {
    pub fn new(mode: ValidationMode) -> Self {
        Self { mode }
    }

    pub fn report_only() -> Self {
        Self::new(ValidationMode::Report)
    }

    pub fn enforcing(force: bool) -> Self {
        Self::new(ValidationMode::Enforce { force })
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    fn removes(&self) -> bool {
        matches!(self.mode, ValidationMode::Enforce { force: true })
    }

    /// Build and certify the graph of `environment`.
    pub fn validate(&self, nodes: &NodeSet, environment: &str) -> Result<ValidatedGraph> {
        info!(environment, mode = ?self.mode, "Validating graph");
        let mut report = ValidationReport {
            environment: environment.to_string(),
            missing: missing_dependencies(nodes),
            self_references: self_references(nodes.iter()),
            ..Default::default()
        };

        let mut graph = DependencyGraph::build(nodes, environment)?;

        report.conflicts = graph.conflicting_edges();
        if self.removes() && !report.conflicts.is_empty() {
            let sources: BTreeSet<&str> = report.conflicts.iter().map(|(from, _)| from.as_str()).collect();
            report.removed.extend(graph.remove_nodes(sources));
        }

        report.isolated = graph.isolated_nodes();
        if self.removes() && !report.isolated.is_empty() {
            let isolated = report.isolated.clone();
            report.removed.extend(graph.remove_nodes(isolated.iter().map(String::as_str)));
        }

        report.cycles = graph.cycles();

        if report.is_clean() {
            info!(environment, "Graph validation passed");
        } else {
            warn!(environment, "Graph validation findings:\n{report}");
        }
        info!(
            environment,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Graph summary"
        );

        if let ValidationMode::Enforce { force } = self.mode {
            Self::enforce(&report, force)?;
        }
        Ok(ValidatedGraph { graph, report })
    }

    fn enforce(report: &ValidationReport, force: bool) -> Result<()> {
        let environment = report.environment.clone();
        if !report.missing.is_empty() {
            let names: BTreeSet<String> =
                report.missing.iter().flat_map(|m| m.missing.iter().cloned()).collect();
            return Err(GraphError::MissingDependencies(names.into_iter().collect()));
        }
        if !report.self_references.is_empty() {
            return Err(GraphError::SelfReference(
                report.self_references.iter().map(|r| r.node.clone()).collect(),
            ));
        }
        if !force && !report.conflicts.is_empty() {
            info!("Use --force to delete nodes with conflicts or isolated");
            return Err(GraphError::Conflicts {
                environment,
                edges: report
                    .conflicts
                    .iter()
                    .map(|(from, to)| format!("{from}->{to}"))
                    .collect(),
            });
        }
        if !force && !report.isolated.is_empty() {
            info!("Isolated node(s) found. Re-run with --inspect to see all issues, or with --force to delete them");
            return Err(GraphError::Isolated {
                environment,
                nodes: report.isolated.clone(),
            });
        }
        if !report.cycles.is_empty() {
            return Err(GraphError::Cycles {
                environment,
                cycles: report.cycles.iter().map(|c| c.join("->")).collect(),
            });
        }
        Ok(())
    }
}
