//! Read-only inspection across every environment, and node queries.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::info;

use cutover_core::{Node, NodeSet};

use crate::dependency_graph::DependencyGraph;
use crate::error::{GraphError, Result};
use crate::validator::{self_references, GraphValidator, SelfReference, ValidationReport};

/// Everything `--inspect` reports. Built without enforcing or removing
/// anything.
#[derive(Debug, Clone, Default)]
pub struct InspectionReport {
    /// Names with more than one real definition, with their files.
    pub repeated: BTreeMap<String, Vec<String>>,
    pub self_references: Vec<SelfReference>,
    /// One report-mode validation per environment.
    pub environments: Vec<ValidationReport>,
    /// Real nodes without actions, as `(name, file)`.
    pub without_actions: Vec<(String, String)>,
}

impl InspectionReport {
    /// Inspect raw `definitions` (duplicates included) and the leniently
    /// resolved `nodes` in every environment of `environments`.
    pub fn collect<'a>(
        definitions: impl IntoIterator<Item = &'a Node>,
        nodes: &NodeSet,
        environments: &BTreeSet<String>,
    ) -> Result<Self> {
        let definitions: Vec<&Node> = definitions.into_iter().collect();

        let mut files: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for node in definitions.iter().filter(|n| !n.is_virtual()) {
            files
                .entry(node.name.clone())
                .or_default()
                .push(node.file_name.clone());
        }
        let repeated = files.into_iter().filter(|(_, f)| f.len() > 1).collect();

        let validator = GraphValidator::report_only();
        let environments = environments
            .iter()
            .map(|env| validator.validate(nodes, env).map(|v| v.report))
            .collect::<Result<Vec<_>>>()?;

        let without_actions = nodes
            .nodes_without_actions()
            .into_iter()
            .map(|n| (n.name.clone(), n.file_name.clone()))
            .collect();

        let report = Self {
            repeated,
            self_references: self_references(definitions.iter().copied()),
            environments,
            without_actions,
        };
        info!(
            repeated = report.repeated.len(),
            environments = report.environments.len(),
            clean = report.is_clean(),
            "Inspection finished"
        );
        Ok(report)
    }

    pub fn is_clean(&self) -> bool {
        self.repeated.is_empty()
            && self.self_references.is_empty()
            && self.environments.iter().all(ValidationReport::is_clean)
    }
}

impl fmt::Display for InspectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "------------ Repeated nodes ------------")?;
        for (name, files) in &self.repeated {
            writeln!(f, " #{name}: {}", files.join("  "))?;
        }
        writeln!(f)?;
        for report in &self.environments {
            write!(f, "{report}")?;
        }
        writeln!(f, "------------ Manifests missing actions ------------")?;
        for (name, file) in &self.without_actions {
            writeln!(f, " #{name}: {file}")?;
        }
        Ok(())
    }
}

/// `type=<T>[,phase=<p> <p>...][,environment=<e>][,services=<a>,<b>...]`
///
/// `phase` and `services` take lists; a comma-separated part without a key
/// continues the list of the key before it, and phases may also be separated
/// by spaces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeQuery {
    pub node_type: String,
    /// Matches nodes with an action in any of these phases.
    pub phases: BTreeSet<u32>,
    pub environment: Option<String>,
    /// Restricts matches to the dependency trees of these nodes.
    pub services: Vec<String>,
}

#[derive(Clone, Copy)]
enum ListKey {
    Phase,
    Services,
}

impl FromStr for NodeQuery {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || GraphError::InvalidQuery(s.to_string());
        let mut node_type = None;
        let mut query = NodeQuery::default();
        let mut list: Option<ListKey> = None;

        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = match part.split_once('=') {
                Some((key, value)) => (Some(key.trim()), value.trim()),
                None => (None, part),
            };
            match (key, list) {
                (Some("type"), _) => {
                    node_type = Some(value.to_string());
                    list = None;
                }
                (Some("environment"), _) => {
                    query.environment = Some(value.to_string());
                    list = None;
                }
                (Some("phase"), _) | (None, Some(ListKey::Phase)) => {
                    for phase in value.split_whitespace() {
                        query.phases.insert(phase.parse().map_err(|_| invalid())?);
                    }
                    list = Some(ListKey::Phase);
                }
                (Some("services"), _) | (None, Some(ListKey::Services)) => {
                    query.services.push(value.to_string());
                    list = Some(ListKey::Services);
                }
                _ => return Err(invalid()),
            }
        }

        query.node_type = node_type.filter(|t| !t.is_empty()).ok_or_else(invalid)?;
        Ok(query)
    }
}

/// Nodes matching `query`, in load order.
///
/// With `services`, only nodes inside the dependency tree of a named service
/// match. The tree is walked in the query's environment, or across every
/// dependency when it names none.
pub fn query_nodes<'a>(nodes: &'a NodeSet, query: &NodeQuery) -> Result<Vec<&'a Node>> {
    let scope: Option<BTreeSet<String>> = if query.services.is_empty() {
        None
    } else {
        let graph = match &query.environment {
            Some(env) => DependencyGraph::build(nodes, env)?,
            None => DependencyGraph::build_unscoped(nodes),
        };
        let unknown: Vec<String> = query
            .services
            .iter()
            .filter(|name| !graph.contains(name))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(GraphError::UnknownServices(unknown));
        }
        let tree = query
            .services
            .iter()
            .flat_map(|name| graph.dependency_tree(name))
            .map(str::to_string)
            .collect();
        Some(tree)
    };

    Ok(nodes
        .iter()
        .filter(|node| node.node_type == query.node_type)
        .filter(|node| query.phases.is_empty() || !node.phases().is_disjoint(&query.phases))
        .filter(|node| {
            query
                .environment
                .as_deref()
                .map_or(true, |env| node.active_in(env) == Some(true))
        })
        .filter(|node| scope.as_ref().map_or(true, |tree| tree.contains(&node.name)))
        .collect())
}
