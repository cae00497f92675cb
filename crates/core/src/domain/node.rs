use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::environment::EnvironmentFlags;

/// Node type reserved for auto-created placeholder targets.
pub const VIRTUAL_TYPE: &str = "Virtual";

/// A reference to another node, from `dependencies` or `produces`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyRef {
    /// Bare name, valid in every environment.
    Name(String),
    /// Name valid only in the listed environments.
    Scoped {
        name: String,
        #[serde(default)]
        environments: Vec<String>,
    },
}

impl DependencyRef {
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Scoped { name, .. } => name,
        }
    }

    pub fn applies_in(&self, environment: &str) -> bool {
        match self {
            Self::Name(_) => true,
            Self::Scoped { environments, .. } => environments.iter().any(|e| e == environment),
        }
    }
}

/// Phases an action fires in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(default)]
    pub phases: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub dependencies: BTreeMap<String, Vec<DependencyRef>>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub produces: Vec<DependencyRef>,
    #[serde(default)]
    pub environments: EnvironmentFlags,
    #[serde(default)]
    pub actions: BTreeMap<String, ActionSpec>,
    #[serde(default)]
    pub meta: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub parents: BTreeMap<String, ParentRef>,
    #[serde(default)]
    pub thread_id: usize,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<DependencyRef>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(DependencyRef),
        Many(Vec<DependencyRef>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(r)) => vec![r],
        Some(OneOrMany::Many(refs)) => refs,
    })
}

impl Node {
    pub fn new(name: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_type: node_type.into(),
            dependencies: BTreeMap::new(),
            produces: Vec::new(),
            environments: EnvironmentFlags::default(),
            actions: BTreeMap::new(),
            meta: BTreeMap::new(),
            file_name: String::new(),
            parents: BTreeMap::new(),
            thread_id: 0,
        }
    }

    /// Placeholder for a referenced-but-undefined target.
    pub fn virtual_node(
        name: impl Into<String>,
        environments: EnvironmentFlags,
        file_name: impl Into<String>,
    ) -> Self {
        let mut node = Self::new(name, VIRTUAL_TYPE);
        node.environments = environments;
        node.file_name = file_name.into();
        node
    }

    pub fn with_dependency(mut self, category: impl Into<String>, dependency: DependencyRef) -> Self {
        self.dependencies
            .entry(category.into())
            .or_default()
            .push(dependency);
        self
    }

    pub fn with_action(mut self, action: impl Into<String>, phases: Vec<u32>) -> Self {
        self.actions.insert(action.into(), ActionSpec { phases });
        self
    }

    pub fn with_environments(mut self, environments: EnvironmentFlags) -> Self {
        self.environments = environments;
        self
    }

    pub fn is_virtual(&self) -> bool {
        self.node_type == VIRTUAL_TYPE
    }

    /// Whether the node is active in `environment`.
    ///
    /// `None` when the environment is unknown to this node, which after
    /// normalization means it is not a known environment at all.
    pub fn active_in(&self, environment: &str) -> Option<bool> {
        self.environments.get(environment)
    }

    pub fn dependency_refs(&self) -> impl Iterator<Item = &DependencyRef> {
        self.dependencies.values().flatten()
    }

    pub fn dependency_names(&self) -> BTreeSet<&str> {
        self.dependency_refs().map(DependencyRef::name).collect()
    }

    /// Names this node points at in `environment`, through both
    /// dependencies and produces.
    pub fn children_in(&self, environment: &str) -> BTreeSet<&str> {
        self.dependency_refs()
            .chain(self.produces.iter())
            .filter(|r| r.applies_in(environment))
            .map(DependencyRef::name)
            .collect()
    }

    /// Every phase any action of this node fires in.
    pub fn phases(&self) -> BTreeSet<u32> {
        self.actions
            .values()
            .flat_map(|spec| spec.phases.iter().copied())
            .collect()
    }

    /// Actions scheduled in `phase`, in name order.
    pub fn actions_in_phase(&self, phase: u32) -> Vec<&str> {
        self.actions
            .iter()
            .filter(|(_, spec)| spec.phases.contains(&phase))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn action_fires_in(&self, action: &str, phase: u32) -> bool {
        self.actions
            .get(action)
            .map(|spec| spec.phases.contains(&phase))
            .unwrap_or(false)
    }
}
