use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Per-environment activity flags of a node.
///
/// Manifests may list environment names (all active) or give an explicit
/// `name -> bool` map. An empty set of flags means "not declared" until
/// [`EnvironmentFlags::normalize`] resolves it against the known environments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EnvironmentFlags(BTreeMap<String, bool>);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFlags {
    List(Vec<String>),
    Map(BTreeMap<String, bool>),
}

impl<'de> Deserialize<'de> for EnvironmentFlags {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<RawFlags>::deserialize(deserializer)?;
        Ok(match raw {
            None => Self::default(),
            Some(RawFlags::List(names)) => Self::active_in(names),
            Some(RawFlags::Map(map)) => Self(map),
        })
    }
}

impl EnvironmentFlags {
    /// Flags marking every given environment as active.
    pub fn active_in<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(|n| (n.into(), true)).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `None` when the environment was never declared for this node.
    pub fn get(&self, environment: &str) -> Option<bool> {
        self.0.get(environment).copied()
    }

    pub fn set(&mut self, environment: impl Into<String>, active: bool) {
        self.0.insert(environment.into(), active);
    }

    /// Every declared environment name, active or not.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn active_names(&self) -> BTreeSet<String> {
        self.0
            .iter()
            .filter(|(_, active)| **active)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Resolve against the full environment list.
    ///
    /// Undeclared flags become "active everywhere"; declared flags keep their
    /// values and every other environment is set inactive.
    pub fn normalize(&mut self, all: &BTreeSet<String>) {
        if self.0.is_empty() {
            self.0 = all.iter().map(|e| (e.clone(), true)).collect();
            return;
        }
        for environment in all {
            self.0.entry(environment.clone()).or_insert(false);
        }
    }
}
