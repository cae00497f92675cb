//! Per-dispatch environment files handed to node interfaces.
//!
//! Sources merge in this order, later keys overriding earlier ones:
//! node meta (manifest `meta` plus `environments/{env}/nodes/{stem}.meta`),
//! node credentials (`{stem}.creds`), environment meta
//! (`environments/{env}.meta`), extra variables, environment credentials
//! (`environments/{env}.creds`). `PREFLIGHT`, `DRYRUN` and `environment` are
//! appended last.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use cutover_core::Node;
use manifest::{env_line, parse_extra_vars, read_env_file, EnvVars};

use crate::config::OrchestratorConfig;
use crate::error::Result;

/// Environment-level sources are read once per run; node-level sources are
/// read on every dispatch.
#[derive(Debug, Clone)]
pub struct NodeEnvironment {
    environments_dir: PathBuf,
    meta_dir: PathBuf,
    environment: String,
    environment_meta: EnvVars,
    extra_vars: EnvVars,
    environment_creds: EnvVars,
    preflight: bool,
    dryrun: bool,
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl NodeEnvironment {
    pub fn load(config: &OrchestratorConfig, meta_dir: impl Into<PathBuf>) -> Result<Self> {
        let environments_dir = config.environments_dir();
        let environment = config.environment.clone();
        let environment_meta = read_env_file(&environments_dir.join(format!("{environment}.meta")))?;
        let environment_creds = read_env_file(&environments_dir.join(format!("{environment}.creds")))?;
        let extra_vars = match &config.extra_vars {
            Some(spec) => parse_extra_vars(spec)?,
            None => EnvVars::new(),
        };
        debug!(
            environment = %environment,
            meta = environment_meta.len(),
            extra = extra_vars.len(),
            "Environment sources loaded"
        );

        Ok(Self {
            environments_dir,
            meta_dir: meta_dir.into(),
            environment,
            environment_meta,
            extra_vars,
            environment_creds,
            preflight: config.preflight,
            dryrun: config.dryrun,
        })
    }

    /// `environments/{env}/nodes/{manifest path without extension}.{ext}`
    fn node_file(&self, node: &Node, extension: &str) -> PathBuf {
        let stem = Path::new(&node.file_name).with_extension(extension);
        self.environments_dir
            .join(&self.environment)
            .join("nodes")
            .join(stem)
    }

    pub fn env_file_path(&self, node: &str, worker_id: usize) -> PathBuf {
        self.meta_dir.join(format!("{node}-thread{worker_id}.env"))
    }

    /// Merge node meta files into the node's `meta`, then compute the full
    /// variable set for the node.
    pub fn merge(&self, node: &mut Node) -> Result<EnvVars> {
        for (key, value) in read_env_file(&self.node_file(node, "meta"))? {
            node.meta.insert(key, serde_json::Value::String(value));
        }

        let mut vars: EnvVars = node
            .meta
            .iter()
            .map(|(k, v)| (k.clone(), render_value(v)))
            .collect();
        vars.extend(read_env_file(&self.node_file(node, "creds"))?);
        vars.extend(self.environment_meta.clone());
        vars.extend(self.extra_vars.clone());
        vars.extend(self.environment_creds.clone());
        if self.preflight {
            vars.insert("PREFLIGHT".to_string(), "True".to_string());
        }
        if self.dryrun {
            vars.insert("DRYRUN".to_string(), "True".to_string());
        }
        vars.insert("environment".to_string(), self.environment.clone());
        Ok(vars)
    }

    /// Merge and write `.meta/{node}-thread{worker}.env`, always recreated.
    /// Returns the file path; `node.meta` carries the merged meta afterwards.
    pub async fn materialize(&self, node: &mut Node, worker_id: usize) -> Result<PathBuf> {
        let vars = self.merge(node)?;
        let content: String = vars.iter().map(|(k, v)| env_line(k, v)).collect();

        fs::create_dir_all(&self.meta_dir).await?;
        let path = self.env_file_path(&node.name, worker_id);
        fs::write(&path, content).await?;
        debug!(node = %node.name, path = %path.display(), vars = vars.len(), "Node environment written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use manifest::parse_env;
    use std::fs as stdfs;
    use tempfile::TempDir;

    fn fixture(temp: &TempDir) -> OrchestratorConfig {
        let data = temp.path().join("data");
        let envs = data.join("environments");
        stdfs::create_dir_all(envs.join("prod/nodes/payments")).unwrap();
        stdfs::write(envs.join("prod.meta"), "REGION=\"eu\"\nSHARED=\"env-meta\"\n").unwrap();
        stdfs::write(envs.join("prod.creds"), "SHARED=\"env-creds\"\nTOKEN=\"t0\"\n").unwrap();
        stdfs::write(envs.join("prod/nodes/payments/db.meta"), "HOST=\"db.prod\"\n").unwrap();
        stdfs::write(envs.join("prod/nodes/payments/db.creds"), "PASSWORD=\"p\"\nREGION=\"node\"\n").unwrap();
        OrchestratorConfig::new(data, "prod")
            .with_extra_vars(Some("BATCH=5 REGION=cli".to_string()))
            .with_preflight(true)
    }

    fn db_node() -> Node {
        let mut node = Node::new("orders-db", "Database");
        node.file_name = "payments/db.yaml".to_string();
        node.meta.insert("replicas".to_string(), serde_json::json!(3));
        node
    }

    #[test]
    fn test_merge_precedence() {
        let temp = TempDir::new().unwrap();
        let config = fixture(&temp);
        let env = NodeEnvironment::load(&config, temp.path().join(".meta")).unwrap();

        let mut node = db_node();
        let vars = env.merge(&mut node).unwrap();
        assert_eq!(vars["replicas"], "3");
        assert_eq!(vars["HOST"], "db.prod");
        assert_eq!(vars["PASSWORD"], "p");
        // node creds < env meta < extra vars
        assert_eq!(vars["REGION"], "cli");
        // env meta < env creds
        assert_eq!(vars["SHARED"], "env-creds");
        assert_eq!(vars["BATCH"], "5");
        assert_eq!(vars["PREFLIGHT"], "True");
        assert!(!vars.contains_key("DRYRUN"));
        assert_eq!(vars.get_index(vars.len() - 1).unwrap(), (&"environment".to_string(), &"prod".to_string()));
        assert_eq!(node.meta["HOST"], "db.prod");
    }

    #[tokio::test]
    async fn test_materialize_per_worker_file() {
        let temp = TempDir::new().unwrap();
        let config = fixture(&temp);
        let env = NodeEnvironment::load(&config, temp.path().join(".meta")).unwrap();

        let mut node = db_node();
        let path = env.materialize(&mut node, 2).await.unwrap();
        assert_eq!(path, temp.path().join(".meta/orders-db-thread2.env"));

        let written = parse_env(&stdfs::read_to_string(path).unwrap());
        assert_eq!(written["TOKEN"], "t0");
        assert_eq!(written["environment"], "prod");
    }

    #[tokio::test]
    async fn test_multiline_meta_survives_env_file() {
        let temp = TempDir::new().unwrap();
        let config = OrchestratorConfig::new(temp.path(), "dev");
        let env = NodeEnvironment::load(&config, temp.path().join(".meta")).unwrap();

        let mut node = Node::new("gateway", "App");
        node.meta.insert(
            "banner".to_string(),
            serde_json::json!("line one\nline \"two\"\nINJECTED=yes"),
        );
        let path = env.materialize(&mut node, 0).await.unwrap();

        let written = parse_env(&stdfs::read_to_string(path).unwrap());
        assert_eq!(written["banner"], "line one\nline \"two\"\nINJECTED=yes");
        assert!(!written.contains_key("INJECTED"));
        assert_eq!(written["environment"], "dev");
    }

    #[test]
    fn test_missing_sources_are_empty() {
        let temp = TempDir::new().unwrap();
        let config = OrchestratorConfig::new(temp.path(), "dev");
        let env = NodeEnvironment::load(&config, temp.path().join(".meta")).unwrap();
        let vars = env.merge(&mut Node::new("x", "App")).unwrap();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars["environment"], "dev");
    }
}
