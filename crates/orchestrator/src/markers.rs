//! Completion markers and failed-preflight records.
//!
//! A marker is an empty file named `{node}-{environment}-{phase}-{action}`.
//! Writers only ever create distinct names, so marker writes need no lock.

use async_trait::async_trait;
use chrono::Local;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::Result;

/// Identity of one unit of completed work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MarkerKey {
    pub node: String,
    pub environment: String,
    pub phase: u32,
    pub action: String,
}

impl MarkerKey {
    pub fn new(
        node: impl Into<String>,
        environment: impl Into<String>,
        phase: u32,
        action: impl Into<String>,
    ) -> Self {
        Self {
            node: node.into(),
            environment: environment.into(),
            phase,
            action: action.into(),
        }
    }
}

impl fmt::Display for MarkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}-{}", self.node, self.environment, self.phase, self.action)
    }
}

#[async_trait]
pub trait MarkerStore: Send + Sync {
    async fn is_completed(&self, key: &MarkerKey) -> Result<bool>;

    async fn mark_completed(&self, key: &MarkerKey) -> Result<()>;

    /// Append a timestamped failure record for a node's preflight.
    async fn record_failed_preflight(&self, node_type: &str, node: &str) -> Result<()>;

    /// Forget every marker and failure record.
    async fn clear(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct FsMarkerStore {
    executed_dir: PathBuf,
    failed_preflight_dir: PathBuf,
}

impl FsMarkerStore {
    pub fn new(executed_dir: impl Into<PathBuf>, failed_preflight_dir: impl Into<PathBuf>) -> Self {
        Self {
            executed_dir: executed_dir.into(),
            failed_preflight_dir: failed_preflight_dir.into(),
        }
    }

    fn marker_path(&self, key: &MarkerKey) -> PathBuf {
        self.executed_dir.join(key.to_string())
    }

    pub fn failed_preflight_path(&self, node_type: &str, node: &str) -> PathBuf {
        self.failed_preflight_dir.join(format!("{node_type}_{node}"))
    }

    async fn empty_dir(dir: &Path) -> Result<usize> {
        if !fs::try_exists(dir).await.unwrap_or(false) {
            return Ok(0);
        }
        let mut removed = 0;
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl MarkerStore for FsMarkerStore {
    async fn is_completed(&self, key: &MarkerKey) -> Result<bool> {
        Ok(fs::try_exists(self.marker_path(key)).await?)
    }

    async fn mark_completed(&self, key: &MarkerKey) -> Result<()> {
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.marker_path(key))
            .await?;
        debug!(marker = %key, "Recorded node");
        Ok(())
    }

    async fn record_failed_preflight(&self, node_type: &str, node: &str) -> Result<()> {
        let line = format!("{} {}\n", Local::now().format("%Y%m%d %H:%M:%S"), node);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.failed_preflight_path(node_type, node))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let markers = Self::empty_dir(&self.executed_dir).await?;
        let failures = Self::empty_dir(&self.failed_preflight_dir).await?;
        info!(markers, failures, "Node tracking reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> FsMarkerStore {
        let executed = temp.path().join("executed_nodes");
        let failed = temp.path().join("failed_preflight");
        std::fs::create_dir_all(&executed).unwrap();
        std::fs::create_dir_all(&failed).unwrap();
        FsMarkerStore::new(executed, failed)
    }

    #[test]
    fn test_marker_file_name() {
        let key = MarkerKey::new("orders-db", "prod", 2, "cutover");
        assert_eq!(key.to_string(), "orders-db-prod-2-cutover");
    }

    #[tokio::test]
    async fn test_mark_and_clear() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let key = MarkerKey::new("d", "dev", 1, "start");

        assert!(!store.is_completed(&key).await.unwrap());
        store.mark_completed(&key).await.unwrap();
        store.mark_completed(&key).await.unwrap();
        assert!(store.is_completed(&key).await.unwrap());
        assert!(temp.path().join("executed_nodes/d-dev-1-start").exists());

        store.record_failed_preflight("App", "d").await.unwrap();
        store.clear().await.unwrap();
        assert!(!store.is_completed(&key).await.unwrap());
        assert!(!store.failed_preflight_path("App", "d").exists());
    }

    #[tokio::test]
    async fn test_failed_preflight_appends() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        store.record_failed_preflight("Database", "orders-db").await.unwrap();
        store.record_failed_preflight("Database", "orders-db").await.unwrap();

        let content = std::fs::read_to_string(temp.path().join("failed_preflight/Database_orders-db")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" orders-db"));
        // "%Y%m%d %H:%M:%S"
        assert_eq!(lines[0].len(), "20240101 12:00:00 orders-db".len());
    }
}
