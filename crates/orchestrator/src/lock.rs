//! Per-(node, action) execution locks.
//!
//! At most one attempt of an action on a node runs at a time, across workers
//! and across processes on the same host. A held lock is not an error: the
//! caller skips the work because someone else is already doing it.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::Result;
use crate::resources::LockGuard;

/// Lock key for an action on a node.
pub fn lock_key(node: &str, action: &str) -> String {
    format!("{node}-{action}")
}

#[async_trait]
pub trait LockManager: Send + Sync {
    /// Take the lock, or `None` when someone else holds it.
    async fn try_acquire(&self, key: &str) -> Result<Option<LockGuard>>;
}

/// Pid files under `logs/locks/`, created exclusively. A pid file whose
/// process is gone is reclaimed, provided it still names that process when
/// it is removed.
#[derive(Debug, Clone)]
pub struct FileLockManager {
    dir: PathBuf,
}

impl FileLockManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.pid"))
    }

    async fn create(&self, path: &Path) -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        file.write_all(std::process::id().to_string().as_bytes()).await?;
        file.flush().await
    }

    async fn read_pid(path: &Path) -> std::io::Result<Option<u32>> {
        match fs::read_to_string(path).await {
            // An unparsable pid is still being written by its owner.
            Ok(content) => Ok(content.trim().parse().ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The pid in `path` when that process is gone.
    async fn stale_pid(&self, path: &Path) -> std::io::Result<Option<u32>> {
        Ok(Self::read_pid(path).await?.filter(|pid| !process_alive(*pid)))
    }

    /// Remove `path` only while it still holds `stale_pid`. Returns false
    /// when another process has taken the lock over in the meantime.
    async fn reclaim(&self, path: &Path, stale_pid: u32) -> std::io::Result<bool> {
        if Self::read_pid(path).await? != Some(stale_pid) {
            return Ok(false);
        }
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e),
        }
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    pid == std::process::id() || Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

#[async_trait]
impl LockManager for FileLockManager {
    async fn try_acquire(&self, key: &str) -> Result<Option<LockGuard>> {
        let path = self.path(key);

        for attempt in 0..2 {
            match self.create(&path).await {
                Ok(()) => {
                    let release_path = path.clone();
                    return Ok(Some(LockGuard::new(key, move || {
                        if let Err(e) = std::fs::remove_file(&release_path) {
                            warn!(path = %release_path.display(), "Failed to remove lock file: {}", e);
                        }
                    })));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if attempt == 0 {
                        if let Some(pid) = self.stale_pid(&path).await? {
                            if self.reclaim(&path, pid).await? {
                                warn!(lock = %key, pid, "Reclaimed stale lock");
                                continue;
                            }
                        }
                    }
                    debug!(lock = %key, "Lock held elsewhere");
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }
}
