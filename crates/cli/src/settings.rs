//! Optional `cutover.toml` in the working directory.
//!
//! Every key is optional. Command-line flags and environment variables take
//! precedence over the file; the file takes precedence over built-in
//! defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "cutover.toml";

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSettings {
    pub environment: Option<String>,
    pub datafiles: Option<PathBuf>,
    pub interfaces_dir: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub thread_log_dir: Option<PathBuf>,
    pub max_workers: Option<usize>,
    pub log_level: Option<String>,
}

impl FileSettings {
    /// Read `path`, or defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid settings in {}", path.display()))
    }
}
