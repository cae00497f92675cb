//! Post-phase batch jobs.
//!
//! A process file is a YAML document with an ordered `actions` list of shell
//! commands. Global jobs live directly under `processes/`, phase-scoped jobs
//! under `processes/Phase {N}/`.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{ManifestError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProcessDefinition {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(skip)]
    pub file: PathBuf,
}

impl ProcessDefinition {
    /// Name for logging: the declared name, else the file stem.
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            self.file
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
    }
}

pub struct ProcessLoader {
    root: PathBuf,
}

impl ProcessLoader {
    /// `root` is the `processes/` directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Global jobs followed by the jobs scoped to `phase`.
    pub fn load_for_phase(&self, phase: u32) -> Result<Vec<ProcessDefinition>> {
        let mut processes = Self::load_dir(&self.root)?;
        processes.extend(Self::load_dir(&self.root.join(format!("Phase {phase}")))?);
        Ok(processes)
    }

    /// Top-level process files of `dir`, by file name. A missing directory is
    /// not an error.
    pub fn load_dir(dir: &Path) -> Result<Vec<ProcessDefinition>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_yaml(path))
            .collect();
        paths.sort();

        let mut processes = Vec::with_capacity(paths.len());
        for path in paths {
            let content = fs::read_to_string(&path)?;
            match serde_yaml::from_str::<ProcessDefinition>(&content) {
                Ok(mut process) => {
                    process.file = path;
                    debug!(process = %process.display_name(), commands = process.actions.len(), "Loaded process");
                    processes.push(process);
                }
                Err(source) => {
                    let error = ManifestError::Yaml { path, source };
                    warn!(error = %error, "Skipping malformed process file");
                }
            }
        }
        Ok(processes)
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "yaml" | "yml"))
        .unwrap_or(false)
}
