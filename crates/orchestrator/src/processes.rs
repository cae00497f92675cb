//! Batch jobs run after every phase.

use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use interfaces::forward_lines;
use manifest::{ProcessDefinition, ProcessLoader};

use crate::error::{OrchestratorError, Result};

pub struct ProcessRunner {
    loader: ProcessLoader,
    shell: String,
}

impl ProcessRunner {
    /// `processes_dir` is the data directory's `processes/`.
    pub fn new(processes_dir: impl Into<PathBuf>) -> Self {
        Self {
            loader: ProcessLoader::new(processes_dir),
            shell: "bash".to_string(),
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Run the global jobs, then the jobs of `phase`. Commands run in order
    /// and the first failing command stops the run.
    pub async fn run_phase(&self, phase: u32) -> Result<usize> {
        let processes = self.loader.load_for_phase(phase)?;
        if processes.is_empty() {
            return Ok(0);
        }
        info!(phase, count = processes.len(), "Running processes");

        for process in &processes {
            self.run_process(process).await?;
        }
        Ok(processes.len())
    }

    async fn run_process(&self, process: &ProcessDefinition) -> Result<()> {
        let name = process.display_name();
        if process.actions.is_empty() {
            warn!(process = %name, "Process has no actions");
            return Ok(());
        }

        for command in &process.actions {
            info!(process = %name, command = %command, "Running process command");
            let exit_code = self.run_command(&name, command).await?;
            if exit_code != 0 {
                error!(process = %name, command = %command, exit_code, "Process command failed");
                return Err(OrchestratorError::ProcessFailed {
                    process: name,
                    command: command.clone(),
                    exit_code,
                });
            }
        }
        Ok(())
    }

    /// Run one command, logging its combined output as it arrives.
    async fn run_command(&self, name: &str, command: &str) -> Result<i32> {
        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(stderr, tx.clone())));
        }
        drop(tx);

        while let Some(line) = rx.recv().await {
            info!(process = %name, "{}", line);
        }
        for reader in readers {
            let _ = reader.await;
        }

        let status = child.wait().await?;
        Ok(status.code().unwrap_or(1))
    }
}
