use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{ExecutorError, Result};
use crate::traits::{ActionExecutor, ActionInvocation, ActionOutcome};

/// Environment variable pointing the script at its materialized env file.
pub const ENV_FILE_VAR: &str = "CUTOVER_ENV_FILE";

/// Runs an external executable as `<exe> <action> <node-json>`.
///
/// Combined stdout/stderr is streamed line by line into the log and, when the
/// invocation names one, appended to a per-worker log file. The child is
/// killed if the execution future is dropped.
pub struct ScriptExecutor {
    node_type: String,
    path: PathBuf,
    interpreter: Option<String>,
}

impl ScriptExecutor {
    pub fn new(node_type: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            node_type: node_type.into(),
            path: path.into(),
            interpreter: None,
        }
    }

    /// Run the script through an interpreter (`bash`, `python3`) instead of
    /// executing it directly.
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn command(&self) -> Command {
        match &self.interpreter {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(&self.path);
                cmd
            }
            None => Command::new(&self.path),
        }
    }
}

/// Send each line of `reader` down `tx` until EOF, a read error, or the
/// receiver going away.
pub async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(line).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read child output: {}", e);
                break;
            }
        }
    }
}

#[async_trait]
impl ActionExecutor for ScriptExecutor {
    fn node_type(&self) -> &str {
        &self.node_type
    }

    async fn execute(&self, invocation: &ActionInvocation) -> Result<ActionOutcome> {
        let node_json = serde_json::to_string(&invocation.node)?;
        debug!(
            node = %invocation.node.name,
            action = %invocation.action,
            script = %self.path.display(),
            "Running node interface"
        );

        let mut cmd = self.command();
        cmd.arg(&invocation.action)
            .arg(&node_json)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(env_file) = &invocation.env_file {
            cmd.env(ENV_FILE_VAR, env_file);
        }

        let mut child = cmd.spawn().map_err(|source| ExecutorError::SpawnFailed {
            path: self.path.clone(),
            source,
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(stderr, tx.clone())));
        }
        drop(tx);

        let mut log_file = match &invocation.log_file {
            Some(path) => Some(OpenOptions::new().create(true).append(true).open(path).await?),
            None => None,
        };

        while let Some(line) = rx.recv().await {
            info!(
                node = %invocation.node.name,
                action = %invocation.action,
                worker = invocation.worker_id,
                "{}", line
            );
            if let Some(file) = log_file.as_mut() {
                file.write_all(format!("{line}\n").as_bytes()).await?;
            }
        }
        for reader in readers {
            let _ = reader.await;
        }
        if let Some(file) = log_file.as_mut() {
            file.flush().await?;
        }

        let status = child.wait().await?;
        // A child killed by a signal has no exit code.
        let exit_code = status.code().unwrap_or(1);
        debug!(node = %invocation.node.name, action = %invocation.action, exit_code, "Node interface finished");
        Ok(ActionOutcome { exit_code })
    }
}
