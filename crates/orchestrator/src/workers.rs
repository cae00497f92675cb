//! Bounded worker pool for one wave at a time.
//!
//! Nodes go out over a shared task queue as owned snapshots; outcomes come
//! back over a result channel. A wave is a barrier: `run_wave` returns only
//! after every worker has stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use cutover_core::Node;

use crate::error::{OrchestratorError, Result};
use crate::gate::{DispatchOutcome, ExecutionGate};

/// Outcome of one node in a wave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub node: String,
    pub outcome: DispatchOutcome,
}

pub struct WavePool {
    gate: Arc<ExecutionGate>,
    workers: usize,
}

impl WavePool {
    pub fn new(gate: Arc<ExecutionGate>, workers: usize) -> Self {
        Self {
            gate,
            workers: workers.max(1),
        }
    }

    /// Dispatch every node of a wave on workers `1..=N`.
    ///
    /// The first fatal failure stops workers from taking new nodes; nodes
    /// already running finish. That failure is returned once every worker
    /// has stopped.
    pub async fn run_wave(&self, nodes: Vec<Node>, phase: u32) -> Result<Vec<Dispatched>> {
        if nodes.is_empty() {
            return Ok(Vec::new());
        }
        let workers = self.workers.min(nodes.len());

        let (task_tx, task_rx) = mpsc::channel::<Node>(nodes.len());
        for node in nodes {
            // Capacity covers the whole wave, the send never waits.
            if task_tx.send(node).await.is_err() {
                break;
            }
        }
        drop(task_tx);

        let queue = Arc::new(Mutex::new(task_rx));
        let stop = Arc::new(AtomicBool::new(false));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<Result<Dispatched>>();

        let mut pool = JoinSet::new();
        for worker_id in 1..=workers {
            let gate = self.gate.clone();
            let queue = queue.clone();
            let stop = stop.clone();
            let results = result_tx.clone();
            pool.spawn(async move {
                loop {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    let Some(node) = queue.lock().await.recv().await else {
                        break;
                    };
                    let name = node.name.clone();
                    debug!(node = %name, worker = worker_id, phase, "Worker picked node");

                    let result = gate
                        .dispatch(node, phase, worker_id)
                        .await
                        .map(|outcome| Dispatched { node: name, outcome });
                    if result.is_err() {
                        stop.store(true, Ordering::SeqCst);
                    }
                    if results.send(result).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut dispatched = Vec::new();
        let mut failure: Option<OrchestratorError> = None;
        while let Some(result) = result_rx.recv().await {
            match result {
                Ok(done) => dispatched.push(done),
                Err(e) if failure.is_none() => failure = Some(e),
                Err(e) => warn!(error = %e, "Additional failure in wave"),
            }
        }
        while let Some(joined) = pool.join_next().await {
            joined?;
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(dispatched),
        }
    }
}
