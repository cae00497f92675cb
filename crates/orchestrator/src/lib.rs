//! Phase orchestration for cutover runs.
//!
//! [`Orchestrator`] loads and certifies the node set once, then walks the
//! phases. Every node of every phase goes through the [`ExecutionGate`],
//! either serially or wave by wave on a [`WavePool`].

pub mod config;
pub mod engine;
pub mod error;
pub mod files;
pub mod gate;
pub mod lock;
pub mod markers;
pub mod node_env;
pub mod processes;
pub mod resources;
pub mod state_machine;
pub mod workers;

pub use config::{NodeFilter, OrchestratorConfig, PhaseSelection};
pub use engine::{Orchestrator, RunOutcome, RunSummary};
pub use error::{OrchestratorError, Result};
pub use files::RunPaths;
pub use gate::{ActionRecord, ActionStatus, DispatchOutcome, ExecutionGate};
pub use lock::{lock_key, FileLockManager, LockManager};
pub use markers::{FsMarkerStore, MarkerKey, MarkerStore};
pub use node_env::NodeEnvironment;
pub use processes::ProcessRunner;
pub use state_machine::{PhaseCursor, PhaseState};
pub use workers::{Dispatched, WavePool};
