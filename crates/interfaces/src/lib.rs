pub mod error;
pub mod registry;
pub mod script;
pub mod traits;

pub use error::{ExecutorError, Result};
pub use registry::ExecutorRegistry;
pub use script::{forward_lines, ScriptExecutor};
pub use traits::{ActionExecutor, ActionInvocation, ActionOutcome};
