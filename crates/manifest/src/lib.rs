//! Manifest loading for cutover runs.
//!
//! - [`NodeLoader`] walks the `nodes/` tree and indexes every definition
//! - [`ProcessLoader`] reads the post-phase batch jobs
//! - [`envfile`] parses `KEY="value"` meta and credential files
//! - [`environments`] discovers the well-known environment names

pub mod envfile;
pub mod environments;
pub mod error;
pub mod loader;
pub mod process;

pub use envfile::{env_line, parse_env, parse_extra_vars, read_env_file, EnvVars};
pub use environments::discover_wellknown_environments;
pub use error::{ManifestError, Result};
pub use loader::{ManifestIndex, NodeLoader, TEAM_META_KEY};
pub use process::{ProcessDefinition, ProcessLoader};
