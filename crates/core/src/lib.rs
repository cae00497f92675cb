//! Domain model for cutover orchestration.
//!
//! A [`Node`] is one unit of orchestrated work (a service, a database, a topic,
//! an app). Nodes declare dependencies on each other, the environments they are
//! active in, and the phases their actions fire in. A [`NodeSet`] holds the
//! resolved nodes of one run and enforces the naming invariants.

pub mod domain;
pub mod error;

pub use domain::environment::EnvironmentFlags;
pub use domain::node::{ActionSpec, DependencyRef, Node, ParentRef, VIRTUAL_TYPE};
pub use domain::node_set::{InsertOutcome, NodeSet};
pub use error::{CoreError, Result};
