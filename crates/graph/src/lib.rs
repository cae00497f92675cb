//! Environment-scoped dependency graph.
//!
//! An edge `A -> B` means "A depends on B". The validator certifies a graph
//! for one environment, the planner turns a certified graph into execution
//! order, and the inspector runs every check across every environment
//! without enforcing anything.

pub mod dependency_graph;
pub mod error;
pub mod inspect;
pub mod planner;
pub mod validator;

pub use dependency_graph::{DependencyEdge, DependencyGraph};
pub use error::{GraphError, Result};
pub use inspect::{query_nodes, InspectionReport, NodeQuery};
pub use planner::{serial_order, WavePlan};
pub use validator::{
    self_references, GraphValidator, MissingDependency, SelfReference, ValidatedGraph,
    ValidationMode, ValidationReport,
};
