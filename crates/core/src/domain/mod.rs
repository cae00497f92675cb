pub mod environment;
pub mod node;
pub mod node_set;
