use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Missing dependencies: {}", .0.join(", "))]
    MissingDependencies(Vec<String>),

    #[error("Nodes depend on themselves: {}", .0.join(", "))]
    SelfReference(Vec<String>),

    #[error("Dependency conflicts in {environment}: {}", edges.join(", "))]
    Conflicts {
        environment: String,
        edges: Vec<String>,
    },

    #[error("Isolated nodes in {environment}: {}", nodes.join(", "))]
    Isolated {
        environment: String,
        nodes: Vec<String>,
    },

    #[error("Cyclic dependencies in {environment}: {}", cycles.join(" | "))]
    Cycles {
        environment: String,
        cycles: Vec<String>,
    },

    #[error(
        "Invalid node query `{0}`: expected type=<T>[,phase=<p> <p>...][,environment=<e>][,services=<a>,<b>...]"
    )]
    InvalidQuery(String),

    #[error("Unknown services in query: {}", .0.join(", "))]
    UnknownServices(Vec<String>),

    #[error(transparent)]
    Core(#[from] cutover_core::CoreError),
}

impl GraphError {
    /// Whether `--force` can get past this failure.
    pub fn is_forceable(&self) -> bool {
        matches!(self, Self::Conflicts { .. } | Self::Isolated { .. })
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
