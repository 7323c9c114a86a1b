use mindgraph_cluster::ClusterError;
use mindgraph_core::MindGraphError;
use mindgraph_graph::GraphError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] MindGraphError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn oracle(err: impl std::fmt::Display) -> Self {
        Self::Oracle(err.to_string())
    }

    /// Configuration problems abort the run; everything else is scoped to
    /// the unit that raised it.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Core(e) => e.is_fatal(),
            Self::Cluster(e) => e.is_fatal(),
            Self::Graph(e) => e.is_fatal(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
