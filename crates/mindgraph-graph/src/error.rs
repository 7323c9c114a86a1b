use mindgraph_core::MindGraphError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Unsupported subgraph strategy: {0}")]
    UnsupportedStrategy(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] MindGraphError),
}

impl GraphError {
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::UnsupportedStrategy(_) => true,
            Self::Core(e) => e.is_fatal(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
