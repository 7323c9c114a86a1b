use mindgraph_core::MindGraphError;
use thiserror::Error;

/// Errors raised by the distance calculator and the cluster engine.
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown clustering method: {0}")]
    UnknownMethod(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Item {0} has no embedding")]
    MissingEmbedding(String),

    #[error("Infeasible size constraints: {0}")]
    Infeasible(String),

    #[error("MDS projection failed: {0}")]
    Mds(String),

    #[error(transparent)]
    Core(#[from] MindGraphError),
}

impl ClusterError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Misconfiguration and failed projections abort the run; there is no
    /// partial clustering to fall back to.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Config(_) | Self::UnknownMethod(_) | Self::Infeasible(_) | Self::Mds(_) => true,
            Self::Core(e) => e.is_fatal(),
            Self::InvalidInput(_) | Self::MissingEmbedding(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;
