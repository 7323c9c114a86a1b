use thiserror::Error;

#[derive(Error, Debug)]
pub enum MindGraphError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid relation: {0}")]
    InvalidRelation(String),

    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Item not found: {0}")]
    ItemNotFound(String),
}

impl MindGraphError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Configuration errors are never recovered from; everything else may be
    /// scoped to the unit of work that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, MindGraphError>;
