pub mod error;
pub mod graph;
pub mod record;
pub mod scoring;
pub mod subgraph;
pub mod traversal;

pub use error::*;
pub use graph::*;
pub use record::*;
pub use scoring::*;
pub use subgraph::*;

// Re-export common types for convenience
pub use mindgraph_core::{Relation, RelationType};
