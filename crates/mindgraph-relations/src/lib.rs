pub mod llm;
pub mod rules;

pub use llm::*;
pub use rules::*;

// Re-export common types for convenience
pub use mindgraph_core::{MindGraphError, Relation, RelationType, Result, RuleThresholds};
