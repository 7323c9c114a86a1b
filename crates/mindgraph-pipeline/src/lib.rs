pub mod clustering;
pub mod embed;
pub mod error;
pub mod extraction;
pub mod grouping;
pub mod persist;
pub mod pipeline;
pub mod rag;
pub mod relation_stage;

pub use clustering::*;
pub use embed::*;
pub use error::*;
pub use extraction::*;
pub use grouping::*;
pub use persist::*;
pub use pipeline::*;
pub use rag::*;
pub use relation_stage::*;

pub use mindgraph_core::{MessageRecord, MindGraphConfig};
