//! LLM escalation path: candidate selection, prompts, tolerant response
//! parsing, why/how extraction and hierarchical rollup.

pub mod artifact;
pub mod candidates;
pub mod outline;
pub mod parse;
pub mod prompt;
pub mod rollup;
pub mod why_how;

pub use artifact::*;
pub use candidates::*;
pub use outline::*;
pub use parse::*;
pub use prompt::*;
pub use rollup::*;
pub use why_how::*;
