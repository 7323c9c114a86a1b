pub mod cache;
pub mod config;
pub mod error;
pub mod item;
pub mod logging;
pub mod oracle;
pub mod relation;

pub use cache::*;
pub use config::*;
pub use error::*;
pub use item::*;
pub use oracle::*;
pub use relation::*;
