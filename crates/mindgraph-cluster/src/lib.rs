pub mod agglomerative;
pub mod distance;
pub mod engine;
pub mod error;
pub mod hdbscan;
pub mod kmeans;
pub mod mds;
pub mod metrics;
pub mod output;

pub use agglomerative::{agglomerative, Linkage};
pub use distance::*;
pub use engine::*;
pub use error::{ClusterError, Result};
pub use hdbscan::{hdbscan, HdbscanParams, NOISE};
pub use kmeans::{constrained_kmeans, ConstrainedKMeansParams, KMeansFit};
pub use mds::classical_mds;
pub use metrics::{evaluate, ClusterMetrics};
pub use output::*;
