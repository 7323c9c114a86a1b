use mindgraph_core::ClusterConfig;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use crate::agglomerative::{agglomerative, default_n_clusters, Linkage};
use crate::distance::DistanceMatrix;
use crate::error::{ClusterError, Result};
use crate::hdbscan::{hdbscan, HdbscanParams, NOISE};
use crate::kmeans::{constrained_kmeans, ConstrainedKMeansParams};
use crate::mds::classical_mds;

/// Interchangeable clustering strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMethod {
    Hdbscan,
    Agglomerative,
    KMeansConstrained,
}

impl ClusterMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterMethod::Hdbscan => "hdbscan",
            ClusterMethod::Agglomerative => "hierarchical",
            ClusterMethod::KMeansConstrained => "kmeans_constrained",
        }
    }
}

impl fmt::Display for ClusterMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusterMethod {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "hdbscan" | "density" => Ok(ClusterMethod::Hdbscan),
            "hierarchical" | "agglomerative" => Ok(ClusterMethod::Agglomerative),
            "kmeans_constrained" | "kmeans-constrained" | "constrained_kmeans" => {
                Ok(ClusterMethod::KMeansConstrained)
            }
            other => Err(ClusterError::UnknownMethod(other.to_string())),
        }
    }
}

/// Everything any strategy may need. Fields a strategy does not use are
/// ignored by it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterParams {
    pub method: ClusterMethod,
    pub min_cluster_size: usize,
    pub min_samples: Option<usize>,
    pub allow_single_cluster: bool,
    pub n_clusters: Option<usize>,
    pub linkage: Linkage,
    pub size_min: usize,
    pub size_max: usize,
    pub n_init: usize,
    pub max_iter: usize,
    pub random_state: u64,
    pub convert_noise_to_cluster: bool,
}

impl Default for ClusterParams {
    fn default() -> Self {
        let hdbscan = HdbscanParams::default();
        let kmeans = ConstrainedKMeansParams::default();
        Self {
            method: ClusterMethod::Hdbscan,
            min_cluster_size: hdbscan.min_cluster_size,
            min_samples: hdbscan.min_samples,
            allow_single_cluster: hdbscan.allow_single_cluster,
            n_clusters: None,
            linkage: Linkage::default(),
            size_min: kmeans.size_min,
            size_max: kmeans.size_max,
            n_init: kmeans.n_init,
            max_iter: kmeans.max_iter,
            random_state: kmeans.random_state,
            convert_noise_to_cluster: true,
        }
    }
}

impl ClusterParams {
    pub fn new(method: ClusterMethod) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    /// Parse the method and linkage names. Unknown names are fatal.
    pub fn from_config(config: &ClusterConfig) -> Result<Self> {
        Ok(Self {
            method: config.method.parse()?,
            min_cluster_size: config.min_cluster_size,
            min_samples: config.min_samples,
            allow_single_cluster: config.allow_single_cluster,
            n_clusters: config.n_clusters,
            linkage: config.linkage.parse()?,
            size_min: config.size_min,
            size_max: config.size_max,
            n_init: config.n_init,
            max_iter: config.max_iter,
            random_state: config.random_state,
            convert_noise_to_cluster: config.convert_noise_to_cluster,
        })
    }

    #[must_use]
    pub fn with_min_cluster_size(mut self, size: usize) -> Self {
        self.min_cluster_size = size;
        self
    }

    #[must_use]
    pub fn with_n_clusters(mut self, k: usize) -> Self {
        self.n_clusters = Some(k);
        self
    }

    #[must_use]
    pub fn with_linkage(mut self, linkage: Linkage) -> Self {
        self.linkage = linkage;
        self
    }

    #[must_use]
    pub fn with_sizes(mut self, size_min: usize, size_max: usize) -> Self {
        self.size_min = size_min;
        self.size_max = size_max;
        self
    }

    #[must_use]
    pub fn with_convert_noise(mut self, convert: bool) -> Self {
        self.convert_noise_to_cluster = convert;
        self
    }

    pub fn hdbscan_params(&self) -> HdbscanParams {
        HdbscanParams {
            min_cluster_size: self.min_cluster_size,
            min_samples: self.min_samples,
            allow_single_cluster: self.allow_single_cluster,
        }
    }

    pub fn kmeans_params(&self) -> ConstrainedKMeansParams {
        ConstrainedKMeansParams {
            n_clusters: self.n_clusters,
            size_min: self.size_min,
            size_max: self.size_max,
            n_init: self.n_init,
            max_iter: self.max_iter,
            random_state: self.random_state,
        }
    }
}

/// What the engine clusters: a precomputed distance matrix or raw
/// Euclidean feature vectors (one row per item).
#[derive(Debug, Clone, Copy)]
pub enum ClusterInput<'a> {
    Distances(&'a DistanceMatrix),
    Features(&'a Array2<f64>),
}

impl ClusterInput<'_> {
    pub fn len(&self) -> usize {
        match self {
            ClusterInput::Distances(d) => d.len(),
            ClusterInput::Features(x) => x.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn distances(&self) -> Array2<f64> {
        match self {
            ClusterInput::Distances(d) => d.values().clone(),
            ClusterInput::Features(x) => euclidean_distances(x),
        }
    }
}

pub fn euclidean_distances(x: &Array2<f64>) -> Array2<f64> {
    let n = x.nrows();
    Array2::from_shape_fn((n, n), |(i, j)| {
        x.row(i)
            .iter()
            .zip(x.row(j).iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt()
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterResult {
    pub method: ClusterMethod,
    /// Labels as produced by the strategy (may contain `-1`).
    pub raw_labels: Vec<i32>,
    /// Labels after noise remapping.
    pub labels: Vec<i32>,
    pub n_clusters: usize,
    pub n_noise: usize,
}

/// Replace the noise label with `max(labels) + 1`, or 0 when every label is
/// noise.
pub fn remap_noise(labels: &[i32]) -> Vec<i32> {
    let other = labels
        .iter()
        .copied()
        .filter(|l| *l != NOISE)
        .max()
        .map_or(0, |m| m + 1);
    labels
        .iter()
        .map(|l| if *l == NOISE { other } else { *l })
        .collect()
}

/// A cluster id and its member ids in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: i32,
    pub members: Vec<String>,
}

/// Group ids by label, ordered by label.
pub fn group_by_label(ids: &[String], labels: &[i32]) -> Vec<Cluster> {
    let mut groups: BTreeMap<i32, Vec<String>> = BTreeMap::new();
    for (id, label) in ids.iter().zip(labels) {
        groups.entry(*label).or_default().push(id.clone());
    }
    groups
        .into_iter()
        .map(|(id, members)| Cluster { id, members })
        .collect()
}

pub struct ClusterEngine {
    params: ClusterParams,
}

impl ClusterEngine {
    pub fn new(params: ClusterParams) -> Self {
        Self { params }
    }

    pub fn from_config(config: &ClusterConfig) -> Result<Self> {
        Ok(Self::new(ClusterParams::from_config(config)?))
    }

    pub fn params(&self) -> &ClusterParams {
        &self.params
    }

    pub fn cluster(&self, input: ClusterInput<'_>) -> Result<ClusterResult> {
        let n = input.len();
        let method = self.params.method;
        let raw_labels = match method {
            ClusterMethod::Hdbscan => hdbscan(&input.distances(), &self.params.hdbscan_params())?,
            ClusterMethod::Agglomerative => {
                let k = self.params.n_clusters.unwrap_or_else(|| default_n_clusters(n));
                agglomerative(&input.distances(), Some(k), self.params.linkage)?
            }
            ClusterMethod::KMeansConstrained => self.kmeans(input)?,
        };

        let n_noise = raw_labels.iter().filter(|l| **l == NOISE).count();
        let labels = if self.params.convert_noise_to_cluster {
            remap_noise(&raw_labels)
        } else {
            raw_labels.clone()
        };
        let n_clusters = labels
            .iter()
            .filter(|l| **l != NOISE)
            .collect::<std::collections::BTreeSet<_>>()
            .len();
        info!(
            "Clustered {} items with {}: {} clusters, {} noise",
            n, method, n_clusters, n_noise
        );

        Ok(ClusterResult {
            method,
            raw_labels,
            labels,
            n_clusters,
            n_noise,
        })
    }

    fn kmeans(&self, input: ClusterInput<'_>) -> Result<Vec<i32>> {
        let params = self.params.kmeans_params();
        let n = input.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        let projected;
        let features = match input {
            ClusterInput::Features(x) => x,
            ClusterInput::Distances(d) => {
                let k = params.resolve_n_clusters(n);
                // Fail on infeasible sizes before paying for the projection.
                params.check_feasible(n, k)?;
                let components = (2 * k).min(n.saturating_sub(1));
                debug!("Projecting {} items to {} MDS components", n, components);
                projected = classical_mds(d.values(), components)?;
                &projected
            }
        };
        Ok(constrained_kmeans(features, &params)?.labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::Signal;

    fn outlier_matrix() -> DistanceMatrix {
        let mut d = Array2::<f64>::from_elem((5, 5), 0.1);
        for i in 0..5 {
            d[[i, 4]] = 5.0;
            d[[4, i]] = 5.0;
        }
        for i in 0..5 {
            d[[i, i]] = 0.0;
        }
        DistanceMatrix::new(Signal::Composite, d).unwrap()
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("density".parse::<ClusterMethod>().unwrap(), ClusterMethod::Hdbscan);
        assert_eq!(
            "Agglomerative".parse::<ClusterMethod>().unwrap(),
            ClusterMethod::Agglomerative
        );
        let err = "spectral".parse::<ClusterMethod>().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_noise_remapped_to_next_id() {
        let d = outlier_matrix();
        let engine =
            ClusterEngine::new(ClusterParams::new(ClusterMethod::Hdbscan).with_min_cluster_size(2));
        let result = engine.cluster(ClusterInput::Distances(&d)).unwrap();
        assert_eq!(result.raw_labels, vec![0, 0, 0, 0, -1]);
        assert_eq!(result.labels, vec![0, 0, 0, 0, 1]);
        assert_eq!(result.n_noise, 1);
        assert_eq!(result.n_clusters, 2);
    }

    #[test]
    fn test_noise_kept_when_conversion_disabled() {
        let d = outlier_matrix();
        let params = ClusterParams::new(ClusterMethod::Hdbscan)
            .with_min_cluster_size(2)
            .with_convert_noise(false);
        let result = ClusterEngine::new(params)
            .cluster(ClusterInput::Distances(&d))
            .unwrap();
        assert_eq!(result.labels, result.raw_labels);
    }

    #[test]
    fn test_remap_all_noise() {
        assert_eq!(remap_noise(&[-1, -1]), vec![0, 0]);
        assert_eq!(remap_noise(&[2, -1, 0]), vec![2, 3, 0]);
        assert!(remap_noise(&[]).is_empty());
    }

    #[test]
    fn test_kmeans_from_distance_matrix() {
        let x = Array2::from_shape_vec(
            (6, 1),
            vec![0.0, 0.2, 0.4, 9.0, 9.2, 9.4],
        )
        .unwrap();
        let d = DistanceMatrix::new(Signal::Composite, euclidean_distances(&x)).unwrap();
        let params = ClusterParams::new(ClusterMethod::KMeansConstrained)
            .with_n_clusters(2)
            .with_sizes(3, 3);
        let result = ClusterEngine::new(params)
            .cluster(ClusterInput::Distances(&d))
            .unwrap();
        assert_eq!(result.labels, vec![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn test_kmeans_infeasible_is_fatal() {
        let d = outlier_matrix();
        let params = ClusterParams::new(ClusterMethod::KMeansConstrained)
            .with_n_clusters(2)
            .with_sizes(3, 4);
        let err = ClusterEngine::new(params)
            .cluster(ClusterInput::Distances(&d))
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_agglomerative_on_features() {
        let x = Array2::from_shape_vec((4, 1), vec![0.0, 0.1, 7.0, 7.1]).unwrap();
        let params = ClusterParams::new(ClusterMethod::Agglomerative);
        let result = ClusterEngine::new(params)
            .cluster(ClusterInput::Features(&x))
            .unwrap();
        // round(sqrt(4)) = 2
        assert_eq!(result.labels, vec![0, 0, 1, 1]);
    }

    #[test]
    fn test_group_by_label() {
        let ids: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let clusters = group_by_label(&ids, &[1, 0, 1]);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].members, vec!["b".to_string()]);
        assert_eq!(clusters[1].members, vec!["a".to_string(), "c".to_string()]);
    }
}
