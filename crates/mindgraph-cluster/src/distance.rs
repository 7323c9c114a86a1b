//! Per-signal distance matrices and their normalized composite.
//!
//! Three independent signals are computed over a fixed item set:
//!
//! - **embedding**: `1 - cosine` between item vectors
//! - **time**: Gaussian kernel over the closest approach of two timestamp lists
//! - **hierarchy**: shared segment prefix of the items' source paths
//!
//! [`combine`] shifts each signal to a zero minimum, scales it by its own
//! standard deviation and sums the results with validated weights.

use chrono::{DateTime, Utc};
use mindgraph_core::{DistanceConfig, Item, WEIGHT_SUM_TOLERANCE};
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::error::{ClusterError, Result};

/// Which signal a matrix was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Embedding,
    Time,
    Hierarchy,
    Composite,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Signal::Embedding => "embedding",
            Signal::Time => "time",
            Signal::Hierarchy => "hierarchy",
            Signal::Composite => "composite",
        };
        f.write_str(name)
    }
}

/// Square, symmetric, non-negative matrix with a zero diagonal.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    signal: Signal,
    values: Array2<f64>,
}

impl DistanceMatrix {
    /// Wrap a square array. Symmetry is not re-checked here.
    pub fn new(signal: Signal, values: Array2<f64>) -> Result<Self> {
        let (rows, cols) = values.dim();
        if rows != cols {
            return Err(ClusterError::InvalidInput(format!(
                "distance matrix must be square, got {}x{}",
                rows, cols
            )));
        }
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(ClusterError::InvalidInput(
                "distance matrix contains negative or non-finite values".to_string(),
            ));
        }
        Ok(Self { signal, values })
    }

    pub fn zeros(signal: Signal, n: usize) -> Self {
        Self {
            signal,
            values: Array2::zeros((n, n)),
        }
    }

    pub fn signal(&self) -> Signal {
        self.signal
    }

    pub fn len(&self) -> usize {
        self.values.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.values.nrows() == 0
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[[i, j]]
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn into_values(self) -> Array2<f64> {
        self.values
    }

    /// Values strictly above the diagonal, row-major.
    pub fn upper_triangle(&self) -> Vec<f64> {
        let n = self.len();
        let mut out = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for i in 0..n {
            for j in (i + 1)..n {
                out.push(self.values[[i, j]]);
            }
        }
        out
    }

    pub fn is_symmetric(&self, tolerance: f64) -> bool {
        let n = self.len();
        (0..n).all(|i| {
            (0..n).all(|j| (self.values[[i, j]] - self.values[[j, i]]).abs() <= tolerance)
        })
    }

    pub fn has_zero_diagonal(&self) -> bool {
        (0..self.len()).all(|i| self.values[[i, i]] == 0.0)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| *x as f64 * *y as f64)
        .sum()
}

/// Pairwise `1 - cosine` distance.
///
/// Zero vectors have similarity 0 with everything (distance 1). Values are
/// clamped at 0 and the diagonal is forced to 0.
pub fn embedding_distance(vectors: &[Vec<f32>]) -> Result<DistanceMatrix> {
    let n = vectors.len();
    if let Some(first) = vectors.first() {
        let dim = first.len();
        if let Some((idx, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dim) {
            return Err(ClusterError::InvalidInput(format!(
                "embedding {} has dimension {} (expected {})",
                idx,
                v.len(),
                dim
            )));
        }
    }

    let norms: Vec<f64> = vectors.iter().map(|v| dot(v, v).sqrt()).collect();
    let rows: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| {
            (0..n)
                .map(|j| {
                    if i == j {
                        return 0.0;
                    }
                    // Fixed operand order keeps (i, j) and (j, i) bit-identical.
                    let (a, b) = if i < j { (i, j) } else { (j, i) };
                    let denom = norms[a] * norms[b];
                    let sim = if denom > 0.0 {
                        dot(&vectors[a], &vectors[b]) / denom
                    } else {
                        0.0
                    };
                    (1.0 - sim).max(0.0)
                })
                .collect()
        })
        .collect();

    let mut values = Array2::zeros((n, n));
    for (i, row) in rows.into_iter().enumerate() {
        for (j, v) in row.into_iter().enumerate() {
            values[[i, j]] = v;
        }
    }
    Ok(DistanceMatrix {
        signal: Signal::Embedding,
        values,
    })
}

fn closest_approach_hours(a: &[DateTime<Utc>], b: &[DateTime<Utc>]) -> Option<f64> {
    a.iter()
        .flat_map(|x| b.iter().map(move |y| (*x - *y).num_milliseconds().abs()))
        .min()
        .map(|ms| ms as f64 / 3_600_000.0)
}

/// Gaussian-kernel temporal distance `1 - exp(-0.5 * (dt / bandwidth)^2)`.
///
/// `dt` is the closest approach between two items' timestamp lists, in
/// hours. An item without timestamps is at distance 1 from every other item.
pub fn time_distance(
    timestamps: &[Vec<DateTime<Utc>>],
    bandwidth_hours: f64,
) -> Result<DistanceMatrix> {
    if !(bandwidth_hours.is_finite() && bandwidth_hours > 0.0) {
        return Err(ClusterError::config(format!(
            "bandwidth_hours must be a positive number, got {}",
            bandwidth_hours
        )));
    }

    let n = timestamps.len();
    let mut values = Array2::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            let d = match closest_approach_hours(&timestamps[i], &timestamps[j]) {
                Some(dt) => {
                    let z = dt / bandwidth_hours;
                    1.0 - (-0.5 * z * z).exp()
                }
                None => 1.0,
            };
            values[[i, j]] = d;
            values[[j, i]] = d;
        }
    }
    Ok(DistanceMatrix {
        signal: Signal::Time,
        values,
    })
}

/// Policy applied to a path's segments before prefix comparison.
pub trait PathNormalizer: Send + Sync {
    fn normalize(&self, segments: Vec<String>) -> Vec<String>;
}

/// Leaves segments untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityNormalizer;

impl PathNormalizer for IdentityNormalizer {
    fn normalize(&self, segments: Vec<String>) -> Vec<String> {
        segments
    }
}

/// Drops a leading segment equal (case-insensitively) to `prefix`, so that
/// `Inbox -> A -> B` compares like `A -> B`.
#[derive(Debug, Clone)]
pub struct InboxPrefixNormalizer {
    prefix: String,
}

impl InboxPrefixNormalizer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for InboxPrefixNormalizer {
    fn default() -> Self {
        Self::new("Inbox")
    }
}

impl PathNormalizer for InboxPrefixNormalizer {
    fn normalize(&self, mut segments: Vec<String>) -> Vec<String> {
        if segments
            .first()
            .is_some_and(|s| s.eq_ignore_ascii_case(&self.prefix))
        {
            segments.remove(0);
        }
        segments
    }
}

/// Split a path into trimmed, non-empty segments and apply the normalizer.
pub fn path_segments(path: &str, delimiter: &str, normalizer: &dyn PathNormalizer) -> Vec<String> {
    let segments = path
        .split(delimiter)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    normalizer.normalize(segments)
}

/// `(max_len - common_prefix) / max_len` over path segments; two empty
/// paths are identical.
pub fn hierarchy_distance(
    paths: &[String],
    delimiter: &str,
    normalizer: &dyn PathNormalizer,
) -> Result<DistanceMatrix> {
    if delimiter.is_empty() {
        return Err(ClusterError::config("path delimiter cannot be empty"));
    }
    let segments: Vec<Vec<String>> = paths
        .iter()
        .map(|p| path_segments(p, delimiter, normalizer))
        .collect();

    let n = paths.len();
    let mut values = Array2::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            let (a, b) = (&segments[i], &segments[j]);
            let max_len = a.len().max(b.len());
            let d = if max_len == 0 {
                0.0
            } else {
                let common = a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count();
                (max_len - common) as f64 / max_len as f64
            };
            values[[i, j]] = d;
            values[[j, i]] = d;
        }
    }
    Ok(DistanceMatrix {
        signal: Signal::Hierarchy,
        values,
    })
}

/// Validated signal weights for the composite matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceWeights {
    pub embedding: f64,
    pub time: f64,
    pub hierarchy: f64,
}

impl DistanceWeights {
    pub fn new(embedding: f64, time: f64, hierarchy: f64) -> Result<Self> {
        validate_weights(&[embedding, time, hierarchy])?;
        Ok(Self {
            embedding,
            time,
            hierarchy,
        })
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.embedding, self.time, self.hierarchy]
    }
}

impl Default for DistanceWeights {
    fn default() -> Self {
        Self {
            embedding: 0.7,
            time: 0.2,
            hierarchy: 0.1,
        }
    }
}

fn validate_weights(weights: &[f64]) -> Result<()> {
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(ClusterError::config(format!(
            "weights must be finite and non-negative, got {:?}",
            weights
        )));
    }
    let sum: f64 = weights.iter().sum();
    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(ClusterError::config(format!(
            "weights must sum to 1.0, got {:.6}",
            sum
        )));
    }
    Ok(())
}

/// Weighted sum of per-signal matrices after each is shifted to a zero
/// minimum and divided by its own standard deviation (both over the upper
/// triangle). A signal with zero spread keeps its shifted values.
///
/// Weights are validated before any matrix is touched.
pub fn combine(matrices: &[&DistanceMatrix], weights: &[f64]) -> Result<DistanceMatrix> {
    if matrices.len() != weights.len() {
        return Err(ClusterError::config(format!(
            "{} matrices but {} weights",
            matrices.len(),
            weights.len()
        )));
    }
    validate_weights(weights)?;

    let n = matrices.first().map(|m| m.len()).unwrap_or(0);
    if matrices.iter().any(|m| m.len() != n) {
        return Err(ClusterError::InvalidInput(
            "all matrices must have the same size".to_string(),
        ));
    }

    let mut composite: Array2<f64> = Array2::zeros((n, n));
    if n < 2 {
        return Ok(DistanceMatrix {
            signal: Signal::Composite,
            values: composite,
        });
    }

    for (matrix, weight) in matrices.iter().zip(weights) {
        let upper = matrix.upper_triangle();
        let min = upper.iter().cloned().fold(f64::INFINITY, f64::min);
        let count = upper.len() as f64;
        let mean = upper.iter().map(|v| v - min).sum::<f64>() / count;
        let var = upper
            .iter()
            .map(|v| {
                let d = (v - min) - mean;
                d * d
            })
            .sum::<f64>()
            / count;
        let std = var.sqrt();
        debug!(
            "Normalizing {} signal: min={:.6}, std={:.6}, weight={}",
            matrix.signal(),
            min,
            std,
            weight
        );

        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let shifted = (matrix.get(i, j) - min).max(0.0);
                let normalized = if std > 0.0 { shifted / std } else { shifted };
                composite[[i, j]] += weight * normalized;
            }
        }
    }

    let mut values = Array2::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            let v = 0.5 * (composite[[i, j]] + composite[[j, i]]);
            values[[i, j]] = v;
            values[[j, i]] = v;
        }
    }
    Ok(DistanceMatrix {
        signal: Signal::Composite,
        values,
    })
}

/// The four matrices produced for one item set.
#[derive(Debug, Clone)]
pub struct DistanceSet {
    pub embedding: DistanceMatrix,
    pub time: DistanceMatrix,
    pub hierarchy: DistanceMatrix,
    pub composite: DistanceMatrix,
}

/// Computes every signal for a slice of items using one configuration.
pub struct DistanceCalculator {
    weights: DistanceWeights,
    bandwidth_hours: f64,
    delimiter: String,
    normalizer: Box<dyn PathNormalizer>,
}

impl DistanceCalculator {
    pub fn new(weights: DistanceWeights, bandwidth_hours: f64) -> Result<Self> {
        if !(bandwidth_hours.is_finite() && bandwidth_hours > 0.0) {
            return Err(ClusterError::config("bandwidth_hours must be > 0"));
        }
        Ok(Self {
            weights,
            bandwidth_hours,
            delimiter: " -> ".to_string(),
            normalizer: Box::new(IdentityNormalizer),
        })
    }

    pub fn from_config(config: &DistanceConfig) -> Result<Self> {
        let weights = DistanceWeights::new(
            config.embedding_weight,
            config.time_weight,
            config.hierarchy_weight,
        )?;
        let calculator = Self::new(weights, config.bandwidth_hours)?
            .with_delimiter(config.path_delimiter.clone());
        Ok(if config.strip_inbox_prefix {
            calculator.with_normalizer(InboxPrefixNormalizer::default())
        } else {
            calculator
        })
    }

    #[must_use]
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    #[must_use]
    pub fn with_normalizer(mut self, normalizer: impl PathNormalizer + 'static) -> Self {
        self.normalizer = Box::new(normalizer);
        self
    }

    pub fn weights(&self) -> DistanceWeights {
        self.weights
    }

    /// Every item must carry an embedding.
    pub fn compute(&self, items: &[Item]) -> Result<DistanceSet> {
        let vectors = items
            .iter()
            .map(|item| {
                item.embedding
                    .clone()
                    .ok_or_else(|| ClusterError::MissingEmbedding(item.id.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        let timestamps: Vec<Vec<DateTime<Utc>>> =
            items.iter().map(|i| i.timestamps.clone()).collect();
        let paths: Vec<String> = items.iter().map(|i| i.path.clone()).collect();

        let embedding = embedding_distance(&vectors)?;
        let time = time_distance(&timestamps, self.bandwidth_hours)?;
        let hierarchy = hierarchy_distance(&paths, &self.delimiter, self.normalizer.as_ref())?;
        let composite = combine(&[&embedding, &time, &hierarchy], &self.weights.as_array())?;
        debug!("Computed distance set for {} items", items.len());

        Ok(DistanceSet {
            embedding,
            time,
            hierarchy,
            composite,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_embedding_distance_basic() {
        let m = embedding_distance(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0]]).unwrap();
        assert_relative_eq!(m.get(0, 1), 1.0);
        assert_relative_eq!(m.get(0, 2), 0.0);
        assert!(m.has_zero_diagonal());
        assert!(m.is_symmetric(0.0));
    }

    #[test]
    fn test_embedding_distance_zero_vector() {
        let m = embedding_distance(&[vec![0.0, 0.0], vec![0.0, 1.0]]).unwrap();
        assert_relative_eq!(m.get(0, 1), 1.0);
    }

    #[test]
    fn test_embedding_distance_is_idempotent() {
        let vectors = vec![vec![0.3, 0.1, 0.7], vec![0.2, 0.9, 0.1], vec![0.5, 0.5, 0.5]];
        let a = embedding_distance(&vectors).unwrap();
        let b = embedding_distance(&vectors).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_embedding_dimension_mismatch() {
        assert!(embedding_distance(&[vec![1.0], vec![1.0, 0.0]]).is_err());
    }

    #[test]
    fn test_time_distance_closest_approach() {
        let ts = vec![
            vec![t0()],
            vec![t0() + Duration::hours(100), t0() + Duration::hours(1)],
            vec![],
        ];
        let m = time_distance(&ts, 24.0).unwrap();
        let z: f64 = 1.0 / 24.0;
        assert_relative_eq!(m.get(0, 1), 1.0 - (-0.5 * z * z).exp(), epsilon = 1e-12);
        assert_relative_eq!(m.get(0, 2), 1.0);
        assert_eq!(m.get(2, 2), 0.0);
    }

    #[test]
    fn test_time_distance_rejects_bad_bandwidth() {
        let err = time_distance(&[vec![t0()]], 0.0).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_hierarchy_distance_prefix() {
        let paths = vec![
            "Work -> Infra -> Deploy".to_string(),
            "Work -> Infra -> Monitoring".to_string(),
            "Home".to_string(),
            "".to_string(),
            "".to_string(),
        ];
        let m = hierarchy_distance(&paths, " -> ", &IdentityNormalizer).unwrap();
        assert_relative_eq!(m.get(0, 1), 1.0 / 3.0);
        assert_relative_eq!(m.get(0, 2), 1.0);
        assert_relative_eq!(m.get(3, 4), 0.0);
        assert_relative_eq!(m.get(2, 3), 1.0);
    }

    #[test]
    fn test_inbox_prefix_normalizer() {
        let paths = vec!["Inbox -> A -> B".to_string(), "A -> B".to_string()];
        let stripped =
            hierarchy_distance(&paths, " -> ", &InboxPrefixNormalizer::default()).unwrap();
        assert_relative_eq!(stripped.get(0, 1), 0.0);
        let raw = hierarchy_distance(&paths, " -> ", &IdentityNormalizer).unwrap();
        assert_relative_eq!(raw.get(0, 1), 1.0);
    }

    #[test]
    fn test_combine_rejects_bad_weights_first() {
        // Size mismatch would also fail, but weights are checked first.
        let a = DistanceMatrix::zeros(Signal::Embedding, 2);
        let b = DistanceMatrix::zeros(Signal::Time, 3);
        let err = combine(&[&a, &b], &[0.5, 0.6]).unwrap_err();
        assert!(matches!(err, ClusterError::Config(_)));
        assert!(combine(&[&a, &a], &[0.5, 0.5 + 5e-7]).is_ok());
    }

    #[test]
    fn test_combine_single_item() {
        let a = DistanceMatrix::zeros(Signal::Embedding, 1);
        let c = combine(&[&a], &[1.0]).unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c.get(0, 0), 0.0);
        let empty = DistanceMatrix::zeros(Signal::Embedding, 0);
        assert!(combine(&[&empty], &[1.0]).unwrap().is_empty());
    }

    #[test]
    fn test_combine_constant_signal_keeps_shifted_values() {
        let mut values = Array2::<f64>::from_elem((3, 3), 0.4);
        for i in 0..3 {
            values[[i, i]] = 0.0;
        }
        let constant = DistanceMatrix::new(Signal::Hierarchy, values).unwrap();
        let c = combine(&[&constant], &[1.0]).unwrap();
        assert!(c.values().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_composite_orders_near_pairs_first() {
        let items = vec![
            Item::new("a", "x")
                .with_timestamp(t0())
                .with_path("chat")
                .with_embedding(vec![1.0, 0.0]),
            Item::new("b", "y")
                .with_timestamp(t0() + Duration::hours(1))
                .with_path("chat")
                .with_embedding(vec![0.99, 0.01]),
            Item::new("c", "z")
                .with_timestamp(t0() + Duration::hours(200))
                .with_path("chat")
                .with_embedding(vec![0.0, 1.0]),
        ];
        let calc =
            DistanceCalculator::new(DistanceWeights::new(0.7, 0.2, 0.1).unwrap(), 24.0).unwrap();
        let set = calc.compute(&items).unwrap();
        let c = &set.composite;
        assert!(c.get(0, 1) * 10.0 < c.get(0, 2));
        assert!(c.is_symmetric(0.0));
        assert!(c.has_zero_diagonal());
        assert_eq!(c.signal(), Signal::Composite);
    }

    #[test]
    fn test_compute_requires_embeddings() {
        let calc = DistanceCalculator::new(DistanceWeights::default(), 24.0).unwrap();
        let err = calc.compute(&[Item::new("a", "x")]).unwrap_err();
        assert!(matches!(err, ClusterError::MissingEmbedding(id) if id == "a"));
    }
}
