//! Size-constrained k-means over Euclidean feature vectors.
//!
//! Each iteration assigns points greedily in order of increasing squared
//! distance while respecting `size_max`, then repairs clusters below
//! `size_min` with the cheapest moves from clusters that can spare a member.

use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ClusterError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstrainedKMeansParams {
    pub n_clusters: Option<usize>,
    pub size_min: usize,
    pub size_max: usize,
    pub n_init: usize,
    pub max_iter: usize,
    pub random_state: u64,
}

impl Default for ConstrainedKMeansParams {
    fn default() -> Self {
        Self {
            n_clusters: None,
            size_min: 3,
            size_max: 10,
            n_init: 10,
            max_iter: 300,
            random_state: 42,
        }
    }
}

impl ConstrainedKMeansParams {
    #[must_use]
    pub fn with_n_clusters(mut self, k: usize) -> Self {
        self.n_clusters = Some(k);
        self
    }

    #[must_use]
    pub fn with_sizes(mut self, size_min: usize, size_max: usize) -> Self {
        self.size_min = size_min;
        self.size_max = size_max;
        self
    }

    #[must_use]
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    /// `round(n / ((size_min + size_max) / 2))`, at least 2.
    pub fn default_n_clusters(&self, n: usize) -> usize {
        let mean_size = (self.size_min + self.size_max) as f64 / 2.0;
        if mean_size <= 0.0 {
            return 2;
        }
        ((n as f64 / mean_size).round() as usize).max(2)
    }

    pub fn resolve_n_clusters(&self, n: usize) -> usize {
        self.n_clusters.unwrap_or_else(|| self.default_n_clusters(n))
    }

    /// Size bounds must admit a partition of `n` points into `k` clusters.
    pub fn check_feasible(&self, n: usize, k: usize) -> Result<()> {
        if k == 0 {
            return Err(ClusterError::config("n_clusters must be >= 1"));
        }
        if self.size_min > self.size_max {
            return Err(ClusterError::config(format!(
                "size_min {} exceeds size_max {}",
                self.size_min, self.size_max
            )));
        }
        if self.n_init == 0 || self.max_iter == 0 {
            return Err(ClusterError::config("n_init and max_iter must be > 0"));
        }
        if n < k * self.size_min || n > k * self.size_max {
            return Err(ClusterError::Infeasible(format!(
                "{} points cannot form {} clusters of size {}..={}",
                n, k, self.size_min, self.size_max
            )));
        }
        Ok(())
    }
}

fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn kmeans_plus_plus(features: &Array2<f64>, k: usize, rng: &mut StdRng) -> Array2<f64> {
    let n = features.nrows();
    let mut centers = Array2::zeros((k, features.ncols()));
    let first = rng.random_range(0..n);
    centers.row_mut(0).assign(&features.row(first));

    let mut closest: Vec<f64> = (0..n)
        .map(|i| squared_distance(features.row(i), centers.row(0)))
        .collect();
    for c in 1..k {
        let total: f64 = closest.iter().sum();
        let chosen = if total <= 0.0 {
            rng.random_range(0..n)
        } else {
            let mut target = rng.random::<f64>() * total;
            let mut pick = n - 1;
            for (i, w) in closest.iter().enumerate() {
                if target < *w {
                    pick = i;
                    break;
                }
                target -= w;
            }
            pick
        };
        centers.row_mut(c).assign(&features.row(chosen));
        for (i, best) in closest.iter_mut().enumerate() {
            *best = best.min(squared_distance(features.row(i), centers.row(c)));
        }
    }
    centers
}

fn cost_matrix(features: &Array2<f64>, centers: &Array2<f64>) -> Array2<f64> {
    Array2::from_shape_fn((features.nrows(), centers.nrows()), |(i, c)| {
        squared_distance(features.row(i), centers.row(c))
    })
}

/// Capacity-respecting assignment followed by minimum-size repair.
fn constrained_assign(cost: &Array2<f64>, size_min: usize, size_max: usize) -> Vec<usize> {
    let (n, k) = cost.dim();
    let mut pairs: Vec<(f64, usize, usize)> = Vec::with_capacity(n * k);
    for i in 0..n {
        for c in 0..k {
            pairs.push((cost[[i, c]], i, c));
        }
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

    let mut assignment = vec![usize::MAX; n];
    let mut counts = vec![0usize; k];
    for (_, i, c) in pairs {
        if assignment[i] == usize::MAX && counts[c] < size_max {
            assignment[i] = c;
            counts[c] += 1;
        }
    }

    while let Some(short) = (0..k).find(|c| counts[*c] < size_min) {
        let mut best: Option<(f64, usize)> = None;
        for (i, from) in assignment.iter().enumerate() {
            if *from == short || counts[*from] <= size_min {
                continue;
            }
            let delta = cost[[i, short]] - cost[[i, *from]];
            if best.map_or(true, |(b, _)| delta < b) {
                best = Some((delta, i));
            }
        }
        let Some((_, i)) = best else {
            break;
        };
        counts[assignment[i]] -= 1;
        assignment[i] = short;
        counts[short] += 1;
    }
    assignment
}

fn update_centers(features: &Array2<f64>, assignment: &[usize], centers: &mut Array2<f64>) {
    let k = centers.nrows();
    let mut sums = Array2::<f64>::zeros(centers.dim());
    let mut counts = vec![0usize; k];
    for (i, c) in assignment.iter().enumerate() {
        let mut row = sums.row_mut(*c);
        row += &features.row(i);
        counts[*c] += 1;
    }
    for c in 0..k {
        if counts[c] > 0 {
            let mean = &sums.row(c) / counts[c] as f64;
            centers.row_mut(c).assign(&mean);
        }
    }
}

fn relabel_by_first_member(assignment: &[usize], k: usize) -> Vec<i32> {
    let mut mapping = vec![i32::MAX; k];
    let mut next = 0;
    for c in assignment {
        if mapping[*c] == i32::MAX {
            mapping[*c] = next;
            next += 1;
        }
    }
    assignment.iter().map(|c| mapping[*c]).collect()
}

/// Result of one constrained k-means run.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansFit {
    pub labels: Vec<i32>,
    pub inertia: f64,
    pub n_iter: usize,
}

/// Run `n_init` seeded restarts and keep the lowest-inertia partition.
pub fn constrained_kmeans(
    features: &Array2<f64>,
    params: &ConstrainedKMeansParams,
) -> Result<KMeansFit> {
    let n = features.nrows();
    if n == 0 {
        return Ok(KMeansFit {
            labels: Vec::new(),
            inertia: 0.0,
            n_iter: 0,
        });
    }
    let k = params.resolve_n_clusters(n);
    params.check_feasible(n, k)?;

    let mut best: Option<KMeansFit> = None;
    for run in 0..params.n_init {
        let mut rng = StdRng::seed_from_u64(params.random_state.wrapping_add(run as u64));
        let mut centers = kmeans_plus_plus(features, k, &mut rng);
        let mut assignment: Vec<usize> = Vec::new();
        let mut iterations = 0;

        for iter in 0..params.max_iter {
            iterations = iter + 1;
            let cost = cost_matrix(features, &centers);
            let next = constrained_assign(&cost, params.size_min, params.size_max);
            let stable = next == assignment;
            assignment = next;
            update_centers(features, &assignment, &mut centers);
            if stable {
                break;
            }
        }

        let cost = cost_matrix(features, &centers);
        let inertia: f64 = assignment
            .iter()
            .enumerate()
            .map(|(i, c)| cost[[i, *c]])
            .sum();
        debug!(
            "Constrained k-means run {}: inertia {:.6} after {} iterations",
            run, inertia, iterations
        );
        if best.as_ref().map_or(true, |b| inertia < b.inertia) {
            best = Some(KMeansFit {
                labels: relabel_by_first_member(&assignment, k),
                inertia,
                n_iter: iterations,
            });
        }
    }

    best.ok_or_else(|| ClusterError::config("n_init must be > 0"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> Array2<f64> {
        let mut data = Vec::new();
        for (cx, cy) in [(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)] {
            for i in 0..4 {
                data.push(cx + (i % 2) as f64 * 0.2);
                data.push(cy + (i / 2) as f64 * 0.2);
            }
        }
        Array2::from_shape_vec((12, 2), data).unwrap()
    }

    #[test]
    fn test_separated_blobs() {
        let params = ConstrainedKMeansParams::default()
            .with_n_clusters(3)
            .with_sizes(4, 4);
        let fit = constrained_kmeans(&blobs(), &params).unwrap();
        assert_eq!(fit.labels, vec![0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2]);
    }

    #[test]
    fn test_sizes_respected() {
        let params = ConstrainedKMeansParams::default()
            .with_n_clusters(2)
            .with_sizes(5, 7);
        let fit = constrained_kmeans(&blobs(), &params).unwrap();
        let zeros = fit.labels.iter().filter(|l| **l == 0).count();
        assert!((5..=7).contains(&zeros));
        assert!((5..=7).contains(&(12 - zeros)));
    }

    #[test]
    fn test_infeasible_constraints() {
        let params = ConstrainedKMeansParams::default()
            .with_n_clusters(2)
            .with_sizes(7, 10);
        let err = constrained_kmeans(&blobs(), &params).unwrap_err();
        assert!(matches!(err, ClusterError::Infeasible(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_default_cluster_count() {
        let params = ConstrainedKMeansParams::default().with_sizes(3, 10);
        assert_eq!(params.default_n_clusters(13), 2);
        assert_eq!(params.default_n_clusters(40), 6);
        assert_eq!(params.default_n_clusters(2), 2);
    }

    #[test]
    fn test_seeded_runs_are_deterministic() {
        let params = ConstrainedKMeansParams::default()
            .with_n_clusters(3)
            .with_sizes(2, 6)
            .with_random_state(7);
        let a = constrained_kmeans(&blobs(), &params).unwrap();
        let b = constrained_kmeans(&blobs(), &params).unwrap();
        assert_eq!(a, b);
    }
}
