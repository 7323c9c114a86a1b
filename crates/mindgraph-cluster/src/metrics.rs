//! Diagnostic clustering quality metrics.
//!
//! Noise points are excluded. With fewer than two remaining points or fewer
//! than two clusters every metric is zero.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::distance::DistanceMatrix;
use crate::hdbscan::NOISE;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterMetrics {
    /// Mean silhouette coefficient in `[-1, 1]`; higher is better.
    pub silhouette: f64,
    /// Between/within dispersion ratio; higher is better.
    pub calinski_harabasz: f64,
    /// Mean worst-case cluster similarity; lower is better.
    pub davies_bouldin: f64,
    pub n_clusters: usize,
    pub n_noise: usize,
}

fn non_noise(labels: &[i32]) -> (Vec<usize>, BTreeMap<i32, Vec<usize>>) {
    let mut kept = Vec::new();
    let mut groups: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for (i, label) in labels.iter().enumerate() {
        if *label != NOISE {
            kept.push(i);
            groups.entry(*label).or_default().push(i);
        }
    }
    (kept, groups)
}

/// Evaluate a labelling. Silhouette uses `distances`; the feature-space
/// metrics are computed only when `features` is given.
pub fn evaluate(
    distances: &DistanceMatrix,
    features: Option<&Array2<f64>>,
    labels: &[i32],
) -> ClusterMetrics {
    let (kept, groups) = non_noise(labels);
    let n_noise = labels.len() - kept.len();
    if kept.len() < 2 || groups.len() < 2 {
        return ClusterMetrics {
            n_clusters: groups.len(),
            n_noise,
            ..ClusterMetrics::default()
        };
    }

    let (calinski_harabasz, davies_bouldin) = match features {
        Some(x) => (calinski_harabasz(x, &groups), davies_bouldin(x, &groups)),
        None => (0.0, 0.0),
    };
    ClusterMetrics {
        silhouette: silhouette(distances, labels, &kept, &groups),
        calinski_harabasz,
        davies_bouldin,
        n_clusters: groups.len(),
        n_noise,
    }
}

fn silhouette(
    distances: &DistanceMatrix,
    labels: &[i32],
    kept: &[usize],
    groups: &BTreeMap<i32, Vec<usize>>,
) -> f64 {
    if groups.len() >= kept.len() {
        return 0.0;
    }
    let total: f64 = kept
        .iter()
        .map(|&i| {
            let own = &groups[&labels[i]];
            if own.len() < 2 {
                return 0.0;
            }
            let a = own
                .iter()
                .filter(|&&j| j != i)
                .map(|&j| distances.get(i, j))
                .sum::<f64>()
                / (own.len() - 1) as f64;
            let b = groups
                .iter()
                .filter(|(label, _)| **label != labels[i])
                .map(|(_, members)| {
                    members.iter().map(|&j| distances.get(i, j)).sum::<f64>() / members.len() as f64
                })
                .fold(f64::INFINITY, f64::min);
            let denom = a.max(b);
            if denom > 0.0 {
                (b - a) / denom
            } else {
                0.0
            }
        })
        .sum();
    total / kept.len() as f64
}

fn centroid(x: &Array2<f64>, members: &[usize]) -> Array1<f64> {
    let mut c = Array1::zeros(x.ncols());
    for &i in members {
        c += &x.row(i);
    }
    c / members.len() as f64
}

fn sq_dist(a: &Array1<f64>, b: ndarray::ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn calinski_harabasz(x: &Array2<f64>, groups: &BTreeMap<i32, Vec<usize>>) -> f64 {
    let all: Vec<usize> = groups.values().flatten().copied().collect();
    let n = all.len() as f64;
    let k = groups.len() as f64;
    let overall = centroid(x, &all);

    let mut between = 0.0;
    let mut within = 0.0;
    for members in groups.values() {
        let c = centroid(x, members);
        between += members.len() as f64 * sq_dist(&c, overall.view());
        within += members.iter().map(|&i| sq_dist(&c, x.row(i))).sum::<f64>();
    }
    if within == 0.0 {
        1.0
    } else {
        between * (n - k) / (within * (k - 1.0))
    }
}

fn davies_bouldin(x: &Array2<f64>, groups: &BTreeMap<i32, Vec<usize>>) -> f64 {
    let centroids: Vec<Array1<f64>> = groups.values().map(|m| centroid(x, m)).collect();
    let scatter: Vec<f64> = groups
        .values()
        .zip(centroids.iter())
        .map(|(members, c)| {
            members
                .iter()
                .map(|&i| sq_dist(c, x.row(i)).sqrt())
                .sum::<f64>()
                / members.len() as f64
        })
        .collect();

    let k = centroids.len();
    let separation =
        |i: usize, j: usize| -> f64 { sq_dist(&centroids[i], centroids[j].view()).sqrt() };
    let all_separations_zero = (0..k).all(|i| ((i + 1)..k).all(|j| separation(i, j) == 0.0));
    if scatter.iter().all(|s| *s == 0.0) || all_separations_zero {
        return 0.0;
    }

    let total: f64 = (0..k)
        .map(|i| {
            (0..k)
                .filter(|&j| j != i)
                .map(|j| {
                    let sep = separation(i, j);
                    if sep == 0.0 {
                        0.0
                    } else {
                        (scatter[i] + scatter[j]) / sep
                    }
                })
                .fold(0.0, f64::max)
        })
        .sum();
    total / k as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::Signal;
    use approx::assert_relative_eq;

    fn setup() -> (DistanceMatrix, Array2<f64>) {
        let x = Array2::<f64>::from_shape_vec((4, 1), vec![0.0, 1.0, 10.0, 11.0]).unwrap();
        let d = Array2::from_shape_fn((4, 4), |(i, j)| (x[[i, 0]] - x[[j, 0]]).abs());
        (DistanceMatrix::new(Signal::Composite, d).unwrap(), x)
    }

    #[test]
    fn test_well_separated_metrics() {
        let (d, x) = setup();
        let m = evaluate(&d, Some(&x), &[0, 0, 1, 1]);
        assert!(m.silhouette > 0.85);
        // between = 4 * 25 = 100, within = 4 * 0.25 = 1
        assert_relative_eq!(m.calinski_harabasz, 200.0, epsilon = 1e-9);
        // scatter 0.5 each, separation 10
        assert_relative_eq!(m.davies_bouldin, 0.1, epsilon = 1e-9);
        assert_eq!(m.n_clusters, 2);
    }

    #[test]
    fn test_noise_only_is_zeroed() {
        let (d, x) = setup();
        let m = evaluate(&d, Some(&x), &[NOISE, NOISE, NOISE, 0]);
        assert_eq!(m.silhouette, 0.0);
        assert_eq!(m.calinski_harabasz, 0.0);
        assert_eq!(m.n_noise, 3);
    }

    #[test]
    fn test_single_cluster_is_zeroed() {
        let (d, _) = setup();
        let m = evaluate(&d, None, &[0, 0, 0, 0]);
        assert_eq!(m, ClusterMetrics { n_clusters: 1, ..Default::default() });
    }
}
