//! Hierarchical-agglomerative clustering with Lance–Williams updates.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::error::{ClusterError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    #[default]
    Average,
    Complete,
    Single,
    /// Treats the input distances as Euclidean.
    Ward,
}

impl Linkage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Linkage::Average => "average",
            Linkage::Complete => "complete",
            Linkage::Single => "single",
            Linkage::Ward => "ward",
        }
    }

    /// Distance from the merge of `i` and `j` to a third cluster `k`.
    fn update(&self, d_ik: f64, d_jk: f64, d_ij: f64, n_i: f64, n_j: f64, n_k: f64) -> f64 {
        match self {
            Linkage::Single => d_ik.min(d_jk),
            Linkage::Complete => d_ik.max(d_jk),
            Linkage::Average => (n_i * d_ik + n_j * d_jk) / (n_i + n_j),
            Linkage::Ward => {
                let sq = ((n_i + n_k) * d_ik * d_ik + (n_j + n_k) * d_jk * d_jk
                    - n_k * d_ij * d_ij)
                    / (n_i + n_j + n_k);
                sq.max(0.0).sqrt()
            }
        }
    }
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Linkage {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "average" => Ok(Linkage::Average),
            "complete" => Ok(Linkage::Complete),
            "single" => Ok(Linkage::Single),
            "ward" => Ok(Linkage::Ward),
            other => Err(ClusterError::config(format!("unknown linkage: {}", other))),
        }
    }
}

/// `round(sqrt(n))`, at least 1.
pub fn default_n_clusters(n: usize) -> usize {
    ((n as f64).sqrt().round() as usize).max(1)
}

/// Merge the closest pair of clusters until `n_clusters` remain.
///
/// Ties go to the lowest `(i, j)` pair. Labels are numbered in order of each
/// cluster's lowest member index.
pub fn agglomerative(
    distances: &Array2<f64>,
    n_clusters: Option<usize>,
    linkage: Linkage,
) -> Result<Vec<i32>> {
    let n = distances.nrows();
    if distances.ncols() != n {
        return Err(ClusterError::InvalidInput(
            "agglomerative clustering requires a square distance matrix".to_string(),
        ));
    }
    if n == 0 {
        return Ok(Vec::new());
    }
    let target = n_clusters.unwrap_or_else(|| default_n_clusters(n));
    if target == 0 {
        return Err(ClusterError::config("n_clusters must be >= 1"));
    }
    let target = target.min(n);

    let mut d = distances.clone();
    let mut active = vec![true; n];
    let mut members: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
    let mut remaining = n;

    while remaining > target {
        let mut best: Option<(usize, usize, f64)> = None;
        for i in 0..n {
            if !active[i] {
                continue;
            }
            for j in (i + 1)..n {
                if !active[j] {
                    continue;
                }
                let v = d[[i, j]];
                if best.map_or(true, |(_, _, b)| v < b) {
                    best = Some((i, j, v));
                }
            }
        }
        let Some((i, j, d_ij)) = best else {
            break;
        };

        let n_i = members[i].len() as f64;
        let n_j = members[j].len() as f64;
        for k in 0..n {
            if !active[k] || k == i || k == j {
                continue;
            }
            let n_k = members[k].len() as f64;
            let updated = linkage.update(d[[i, k]], d[[j, k]], d_ij, n_i, n_j, n_k);
            d[[i, k]] = updated;
            d[[k, i]] = updated;
        }

        let moved = std::mem::take(&mut members[j]);
        members[i].extend(moved);
        active[j] = false;
        remaining -= 1;
    }

    let mut groups: Vec<&Vec<usize>> = members
        .iter()
        .enumerate()
        .filter(|(idx, _)| active[*idx])
        .map(|(_, m)| m)
        .collect();
    groups.sort_by_key(|m| m.iter().min().copied().unwrap_or(usize::MAX));

    let mut labels = vec![0i32; n];
    for (label, group) in groups.iter().enumerate() {
        for p in group.iter() {
            labels[*p] = label as i32;
        }
    }
    debug!(
        "Agglomerative ({}): {} points into {} clusters",
        linkage,
        n,
        groups.len()
    );
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(points: &[f64]) -> Array2<f64> {
        let n = points.len();
        Array2::from_shape_fn((n, n), |(i, j)| (points[i] - points[j]).abs())
    }

    #[test]
    fn test_two_groups_every_linkage() {
        let d = line(&[0.0, 0.1, 0.2, 5.0, 5.1]);
        for linkage in [Linkage::Average, Linkage::Complete, Linkage::Single, Linkage::Ward] {
            let labels = agglomerative(&d, Some(2), linkage).unwrap();
            assert_eq!(labels, vec![0, 0, 0, 1, 1], "linkage {}", linkage);
        }
    }

    #[test]
    fn test_default_cluster_count() {
        assert_eq!(default_n_clusters(9), 3);
        assert_eq!(default_n_clusters(10), 3);
        assert_eq!(default_n_clusters(1), 1);
        let d = line(&[0.0, 0.1, 3.0, 3.1, 9.0, 9.1, 9.2, 20.0, 20.1]);
        let labels = agglomerative(&d, None, Linkage::Average).unwrap();
        let distinct: std::collections::BTreeSet<i32> = labels.iter().copied().collect();
        assert_eq!(distinct.len(), 3);
    }

    #[test]
    fn test_n_clusters_capped_at_n() {
        let d = line(&[0.0, 1.0]);
        assert_eq!(agglomerative(&d, Some(5), Linkage::Single).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_linkage_parse() {
        assert_eq!("Ward".parse::<Linkage>().unwrap(), Linkage::Ward);
        assert!("centroid".parse::<Linkage>().is_err());
    }
}
