//! Density-based clustering (HDBSCAN) over a precomputed distance matrix.
//!
//! Steps: core distances, mutual-reachability graph, minimum spanning tree
//! (Prim), single-linkage hierarchy, condensed tree, excess-of-mass cluster
//! selection. Points not captured by a selected cluster are labelled
//! [`NOISE`].

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ClusterError, Result};

/// Label given to outliers.
pub const NOISE: i32 = -1;

/// Stand-in for `1 / 0` when two points coincide.
const LAMBDA_CAP: f64 = 1e12;

/// Parameters for HDBSCAN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HdbscanParams {
    /// Minimum number of points to form a cluster.
    pub min_cluster_size: usize,

    /// Neighbourhood size (self included) used for core distances.
    /// Defaults to `min_cluster_size`.
    pub min_samples: Option<usize>,

    /// Let the root of the condensed tree be selected when no split
    /// produces a better cluster.
    pub allow_single_cluster: bool,
}

impl Default for HdbscanParams {
    fn default() -> Self {
        Self {
            min_cluster_size: 3,
            min_samples: None,
            allow_single_cluster: true,
        }
    }
}

impl HdbscanParams {
    pub fn new(min_cluster_size: usize) -> Self {
        Self {
            min_cluster_size,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = Some(min_samples);
        self
    }

    #[must_use]
    pub fn with_allow_single_cluster(mut self, allow: bool) -> Self {
        self.allow_single_cluster = allow;
        self
    }

    pub fn effective_min_samples(&self) -> usize {
        self.min_samples.unwrap_or(self.min_cluster_size)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_cluster_size < 2 {
            return Err(ClusterError::config(format!(
                "min_cluster_size must be >= 2, got {}",
                self.min_cluster_size
            )));
        }
        if self.effective_min_samples() == 0 {
            return Err(ClusterError::config("min_samples must be >= 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Child {
    Point(usize),
    Cluster(usize),
}

#[derive(Debug, Clone, Copy)]
struct CondensedRow {
    parent: usize,
    child: Child,
    lambda: f64,
    size: usize,
}

fn core_distances(distances: &Array2<f64>, min_samples: usize) -> Vec<f64> {
    let n = distances.nrows();
    let k = min_samples.saturating_sub(1).min(n.saturating_sub(1));
    (0..n)
        .map(|i| {
            let mut row: Vec<f64> = distances.row(i).to_vec();
            row.sort_by(|a, b| a.total_cmp(b));
            row[k]
        })
        .collect()
}

/// Prim's algorithm on the complete mutual-reachability graph. Ties pick
/// the lowest index.
fn minimum_spanning_tree(distances: &Array2<f64>, core: &[f64]) -> Vec<(usize, usize, f64)> {
    let n = distances.nrows();
    let mut in_tree = vec![false; n];
    let mut best = vec![f64::INFINITY; n];
    let mut from = vec![0usize; n];
    let mut edges = Vec::with_capacity(n.saturating_sub(1));

    let mut current = 0;
    in_tree[0] = true;
    for _ in 1..n {
        for j in 0..n {
            if in_tree[j] {
                continue;
            }
            let mr = distances[[current, j]].max(core[current]).max(core[j]);
            if mr < best[j] {
                best[j] = mr;
                from[j] = current;
            }
        }
        let mut next = usize::MAX;
        let mut next_w = f64::INFINITY;
        for j in 0..n {
            if !in_tree[j] && (next == usize::MAX || best[j] < next_w) {
                next = j;
                next_w = best[j];
            }
        }
        in_tree[next] = true;
        edges.push((from[next], next, next_w));
        current = next;
    }
    edges.sort_by(|a, b| a.2.total_cmp(&b.2));
    edges
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }
}

/// Single-linkage dendrogram: node `n + s` merges the two children of step `s`.
struct Dendrogram {
    n: usize,
    children: Vec<(usize, usize)>,
    distance: Vec<f64>,
    size: Vec<usize>,
}

impl Dendrogram {
    fn build(n: usize, edges: &[(usize, usize, f64)]) -> Self {
        let mut uf = UnionFind::new(2 * n - 1);
        let mut size = vec![1usize; 2 * n - 1];
        let mut children = Vec::with_capacity(n - 1);
        let mut distance = Vec::with_capacity(n - 1);
        for (step, (a, b, w)) in edges.iter().enumerate() {
            let ra = uf.find(*a);
            let rb = uf.find(*b);
            let node = n + step;
            uf.parent[ra] = node;
            uf.parent[rb] = node;
            size[node] = size[ra] + size[rb];
            children.push((ra, rb));
            distance.push(*w);
        }
        Self {
            n,
            children,
            distance,
            size,
        }
    }

    fn root(&self) -> usize {
        2 * self.n - 2
    }

    fn leaves(&self, node: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(x) = stack.pop() {
            if x < self.n {
                out.push(x);
            } else {
                let (l, r) = self.children[x - self.n];
                stack.push(r);
                stack.push(l);
            }
        }
        out
    }
}

fn lambda_of(distance: f64) -> f64 {
    if distance > 0.0 {
        (1.0 / distance).min(LAMBDA_CAP)
    } else {
        LAMBDA_CAP
    }
}

/// Returns the condensed rows and the number of condensed clusters
/// (cluster 0 is the root).
fn condense(tree: &Dendrogram, min_cluster_size: usize) -> (Vec<CondensedRow>, usize) {
    let mut rows = Vec::new();
    let mut label_of = vec![usize::MAX; 2 * tree.n - 1];
    label_of[tree.root()] = 0;
    let mut next_label = 1;

    let mut queue = std::collections::VecDeque::from([tree.root()]);
    while let Some(node) = queue.pop_front() {
        if node < tree.n {
            continue;
        }
        let (left, right) = tree.children[node - tree.n];
        let lambda = lambda_of(tree.distance[node - tree.n]);
        let parent = label_of[node];
        let (left_size, right_size) = (tree.size[left], tree.size[right]);

        let left_big = left_size >= min_cluster_size;
        let right_big = right_size >= min_cluster_size;
        match (left_big, right_big) {
            (true, true) => {
                for (child, child_size) in [(left, left_size), (right, right_size)] {
                    label_of[child] = next_label;
                    rows.push(CondensedRow {
                        parent,
                        child: Child::Cluster(next_label),
                        lambda,
                        size: child_size,
                    });
                    next_label += 1;
                    queue.push_back(child);
                }
            }
            (false, false) => {
                for child in [left, right] {
                    for p in tree.leaves(child) {
                        rows.push(CondensedRow {
                            parent,
                            child: Child::Point(p),
                            lambda,
                            size: 1,
                        });
                    }
                }
            }
            (true, false) | (false, true) => {
                let (keep, drop) = if left_big { (left, right) } else { (right, left) };
                label_of[keep] = parent;
                for p in tree.leaves(drop) {
                    rows.push(CondensedRow {
                        parent,
                        child: Child::Point(p),
                        lambda,
                        size: 1,
                    });
                }
                queue.push_back(keep);
            }
        }
    }
    (rows, next_label)
}

fn stabilities(rows: &[CondensedRow], n_clusters: usize) -> Vec<f64> {
    let mut birth = vec![0.0; n_clusters];
    for row in rows {
        if let Child::Cluster(c) = row.child {
            birth[c] = row.lambda;
        }
    }
    let mut stability = vec![0.0; n_clusters];
    for row in rows {
        stability[row.parent] += (row.lambda - birth[row.parent]) * row.size as f64;
    }
    stability
}

/// Excess-of-mass selection. Returns one flag per condensed cluster.
fn select_clusters(
    rows: &[CondensedRow],
    n_clusters: usize,
    allow_single_cluster: bool,
) -> Vec<bool> {
    let mut stability = stabilities(rows, n_clusters);
    let mut cluster_children: Vec<Vec<usize>> = vec![Vec::new(); n_clusters];
    for row in rows {
        if let Child::Cluster(c) = row.child {
            cluster_children[row.parent].push(c);
        }
    }

    let lowest = if allow_single_cluster { 0 } else { 1 };
    let mut selected = vec![false; n_clusters];
    for c in lowest..n_clusters {
        selected[c] = true;
    }

    // Children always carry higher ids than their parents.
    for node in (lowest..n_clusters).rev() {
        let subtree: f64 = cluster_children[node].iter().map(|c| stability[*c]).sum();
        if subtree > stability[node] {
            selected[node] = false;
            stability[node] = subtree;
        } else {
            let mut stack = cluster_children[node].clone();
            while let Some(sub) = stack.pop() {
                selected[sub] = false;
                stack.extend(cluster_children[sub].iter().copied());
            }
        }
    }
    selected
}

fn assign_labels(
    rows: &[CondensedRow],
    n_points: usize,
    n_clusters: usize,
    selected: &[bool],
) -> Vec<i32> {
    let mut cluster_parent = vec![usize::MAX; n_clusters];
    let mut point_row: Vec<Option<(usize, f64)>> = vec![None; n_points];
    let mut root_max_lambda = 0.0f64;
    for row in rows {
        match row.child {
            Child::Cluster(c) => cluster_parent[c] = row.parent,
            Child::Point(p) => point_row[p] = Some((row.parent, row.lambda)),
        }
        if row.parent == 0 {
            root_max_lambda = root_max_lambda.max(row.lambda);
        }
    }

    let mut label_of_cluster = vec![NOISE; n_clusters];
    let mut next = 0;
    for (c, is_selected) in selected.iter().enumerate() {
        if *is_selected {
            label_of_cluster[c] = next;
            next += 1;
        }
    }

    (0..n_points)
        .map(|p| {
            let Some((mut cluster, lambda)) = point_row[p] else {
                return NOISE;
            };
            loop {
                if selected[cluster] {
                    if cluster == 0 && lambda < root_max_lambda {
                        return NOISE;
                    }
                    return label_of_cluster[cluster];
                }
                if cluster == 0 {
                    return NOISE;
                }
                cluster = cluster_parent[cluster];
            }
        })
        .collect()
}

/// Cluster a precomputed distance matrix. Labels are `0..k` in condensed-tree
/// order, outliers are [`NOISE`].
pub fn hdbscan(distances: &Array2<f64>, params: &HdbscanParams) -> Result<Vec<i32>> {
    params.validate()?;
    let n = distances.nrows();
    if distances.ncols() != n {
        return Err(ClusterError::InvalidInput(
            "hdbscan requires a square distance matrix".to_string(),
        ));
    }
    if n < params.min_cluster_size || n < 2 {
        debug!("HDBSCAN: {} points below min_cluster_size, all noise", n);
        return Ok(vec![NOISE; n]);
    }

    let core = core_distances(distances, params.effective_min_samples());
    let edges = minimum_spanning_tree(distances, &core);
    let tree = Dendrogram::build(n, &edges);
    let (rows, n_clusters) = condense(&tree, params.min_cluster_size);
    let selected = select_clusters(&rows, n_clusters, params.allow_single_cluster);
    let labels = assign_labels(&rows, n, n_clusters, &selected);

    debug!(
        "HDBSCAN: {} points, {} condensed clusters, {} selected, {} noise",
        n,
        n_clusters,
        selected.iter().filter(|s| **s).count(),
        labels.iter().filter(|l| **l == NOISE).count()
    );
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_points(points: &[(f64, f64)]) -> Array2<f64> {
        let n = points.len();
        Array2::from_shape_fn((n, n), |(i, j)| {
            let (dx, dy) = (points[i].0 - points[j].0, points[i].1 - points[j].1);
            (dx * dx + dy * dy).sqrt()
        })
    }

    #[test]
    fn test_single_dense_group_with_outlier() {
        let mut d = Array2::<f64>::from_elem((5, 5), 0.1);
        for i in 0..5 {
            d[[i, i]] = 0.0;
            d[[i, 4]] = 5.0;
            d[[4, i]] = 5.0;
        }
        d[[4, 4]] = 0.0;
        let labels = hdbscan(&d, &HdbscanParams::new(2)).unwrap();
        assert_eq!(labels, vec![0, 0, 0, 0, NOISE]);
    }

    #[test]
    fn test_two_blobs() {
        let mut points = Vec::new();
        for i in 0..5 {
            points.push((i as f64 * 0.1, 0.0));
        }
        for i in 0..5 {
            points.push((10.0 + i as f64 * 0.1, 0.0));
        }
        let labels = hdbscan(&from_points(&points), &HdbscanParams::new(3)).unwrap();
        assert!(labels[..5].iter().all(|l| *l == labels[0]));
        assert!(labels[5..].iter().all(|l| *l == labels[5]));
        assert_ne!(labels[0], labels[5]);
        assert!(labels.iter().all(|l| *l >= 0));
    }

    #[test]
    fn test_without_single_cluster_everything_is_noise() {
        let mut d = Array2::<f64>::from_elem((4, 4), 0.2);
        for i in 0..4 {
            d[[i, i]] = 0.0;
        }
        let params = HdbscanParams::new(2).with_allow_single_cluster(false);
        assert_eq!(hdbscan(&d, &params).unwrap(), vec![NOISE; 4]);
    }

    #[test]
    fn test_too_few_points() {
        let d = Array2::zeros((2, 2));
        assert_eq!(hdbscan(&d, &HdbscanParams::new(3)).unwrap(), vec![NOISE; 2]);
        assert!(hdbscan(&Array2::zeros((0, 0)), &HdbscanParams::new(3))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_invalid_min_cluster_size() {
        let d = Array2::zeros((3, 3));
        assert!(hdbscan(&d, &HdbscanParams::new(1)).is_err());
    }

    #[test]
    fn test_deterministic() {
        let points: Vec<(f64, f64)> = (0..12)
            .map(|i| ((i % 4) as f64 * 0.3 + (i / 4) as f64 * 5.0, (i % 3) as f64 * 0.2))
            .collect();
        let d = from_points(&points);
        let params = HdbscanParams::new(3);
        assert_eq!(hdbscan(&d, &params).unwrap(), hdbscan(&d, &params).unwrap());
    }
}
