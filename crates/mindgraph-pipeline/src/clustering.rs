//! Cluster a set of embedded items on the composite distance.

use mindgraph_cluster::{
    apply_labels, classical_mds, clustered_rows, evaluate, group_by_label, Cluster, ClusterEngine,
    ClusterInput, ClusterMetrics, ClusterResult, ClusteredRow, DistanceCalculator,
    DistanceMatrix,
};
use mindgraph_core::Item;
use ndarray::Array2;
use tracing::{debug, info};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterStageOutput {
    pub result: ClusterResult,
    pub rows: Vec<ClusteredRow>,
    pub metrics: ClusterMetrics,
    pub clusters: Vec<Cluster>,
}

/// Compute distances, cluster, and write labels back onto `items`.
///
/// An empty slice yields an empty result without touching the engine.
pub fn cluster_items(
    items: &mut [Item],
    calculator: &DistanceCalculator,
    engine: &ClusterEngine,
) -> Result<ClusterStageOutput> {
    if items.is_empty() {
        return Ok(ClusterStageOutput {
            result: ClusterResult {
                method: engine.params().method,
                raw_labels: Vec::new(),
                labels: Vec::new(),
                n_clusters: 0,
                n_noise: 0,
            },
            rows: Vec::new(),
            metrics: ClusterMetrics::default(),
            clusters: Vec::new(),
        });
    }

    let distances = calculator.compute(items)?;
    let result = engine.cluster(ClusterInput::Distances(&distances.composite))?;
    apply_labels(items, &result.labels)?;

    // Scored on the strategy's own labels so HDBSCAN noise stays excluded.
    let features = metric_features(&distances.composite, result.n_clusters);
    let metrics = evaluate(&distances.composite, features.as_ref(), &result.raw_labels);
    info!(
        "Cluster quality over {} items: silhouette {:.3}, {} clusters, {} noise",
        items.len(),
        metrics.silhouette,
        metrics.n_clusters,
        metrics.n_noise
    );
    let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
    Ok(ClusterStageOutput {
        rows: clustered_rows(items, &result.labels)?,
        clusters: group_by_label(&ids, &result.labels),
        metrics,
        result,
    })
}

/// Euclidean embedding of the composite distances for the centroid-based
/// scores. `None` when the matrix has no usable projection.
fn metric_features(distances: &DistanceMatrix, n_clusters: usize) -> Option<Array2<f64>> {
    let n = distances.len();
    let components = (2 * n_clusters.max(1)).min(n.saturating_sub(1));
    if components == 0 {
        return None;
    }
    match classical_mds(distances.values(), components) {
        Ok(projected) => Some(projected),
        Err(e) => {
            debug!("Skipping feature-based cluster scores: {}", e);
            None
        }
    }
}
