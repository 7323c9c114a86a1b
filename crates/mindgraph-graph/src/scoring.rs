//! Diagnostic importance scores over the child→parent graph.
//!
//! Scores follow the usual directed-graph conventions: PageRank with uniform
//! teleport and dangling redistribution, degree centrality normalized by
//! `n - 1`, HITS normalized to unit sum, Brandes betweenness normalized by
//! `(n - 1)(n - 2)`, and Wasserman–Faust closeness. In-closeness uses
//! distances *to* a node, out-closeness distances *from* it.

use mindgraph_core::RelationType;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use tracing::{debug, warn};

use crate::graph::GoalGraph;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringParams {
    pub damping: f64,
    pub pagerank_max_iter: usize,
    pub pagerank_tolerance: f64,
    pub hits_max_iter: usize,
    pub hits_tolerance: f64,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            damping: 0.85,
            pagerank_max_iter: 100,
            pagerank_tolerance: 1e-6,
            hits_max_iter: 100,
            hits_tolerance: 1e-8,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeScores {
    pub pagerank: f64,
    pub in_degree: f64,
    pub out_degree: f64,
    pub hub: f64,
    pub authority: f64,
    pub betweenness: f64,
    pub in_closeness: f64,
    pub out_closeness: f64,
}

/// Dense index over a graph's nodes with deduplicated adjacency.
struct Indexed {
    ids: Vec<String>,
    out: Vec<Vec<usize>>,
    inc: Vec<Vec<usize>>,
}

impl Indexed {
    fn new(graph: &GoalGraph) -> Self {
        let ids: Vec<String> = graph.nodes().map(str::to_string).collect();
        let index: HashMap<&str, usize> =
            ids.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
        let mut out: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); ids.len()];
        let mut inc: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); ids.len()];
        for edge in graph.edges() {
            let child = index.get(edge.child.as_str());
            if let (Some(&c), Some(&p)) = (child, index.get(edge.parent.as_str())) {
                out[c].insert(p);
                inc[p].insert(c);
            }
        }
        Self {
            ids,
            out: out.into_iter().map(|s| s.into_iter().collect()).collect(),
            inc: inc.into_iter().map(|s| s.into_iter().collect()).collect(),
        }
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

fn pagerank(g: &Indexed, params: &ScoringParams) -> Vec<f64> {
    let n = g.len();
    if n == 0 {
        return Vec::new();
    }
    let nf = n as f64;
    let mut x = vec![1.0 / nf; n];
    for _ in 0..params.pagerank_max_iter {
        let last = x.clone();
        let dangling: f64 = (0..n).filter(|&u| g.out[u].is_empty()).map(|u| last[u]).sum();
        let base = (params.damping * dangling + (1.0 - params.damping)) / nf;
        x = vec![base; n];
        for u in 0..n {
            let share = params.damping * last[u] / g.out[u].len().max(1) as f64;
            for &v in &g.out[u] {
                x[v] += share;
            }
        }
        let err: f64 = x.iter().zip(&last).map(|(a, b)| (a - b).abs()).sum();
        if err < nf * params.pagerank_tolerance {
            return x;
        }
    }
    warn!("PageRank did not converge in {} iterations", params.pagerank_max_iter);
    x
}

/// `(hubs, authorities)`; all zeros when the iteration does not converge or
/// the graph has no edges.
fn hits(g: &Indexed, params: &ScoringParams) -> (Vec<f64>, Vec<f64>) {
    let n = g.len();
    let zeros = (vec![0.0; n], vec![0.0; n]);
    if n == 0 {
        return zeros;
    }
    let mut h = vec![1.0 / n as f64; n];
    let mut a = vec![0.0; n];
    let mut converged = false;
    for _ in 0..params.hits_max_iter {
        let last = h.clone();
        a = vec![0.0; n];
        for u in 0..n {
            for &v in &g.out[u] {
                a[v] += last[u];
            }
        }
        h = vec![0.0; n];
        for u in 0..n {
            h[u] = g.out[u].iter().map(|&v| a[v]).sum();
        }
        let h_max = h.iter().cloned().fold(0.0, f64::max);
        let a_max = a.iter().cloned().fold(0.0, f64::max);
        if h_max == 0.0 || a_max == 0.0 {
            return zeros;
        }
        h.iter_mut().for_each(|v| *v /= h_max);
        a.iter_mut().for_each(|v| *v /= a_max);
        let err: f64 = h.iter().zip(&last).map(|(x, y)| (x - y).abs()).sum();
        if err < params.hits_tolerance {
            converged = true;
            break;
        }
    }
    if !converged {
        warn!("HITS did not converge in {} iterations; scores zeroed", params.hits_max_iter);
        return zeros;
    }
    let h_sum: f64 = h.iter().sum();
    let a_sum: f64 = a.iter().sum();
    (
        h.into_iter().map(|v| v / h_sum).collect(),
        a.into_iter().map(|v| v / a_sum).collect(),
    )
}

fn bfs_distances(adj: &[Vec<usize>], source: usize) -> Vec<Option<usize>> {
    let mut dist = vec![None; adj.len()];
    dist[source] = Some(0);
    let mut queue = VecDeque::from([source]);
    while let Some(u) = queue.pop_front() {
        let du = dist[u].unwrap_or(0);
        for &v in &adj[u] {
            if dist[v].is_none() {
                dist[v] = Some(du + 1);
                queue.push_back(v);
            }
        }
    }
    dist
}

/// Closeness of every node using shortest paths *from* it over `adj`.
fn closeness(adj: &[Vec<usize>]) -> Vec<f64> {
    let n = adj.len();
    (0..n)
        .into_par_iter()
        .map(|u| {
            let dist = bfs_distances(adj, u);
            let reached: Vec<usize> = dist.iter().flatten().copied().collect();
            let total: usize = reached.iter().sum();
            if total == 0 || n <= 1 {
                return 0.0;
            }
            let r = (reached.len() - 1) as f64;
            (r / total as f64) * (r / (n - 1) as f64)
        })
        .collect()
}

/// Brandes' algorithm, one source per rayon task.
fn betweenness(g: &Indexed) -> Vec<f64> {
    let n = g.len();
    let partials: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|s| {
            let mut stack = Vec::with_capacity(n);
            let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
            let mut sigma = vec![0.0f64; n];
            let mut dist: Vec<Option<usize>> = vec![None; n];
            sigma[s] = 1.0;
            dist[s] = Some(0);
            let mut queue = VecDeque::from([s]);
            while let Some(v) = queue.pop_front() {
                stack.push(v);
                let dv = dist[v].unwrap_or(0);
                for &w in &g.out[v] {
                    if dist[w].is_none() {
                        dist[w] = Some(dv + 1);
                        queue.push_back(w);
                    }
                    if dist[w] == Some(dv + 1) {
                        sigma[w] += sigma[v];
                        preds[w].push(v);
                    }
                }
            }
            let mut delta = vec![0.0f64; n];
            let mut partial = vec![0.0f64; n];
            while let Some(w) = stack.pop() {
                for &v in &preds[w] {
                    delta[v] += sigma[v] / sigma[w] * (1.0 + delta[w]);
                }
                if w != s {
                    partial[w] = delta[w];
                }
            }
            partial
        })
        .collect();

    let mut total = vec![0.0; n];
    for partial in partials {
        for (t, p) in total.iter_mut().zip(partial) {
            *t += p;
        }
    }
    if n > 2 {
        let scale = 1.0 / ((n - 1) * (n - 2)) as f64;
        total.iter_mut().for_each(|v| *v *= scale);
    }
    total
}

fn degree(adj: &[Vec<usize>]) -> Vec<f64> {
    let n = adj.len();
    if n <= 1 {
        return vec![1.0; n];
    }
    adj.iter().map(|a| a.len() as f64 / (n - 1) as f64).collect()
}

/// All scores for every node of `graph`.
pub fn score_graph(graph: &GoalGraph, params: &ScoringParams) -> BTreeMap<String, NodeScores> {
    let g = Indexed::new(graph);
    let pagerank = pagerank(&g, params);
    let (hub, authority) = hits(&g, params);
    let betweenness = betweenness(&g);
    let in_closeness = closeness(&g.inc);
    let out_closeness = closeness(&g.out);
    let in_degree = degree(&g.inc);
    let out_degree = degree(&g.out);
    debug!("Scored {} nodes", g.len());

    g.ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            (
                id.clone(),
                NodeScores {
                    pagerank: pagerank[i],
                    in_degree: in_degree[i],
                    out_degree: out_degree[i],
                    hub: hub[i],
                    authority: authority[i],
                    betweenness: betweenness[i],
                    in_closeness: in_closeness[i],
                    out_closeness: out_closeness[i],
                },
            )
        })
        .collect()
}

/// Scores for the whole graph under `"all"` and for each relation type
/// present, keyed by the type name.
pub fn score_by_relation_type(
    graph: &GoalGraph,
    params: &ScoringParams,
) -> BTreeMap<String, BTreeMap<String, NodeScores>> {
    let mut out = BTreeMap::new();
    out.insert("all".to_string(), score_graph(graph, params));
    for relation_type in graph.relation_types() {
        let filtered = graph.filtered(&[relation_type]);
        out.insert(relation_type.as_str().to_string(), score_graph(&filtered, params));
    }
    out
}

/// Scores restricted to edges of the given types.
pub fn score_filtered(
    graph: &GoalGraph,
    types: &[RelationType],
    params: &ScoringParams,
) -> BTreeMap<String, NodeScores> {
    score_graph(&graph.filtered(types), params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Edge;
    use approx::assert_relative_eq;

    fn graph(edges: &[(&str, &str)]) -> GoalGraph {
        let mut g = GoalGraph::new();
        for (child, parent) in edges {
            g.add_edge(Edge::new(*child, *parent, RelationType::GoalMeans));
        }
        g
    }

    #[test]
    fn test_pagerank_sums_to_one_and_favours_sink() {
        let g = graph(&[("a", "c"), ("b", "c"), ("c", "d")]);
        let scores = score_graph(&g, &ScoringParams::default());
        let total: f64 = scores.values().map(|s| s.pagerank).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-9);
        assert!(scores["d"].pagerank > scores["a"].pagerank);
        assert!(scores["c"].pagerank > scores["a"].pagerank);
    }

    #[test]
    fn test_degree_and_betweenness_on_path() {
        // a -> b -> c
        let g = graph(&[("a", "b"), ("b", "c")]);
        let scores = score_graph(&g, &ScoringParams::default());
        assert_relative_eq!(scores["b"].in_degree, 0.5);
        assert_relative_eq!(scores["b"].out_degree, 0.5);
        // one of the two ordered pairs through b
        assert_relative_eq!(scores["b"].betweenness, 0.5);
        assert_eq!(scores["a"].betweenness, 0.0);
    }

    #[test]
    fn test_closeness_directions() {
        let g = graph(&[("a", "b"), ("b", "c")]);
        let scores = score_graph(&g, &ScoringParams::default());
        // c is reached by a (2) and b (1)
        assert_relative_eq!(scores["c"].in_closeness, 2.0 / 3.0);
        assert_relative_eq!(scores["a"].out_closeness, 2.0 / 3.0);
        assert_eq!(scores["a"].in_closeness, 0.0);
    }

    #[test]
    fn test_hits_on_star() {
        let g = graph(&[("a", "hub_target"), ("b", "hub_target")]);
        let scores = score_graph(&g, &ScoringParams::default());
        assert_relative_eq!(scores["hub_target"].authority, 1.0, epsilon = 1e-9);
        assert_relative_eq!(scores["a"].hub, 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_isolated_nodes_and_no_edges() {
        let mut g = GoalGraph::new();
        g.add_node("x");
        g.add_node("y");
        let scores = score_graph(&g, &ScoringParams::default());
        assert_relative_eq!(scores["x"].pagerank, 0.5, epsilon = 1e-12);
        assert_eq!(scores["x"].hub, 0.0);
        assert_eq!(scores["x"].authority, 0.0);
        assert_eq!(scores["x"].in_closeness, 0.0);
        assert!(score_graph(&GoalGraph::new(), &ScoringParams::default()).is_empty());
    }

    #[test]
    fn test_hits_non_convergence_zeroes() {
        let g = graph(&[("a", "b"), ("b", "a"), ("b", "c")]);
        let params = ScoringParams {
            hits_max_iter: 1,
            ..ScoringParams::default()
        };
        let scores = score_graph(&g, &params);
        assert!(scores.values().all(|s| s.hub == 0.0 && s.authority == 0.0));
    }

    #[test]
    fn test_scores_per_relation_type() {
        let mut g = graph(&[("a", "b")]);
        g.add_edge(Edge::new("b", "c", RelationType::Causal));
        let by_type = score_by_relation_type(&g, &ScoringParams::default());
        assert_eq!(
            by_type.keys().cloned().collect::<Vec<_>>(),
            vec!["all", "causal", "goal-means"]
        );
        assert_eq!(by_type["causal"]["a"].out_degree, 0.0);
        assert_eq!(by_type["all"].len(), 3);
    }
}
