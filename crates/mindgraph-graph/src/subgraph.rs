use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::error::{GraphError, Result};
use crate::graph::{Edge, GoalGraph};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubgraphStrategy {
    /// Self, all ancestors, all siblings and direct children.
    #[default]
    Balanced,
}

impl FromStr for SubgraphStrategy {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "balanced" => Ok(Self::Balanced),
            other => Err(GraphError::UnsupportedStrategy(other.to_string())),
        }
    }
}

impl fmt::Display for SubgraphStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Balanced => f.write_str("balanced"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subgraph {
    pub nodes: BTreeSet<String>,
    pub edges: Vec<Edge>,
}

impl Subgraph {
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains(id)
    }
}

impl GoalGraph {
    /// Neighbourhood of the hit nodes, selected by `strategy`. Hits that are
    /// not in the graph are ignored. Edges are kept when both endpoints are.
    pub fn subgraph<S: AsRef<str>>(&self, hits: &[S], strategy: &str) -> Result<Subgraph> {
        let strategy: SubgraphStrategy = strategy.parse()?;
        let mut nodes = BTreeSet::new();
        for hit in hits.iter().map(AsRef::as_ref) {
            if !self.contains(hit) {
                debug!("Subgraph hit {} is not in the graph", hit);
                continue;
            }
            match strategy {
                SubgraphStrategy::Balanced => {
                    nodes.insert(hit.to_string());
                    nodes.extend(self.ancestors(hit));
                    nodes.extend(self.siblings(hit));
                    nodes.extend(self.children(hit).into_iter().map(str::to_string));
                }
            }
        }
        let edges = self
            .edges()
            .filter(|e| nodes.contains(&e.child) && nodes.contains(&e.parent))
            .cloned()
            .collect();
        Ok(Subgraph { nodes, edges })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindgraph_core::{Relation, RelationType};

    /// C is the means of B, B of A, D of A; E is the means of C.
    fn scenario() -> GoalGraph {
        let relations = vec![
            Relation::new("C", "B", RelationType::MeansEnd, 0.9, "").unwrap(),
            Relation::new("B", "A", RelationType::MeansEnd, 0.9, "").unwrap(),
            Relation::new("D", "A", RelationType::MeansEnd, 0.9, "").unwrap(),
            Relation::new("E", "C", RelationType::GoalMeans, 1.0, "").unwrap(),
        ];
        GoalGraph::from_relations(Vec::<String>::new(), &relations)
    }

    #[test]
    fn test_balanced_subgraph() {
        let sub = scenario().subgraph(&["B"], "balanced").unwrap();
        let expected: BTreeSet<String> =
            ["A", "B", "C", "D"].iter().map(|s| s.to_string()).collect();
        assert_eq!(sub.nodes, expected);
        assert!(!sub.contains("E"));
        assert_eq!(sub.edges.len(), 3);
    }

    #[test]
    fn test_unknown_strategy_is_fatal() {
        let err = scenario().subgraph(&["B"], "full").unwrap_err();
        assert!(matches!(err, GraphError::UnsupportedStrategy(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_unknown_hits_ignored() {
        let sub = scenario().subgraph(&["nope"], "balanced").unwrap();
        assert!(sub.nodes.is_empty());
        assert!(sub.edges.is_empty());
    }
}
