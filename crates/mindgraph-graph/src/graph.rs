//! Directed goal graph with edges normalized to child→parent.

use mindgraph_core::{Relation, RelationType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    pub child: String,
    pub parent: String,
    pub relation_type: RelationType,
}

impl Edge {
    pub fn new(
        child: impl Into<String>,
        parent: impl Into<String>,
        relation_type: RelationType,
    ) -> Self {
        Self {
            child: child.into(),
            parent: parent.into(),
            relation_type,
        }
    }

    pub fn from_relation(relation: &Relation) -> Self {
        let (child, parent) = relation.child_parent();
        Self::new(child, parent, relation.relation_type)
    }
}

/// Adjacency is kept in ordered sets so traversal output is deterministic.
#[derive(Debug, Clone, Default)]
pub struct GoalGraph {
    nodes: BTreeSet<String>,
    parents: BTreeMap<String, BTreeSet<String>>,
    children: BTreeMap<String, BTreeSet<String>>,
    edges: BTreeSet<Edge>,
}

impl GoalGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from explicit nodes plus relations. Relation endpoints are added
    /// as nodes; self-loops are skipped.
    pub fn from_relations<I, S>(nodes: I, relations: &[Relation]) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut graph = Self::new();
        for node in nodes {
            graph.add_node(node);
        }
        for relation in relations {
            graph.add_relation(relation);
        }
        debug!(
            "Built graph with {} nodes and {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        graph
    }

    pub fn add_node(&mut self, id: impl Into<String>) {
        self.nodes.insert(id.into());
    }

    pub fn add_relation(&mut self, relation: &Relation) -> bool {
        self.add_edge(Edge::from_relation(relation))
    }

    /// Returns `false` for self-loops and duplicates.
    pub fn add_edge(&mut self, edge: Edge) -> bool {
        if edge.child == edge.parent || self.edges.contains(&edge) {
            return false;
        }
        self.nodes.insert(edge.child.clone());
        self.nodes.insert(edge.parent.clone());
        self.parents
            .entry(edge.child.clone())
            .or_default()
            .insert(edge.parent.clone());
        self.children
            .entry(edge.parent.clone())
            .or_default()
            .insert(edge.child.clone());
        self.edges.insert(edge);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn parent_set(&self, id: &str) -> Option<&BTreeSet<String>> {
        self.parents.get(id)
    }

    pub fn parents(&self, id: &str) -> Vec<&str> {
        self.parents
            .get(id)
            .map(|p| p.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn children(&self, id: &str) -> Vec<&str> {
        self.children
            .get(id)
            .map(|c| c.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Same nodes, only edges of the given types.
    pub fn filtered(&self, types: &[RelationType]) -> GoalGraph {
        let wanted: HashSet<RelationType> = types.iter().copied().collect();
        let mut graph = GoalGraph {
            nodes: self.nodes.clone(),
            ..GoalGraph::default()
        };
        for edge in self.edges.iter().filter(|e| wanted.contains(&e.relation_type)) {
            graph.add_edge(edge.clone());
        }
        graph
    }

    /// Relation types present on at least one edge.
    pub fn relation_types(&self) -> BTreeSet<RelationType> {
        self.edges.iter().map(|e| e.relation_type).collect()
    }
}
