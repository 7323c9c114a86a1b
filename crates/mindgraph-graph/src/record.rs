//! Persisted graph record:
//! `{nodes: {id: {intent, status, type}}, relations: [{from, to, type}], generated_nodes: [...]}`.

use mindgraph_core::{GeneratedNode, Goal, Intent, Relation, RelationType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::error::Result;
use crate::graph::GoalGraph;

pub const NODE_TYPE_INTENT: &str = "intent";
pub const NODE_TYPE_GOAL: &str = "goal";
pub const NODE_TYPE_GENERATED: &str = "ultra_intent";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub intent: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "type")]
    pub node_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub relation_type: RelationType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphRecord {
    pub nodes: BTreeMap<String, NodeRecord>,
    pub relations: Vec<EdgeRecord>,
    #[serde(default)]
    pub generated_nodes: Vec<GeneratedNode>,
}

impl GraphRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_intents(&mut self, intents: &[Intent]) -> &mut Self {
        for intent in intents {
            self.nodes.insert(
                intent.item.id.clone(),
                NodeRecord {
                    intent: intent.item.text.clone(),
                    status: intent.status.clone(),
                    node_type: NODE_TYPE_INTENT.to_string(),
                },
            );
        }
        self
    }

    pub fn add_goals(&mut self, goals: &[Goal]) -> &mut Self {
        for goal in goals {
            self.nodes.insert(
                goal.item.id.clone(),
                NodeRecord {
                    intent: goal.item.text.clone(),
                    status: String::new(),
                    node_type: NODE_TYPE_GOAL.to_string(),
                },
            );
        }
        self
    }

    /// Generated nodes are listed both as nodes and under `generated_nodes`.
    pub fn add_generated(&mut self, generated: &[GeneratedNode]) -> &mut Self {
        for node in generated {
            self.nodes.insert(
                node.id.clone(),
                NodeRecord {
                    intent: node.text.clone(),
                    status: String::new(),
                    node_type: NODE_TYPE_GENERATED.to_string(),
                },
            );
            self.generated_nodes.push(node.clone());
        }
        self
    }

    /// Relations keep their own direction (`from` = source).
    pub fn add_relations(&mut self, relations: &[Relation]) -> &mut Self {
        self.relations.extend(relations.iter().map(|r| EdgeRecord {
            from: r.source_id.clone(),
            to: r.target_id.clone(),
            relation_type: r.relation_type,
        }));
        self
    }

    /// Relations rebuilt from the edge list; scores are not persisted and
    /// come back as 1.0. Self-loops are dropped.
    pub fn relations(&self) -> Vec<Relation> {
        self.relations
            .iter()
            .filter_map(|e| Relation::new(&e.from, &e.to, e.relation_type, 1.0, "").ok())
            .collect()
    }

    pub fn to_graph(&self) -> GoalGraph {
        GoalGraph::from_relations(self.nodes.keys().cloned(), &self.relations())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, self.to_json()?)?;
        info!(
            "Saved graph with {} nodes and {} relations to {:?}",
            self.nodes.len(),
            self.relations.len(),
            path
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}
