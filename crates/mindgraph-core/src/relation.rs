use crate::{MindGraphError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RelationType {
    #[serde(rename = "hierarchy")]
    Hierarchy,
    #[serde(rename = "means_end")]
    MeansEnd,
    #[serde(rename = "dependency")]
    Dependency,
    #[serde(rename = "causal")]
    Causal,
    #[serde(rename = "goal-means")]
    GoalMeans,
    #[serde(rename = "why")]
    Why,
    #[serde(rename = "how")]
    How,
}

impl RelationType {
    pub const RULE_BASED: [RelationType; 4] = [
        RelationType::Hierarchy,
        RelationType::MeansEnd,
        RelationType::Dependency,
        RelationType::Causal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Hierarchy => "hierarchy",
            RelationType::MeansEnd => "means_end",
            RelationType::Dependency => "dependency",
            RelationType::Causal => "causal",
            RelationType::GoalMeans => "goal-means",
            RelationType::Why => "why",
            RelationType::How => "how",
        }
    }

    /// Whether the source of a relation of this type is the parent (the more
    /// abstract end) in a child→parent graph.
    pub fn source_is_parent(&self) -> bool {
        matches!(self, RelationType::Hierarchy | RelationType::Why)
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationType {
    type Err = MindGraphError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hierarchy" => Ok(RelationType::Hierarchy),
            "means_end" | "means-end" => Ok(RelationType::MeansEnd),
            "dependency" => Ok(RelationType::Dependency),
            "causal" => Ok(RelationType::Causal),
            "goal-means" | "goal_means" => Ok(RelationType::GoalMeans),
            "why" => Ok(RelationType::Why),
            "how" => Ok(RelationType::How),
            other => Err(MindGraphError::Parse(format!(
                "unknown relation type: {}",
                other
            ))),
        }
    }
}

/// Directed, typed edge between two items. Serialized as the persisted
/// relation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    #[serde(rename = "source_node_id")]
    pub source_id: String,
    #[serde(rename = "target_node_id")]
    pub target_id: String,
    pub relation_type: RelationType,
    pub score: f64,
    #[serde(rename = "reason")]
    pub evidence: String,
}

impl Relation {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relation_type: RelationType,
        score: f64,
        evidence: impl Into<String>,
    ) -> Result<Self> {
        let source_id = source_id.into();
        let target_id = target_id.into();
        if source_id == target_id {
            return Err(MindGraphError::InvalidRelation(format!(
                "self-loop on {} ({})",
                source_id, relation_type
            )));
        }
        Ok(Self {
            source_id,
            target_id,
            relation_type,
            score,
            evidence: evidence.into(),
        })
    }

    /// The relation expressed as a `(child, parent)` pair.
    pub fn child_parent(&self) -> (&str, &str) {
        if self.relation_type.source_is_parent() {
            (&self.target_id, &self.source_id)
        } else {
            (&self.source_id, &self.target_id)
        }
    }

    pub fn sort_key(&self) -> (&str, &str, RelationType) {
        (&self.source_id, &self.target_id, self.relation_type)
    }
}

/// Sort relations by `(source, target, type)` for deterministic output.
pub fn sort_relations(relations: &mut [Relation]) {
    relations.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

/// Drop relations whose endpoints are not in the working set (or that loop).
pub fn retain_known_endpoints(relations: Vec<Relation>, known: &HashSet<String>) -> Vec<Relation> {
    relations
        .into_iter()
        .filter(|r| {
            r.source_id != r.target_id
                && known.contains(&r.source_id)
                && known.contains(&r.target_id)
        })
        .collect()
}

pub fn relations_to_json(relations: &[Relation]) -> Result<String> {
    Ok(serde_json::to_string_pretty(relations)?)
}

pub fn relations_from_json(json: &str) -> Result<Vec<Relation>> {
    Ok(serde_json::from_str(json)?)
}
