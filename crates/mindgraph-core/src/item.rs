use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type ItemId = String;

/// Normalized record handed over by the history parsers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub path: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub text: String,
}

impl MessageRecord {
    pub fn new(path: impl Into<String>, at: DateTime<Utc>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            start_time: at,
            end_time: at,
            text: text.into(),
        }
    }
}

/// The unit being clustered and related: a message, an intent or a goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    #[serde(default)]
    pub timestamps: Vec<DateTime<Utc>>,
    pub text: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<i32>,
}

impl Item {
    pub fn new(id: impl Into<ItemId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamps: Vec::new(),
            text: text.into(),
            path: String::new(),
            embedding: None,
            cluster: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.timestamps.push(at);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_cluster(mut self, cluster: i32) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Earliest timestamp, used for ordering aggregated items.
    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamps.iter().min().copied()
    }
}

/// Named per-item fields that can carry their own embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Text,
    Theme,
    Subject,
    Action,
    Target,
    Conditions,
    Issue,
    Outcome,
}

impl Field {
    pub const GOAL_FIELDS: [Field; 7] = [
        Field::Theme,
        Field::Subject,
        Field::Action,
        Field::Target,
        Field::Conditions,
        Field::Issue,
        Field::Outcome,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Text => "text",
            Field::Theme => "theme",
            Field::Subject => "subject",
            Field::Action => "action",
            Field::Target => "target",
            Field::Conditions => "conditions",
            Field::Issue => "issue",
            Field::Outcome => "outcome",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type FieldEmbeddings = BTreeMap<Field, Vec<f32>>;

/// Capability shared by goals and intents: statically typed access to the
/// text of a field and to its embedding.
pub trait HasEmbeddingFields {
    fn item(&self) -> &Item;

    fn field_text(&self, field: Field) -> Option<String>;

    fn field_embedding(&self, field: Field) -> Option<&[f32]>;

    fn id(&self) -> &str {
        &self.item().id
    }

    /// Fields that have text but no embedding yet.
    fn missing_field_embeddings(&self) -> Vec<(Field, String)> {
        Field::GOAL_FIELDS
            .iter()
            .chain(std::iter::once(&Field::Text))
            .filter(|f| self.field_embedding(**f).is_none())
            .filter_map(|f| self.field_text(*f).map(|t| (*f, t)))
            .collect()
    }
}

fn join_nonempty(values: &[String]) -> Option<String> {
    let parts: Vec<&str> = values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("; "))
    }
}

fn nonempty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Structured extraction used by the relation rule engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    #[serde(flatten)]
    pub item: Item,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub action: Vec<String>,
    #[serde(default)]
    pub target: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub issue: Vec<String>,
    #[serde(default)]
    pub domain: Vec<String>,
    #[serde(default)]
    pub outcome: Vec<String>,
    /// 1 is the most abstract level, 5 the most concrete.
    pub abstraction_level: u8,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_embeddings: FieldEmbeddings,
}

impl Goal {
    pub const MIN_LEVEL: u8 = 1;
    pub const MAX_LEVEL: u8 = 5;

    pub fn new(id: impl Into<ItemId>, text: impl Into<String>, abstraction_level: u8) -> Self {
        Self {
            item: Item::new(id, text),
            theme: None,
            subject: None,
            action: Vec::new(),
            target: Vec::new(),
            conditions: Vec::new(),
            issue: Vec::new(),
            domain: Vec::new(),
            outcome: Vec::new(),
            abstraction_level: abstraction_level.clamp(Self::MIN_LEVEL, Self::MAX_LEVEL),
            field_embeddings: FieldEmbeddings::new(),
        }
    }

    pub fn level(&self) -> u8 {
        self.abstraction_level
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.item.path = path.into();
        self
    }

    pub fn with_cluster(mut self, cluster: i32) -> Self {
        self.item.cluster = Some(cluster);
        self
    }

    pub fn with_theme(mut self, theme: impl Into<String>) -> Self {
        self.theme = Some(theme.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.action = actions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_conditions<I, S>(mut self, conditions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.conditions = conditions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_issues<I, S>(mut self, issues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issue = issues.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domain = domains.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_outcomes<I, S>(mut self, outcomes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outcome = outcomes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_field_embedding(mut self, field: Field, embedding: Vec<f32>) -> Self {
        self.field_embeddings.insert(field, embedding);
        self
    }

    pub fn has_actions(&self) -> bool {
        self.action.iter().any(|a| !a.trim().is_empty())
    }

    pub fn has_targets(&self) -> bool {
        self.target.iter().any(|t| !t.trim().is_empty())
    }

    pub fn has_issues(&self) -> bool {
        self.issue.iter().any(|i| !i.trim().is_empty())
    }

    pub fn has_conditions(&self) -> bool {
        self.conditions.iter().any(|c| !c.trim().is_empty())
    }

    pub fn has_outcome(&self) -> bool {
        self.outcome.iter().any(|o| !o.trim().is_empty())
    }

    /// Normalized domain tags shared with another goal, sorted.
    pub fn shared_domains(&self, other: &Goal) -> Vec<String> {
        let mine: std::collections::BTreeSet<String> = self
            .domain
            .iter()
            .map(|d| d.trim().to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        let theirs: std::collections::BTreeSet<String> = other
            .domain
            .iter()
            .map(|d| d.trim().to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        mine.intersection(&theirs).cloned().collect()
    }
}

impl HasEmbeddingFields for Goal {
    fn item(&self) -> &Item {
        &self.item
    }

    fn field_text(&self, field: Field) -> Option<String> {
        match field {
            Field::Text => nonempty(&Some(self.item.text.clone())),
            Field::Theme => nonempty(&self.theme),
            Field::Subject => nonempty(&self.subject),
            Field::Action => join_nonempty(&self.action),
            Field::Target => join_nonempty(&self.target),
            Field::Conditions => join_nonempty(&self.conditions),
            Field::Issue => join_nonempty(&self.issue),
            Field::Outcome => join_nonempty(&self.outcome),
        }
    }

    fn field_embedding(&self, field: Field) -> Option<&[f32]> {
        match field {
            Field::Text => self
                .field_embeddings
                .get(&Field::Text)
                .or(self.item.embedding.as_ref())
                .map(Vec::as_slice),
            other => self.field_embeddings.get(&other).map(Vec::as_slice),
        }
    }
}

/// Short statement of user desire extracted from one time-grouped batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    #[serde(flatten)]
    pub item: Item,
    pub group_id: String,
    #[serde(default = "Intent::default_status")]
    pub status: String,
}

impl Intent {
    pub fn new(
        id: impl Into<ItemId>,
        group_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            item: Item::new(id, text),
            group_id: group_id.into(),
            status: Self::default_status(),
        }
    }

    fn default_status() -> String {
        "open".to_string()
    }
}

impl HasEmbeddingFields for Intent {
    fn item(&self) -> &Item {
        &self.item
    }

    fn field_text(&self, field: Field) -> Option<String> {
        match field {
            Field::Text | Field::Theme => nonempty(&Some(self.item.text.clone())),
            _ => None,
        }
    }

    fn field_embedding(&self, field: Field) -> Option<&[f32]> {
        match field {
            Field::Text | Field::Theme => self.item.embedding.as_deref(),
            _ => None,
        }
    }
}

/// A node synthesised by the hierarchical rollup (an ultra-intent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedNode {
    pub id: ItemId,
    pub text: String,
    pub level: usize,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goal_field_text_joins_lists() {
        let goal = Goal::new("g1", "ship it", 3)
            .with_actions(["deploy service", "  ", "write docs"])
            .with_theme("  ");
        assert_eq!(
            goal.field_text(Field::Action).as_deref(),
            Some("deploy service; write docs")
        );
        assert!(goal.field_text(Field::Theme).is_none());
        assert!(goal.field_text(Field::Issue).is_none());
    }

    #[test]
    fn test_level_is_clamped() {
        assert_eq!(Goal::new("a", "x", 0).level(), 1);
        assert_eq!(Goal::new("b", "x", 9).level(), 5);
    }

    #[test]
    fn test_shared_domains_case_insensitive() {
        let a = Goal::new("a", "x", 1).with_domains(["Work", "health"]);
        let b = Goal::new("b", "y", 2).with_domains(["work ", "Travel"]);
        assert_eq!(a.shared_domains(&b), vec!["work".to_string()]);
    }

    #[test]
    fn test_text_embedding_falls_back_to_item_embedding() {
        let mut goal = Goal::new("a", "x", 1);
        goal.item.embedding = Some(vec![1.0, 0.0]);
        assert_eq!(goal.field_embedding(Field::Text), Some(&[1.0f32, 0.0][..]));
        assert!(goal.field_embedding(Field::Theme).is_none());
    }

    #[test]
    fn test_missing_field_embeddings() {
        let goal = Goal::new("a", "text", 2)
            .with_theme("theme")
            .with_field_embedding(Field::Theme, vec![0.5]);
        let missing = goal.missing_field_embeddings();
        assert_eq!(missing, vec![(Field::Text, "text".to_string())]);
    }

    #[test]
    fn test_goal_serde_flattens_item() {
        let goal = Goal::new("g", "text", 2).with_path("Inbox -> work");
        let json = serde_json::to_value(&goal).unwrap();
        assert_eq!(json["id"], "g");
        assert_eq!(json["path"], "Inbox -> work");
        let back: Goal = serde_json::from_value(json).unwrap();
        assert_eq!(back, goal);
    }
}
