//! LLM extraction of intents (per message group) and goals (per intent
//! cluster).
//!
//! Parsed responses are cached by a content hash of the model and the input
//! text. A malformed response is logged and stored as an artifact, and the
//! unit yields no items.

use mindgraph_cache::content_hash;
use mindgraph_core::{Goal, Intent, LanguageModel, ResponseCache};
use mindgraph_relations::{chat, extraction_config, ArtifactSink, ResponseParser};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::error::{PipelineError, Result};
use crate::grouping::MessageGroup;

const INTENT_SYSTEM_PROMPT: &str = "You read a batch of personal messages and list the \
intents (things the author wants, plans or worries about) they express. Answer with JSON only.";

const INTENT_FORMAT: &str = r#"Respond with {"intents": [{"intent": "<one sentence>", "status": "open" | "done"}]}"#;

const GOAL_SYSTEM_PROMPT: &str = "You turn related intents into structured goals. \
Answer with JSON only.";

const GOAL_FORMAT: &str = r#"Respond with {"goals": [{"text": "<goal>", "theme": "...", "subject": "...",
"action": [], "target": [], "conditions": [], "issue": [], "domain": [], "outcome": [],
"abstraction_level": <1 (most abstract) to 5 (most concrete)>}]}"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum IntentEntry {
    Text(String),
    Full {
        intent: String,
        #[serde(default)]
        status: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IntentsResponse {
    #[serde(default)]
    intents: Vec<IntentEntry>,
}

fn default_level() -> u8 {
    3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct GoalEntry {
    text: String,
    #[serde(default)]
    theme: Option<String>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    action: Vec<String>,
    #[serde(default)]
    target: Vec<String>,
    #[serde(default)]
    conditions: Vec<String>,
    #[serde(default)]
    issue: Vec<String>,
    #[serde(default)]
    domain: Vec<String>,
    #[serde(default)]
    outcome: Vec<String>,
    #[serde(default = "default_level")]
    abstraction_level: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct GoalsResponse {
    #[serde(default)]
    goals: Vec<GoalEntry>,
}

/// Shared call/parse/cache logic for the extractors.
struct JsonExtraction {
    llm: Arc<dyn LanguageModel>,
    cache: Arc<dyn ResponseCache>,
    artifacts: Arc<dyn ArtifactSink>,
    parser: ResponseParser,
}

impl JsonExtraction {
    fn new(
        llm: Arc<dyn LanguageModel>,
        cache: Arc<dyn ResponseCache>,
        artifacts: Arc<dyn ArtifactSink>,
    ) -> Result<Self> {
        Ok(Self {
            llm,
            cache,
            artifacts,
            parser: ResponseParser::new()?,
        })
    }

    fn key(&self, namespace: &str, input: &str) -> String {
        format!("{}_{}", namespace, content_hash(&[self.llm.model_name(), input]))
    }

    /// `Ok(None)` when the response does not parse.
    async fn run<T>(
        &self,
        namespace: &str,
        unit: &str,
        system: &str,
        user: String,
    ) -> Result<Option<T>>
    where
        T: DeserializeOwned + Serialize,
    {
        let key = self.key(namespace, &user);
        match self.cache.get(&key).await {
            Ok(Some(value)) => match serde_json::from_value::<T>(value) {
                Ok(parsed) => {
                    debug!("{} cache hit for {}", namespace, unit);
                    return Ok(Some(parsed));
                }
                Err(e) => warn!("Ignoring unreadable cached {} entry {}: {}", namespace, key, e),
            },
            Ok(None) => {}
            Err(e) => warn!("Cache lookup failed for {}: {}", key, e),
        }

        let raw = self
            .llm
            .generate_chat(&chat(system, user), &extraction_config())
            .await
            .map_err(PipelineError::oracle)?;

        match self.parser.parse_json::<T>(&raw) {
            Ok(parsed) => {
                match serde_json::to_value(&parsed) {
                    Ok(value) => {
                        if let Err(e) = self.cache.set(&key, value).await {
                            warn!("Failed to cache {} response {}: {}", namespace, key, e);
                        }
                    }
                    Err(e) => warn!("Failed to encode {} response: {}", namespace, e),
                }
                Ok(Some(parsed))
            }
            Err(err) => {
                error!(
                    "Malformed {} response for {} at line {}, column {} (offset {}): {} \
                     | context: {}",
                    namespace, unit, err.line, err.column, err.offset, err.message, err.snippet
                );
                let content = format!("{}\n\n{}", err, raw);
                if let Err(e) = self.artifacts.persist(namespace, &key, &content) {
                    warn!("Failed to persist {} artifact {}: {}", namespace, key, e);
                }
                Ok(None)
            }
        }
    }
}

pub struct IntentExtractor {
    inner: JsonExtraction,
}

impl IntentExtractor {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        cache: Arc<dyn ResponseCache>,
        artifacts: Arc<dyn ArtifactSink>,
    ) -> Result<Self> {
        Ok(Self {
            inner: JsonExtraction::new(llm, cache, artifacts)?,
        })
    }

    /// Intents for one message group, ids `<group_id>_intent_<n>`. Each
    /// intent inherits the group's path and start time.
    pub async fn extract(&self, group: &MessageGroup) -> Result<Vec<Intent>> {
        if group.is_empty() {
            return Ok(Vec::new());
        }
        let prompt = format!(
            "Channel: {}\nMessages:\n{}\n\n{}",
            group.path,
            group.text(),
            INTENT_FORMAT
        );
        let Some(response) = self
            .inner
            .run::<IntentsResponse>("intents", &group.group_id, INTENT_SYSTEM_PROMPT, prompt)
            .await?
        else {
            return Ok(Vec::new());
        };

        Ok(response
            .intents
            .into_iter()
            .map(|entry| match entry {
                IntentEntry::Text(text) => (text, None),
                IntentEntry::Full { intent, status } => (intent, status),
            })
            .filter(|(text, _)| !text.trim().is_empty())
            .enumerate()
            .map(|(i, (text, status))| {
                let mut intent = Intent::new(
                    format!("{}_intent_{}", group.group_id, i),
                    group.group_id.clone(),
                    text.trim(),
                );
                intent.item.path = group.path.clone();
                intent.item.timestamps = group.start().into_iter().collect();
                if let Some(status) = status.filter(|s| !s.trim().is_empty()) {
                    intent.status = status.trim().to_string();
                }
                intent
            })
            .collect())
    }
}

pub struct GoalExtractor {
    inner: JsonExtraction,
}

impl GoalExtractor {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        cache: Arc<dyn ResponseCache>,
        artifacts: Arc<dyn ArtifactSink>,
    ) -> Result<Self> {
        Ok(Self {
            inner: JsonExtraction::new(llm, cache, artifacts)?,
        })
    }

    /// Goals for one intent cluster, ids `cluster_<label>_goal_<n>`. Goals
    /// take the cluster label, the first intent's path and every intent
    /// timestamp.
    pub async fn extract(&self, cluster: i32, intents: &[Intent]) -> Result<Vec<Goal>> {
        if intents.is_empty() {
            return Ok(Vec::new());
        }
        let listing: String = intents
            .iter()
            .map(|i| format!("- {}\n", i.item.text.trim()))
            .collect();
        let prompt = format!("Intents:\n{}\n{}", listing, GOAL_FORMAT);
        let unit = format!("cluster {}", cluster);
        let Some(response) = self
            .inner
            .run::<GoalsResponse>("goals", &unit, GOAL_SYSTEM_PROMPT, prompt)
            .await?
        else {
            return Ok(Vec::new());
        };

        let path = intents[0].item.path.clone();
        let mut timestamps: Vec<_> =
            intents.iter().flat_map(|i| i.item.timestamps.clone()).collect();
        timestamps.sort();
        timestamps.dedup();

        Ok(response
            .goals
            .into_iter()
            .filter(|g| !g.text.trim().is_empty())
            .enumerate()
            .map(|(n, g)| {
                let mut goal = Goal::new(
                    format!("cluster_{}_goal_{}", cluster, n),
                    g.text.trim(),
                    g.abstraction_level,
                )
                .with_path(path.clone())
                .with_cluster(cluster)
                .with_actions(g.action)
                .with_targets(g.target)
                .with_conditions(g.conditions)
                .with_issues(g.issue)
                .with_domains(g.domain)
                .with_outcomes(g.outcome);
                if let Some(theme) = g.theme {
                    goal = goal.with_theme(theme);
                }
                if let Some(subject) = g.subject {
                    goal = goal.with_subject(subject);
                }
                goal.item.timestamps = timestamps.clone();
                goal
            })
            .collect())
    }
}
