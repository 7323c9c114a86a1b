//! Group-scoped why/how relation extraction through the language model.

use mindgraph_core::{
    sort_relations, LanguageModel, MindGraphError, Relation, RelationType, ResponseCache, Result,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::artifact::ArtifactSink;
use super::candidates::CandidateSet;
use super::parse::{RelationsResponse, ResponseParser};
use super::prompt::{chat, extraction_config, why_how_prompt, WHY_HOW_SYSTEM_PROMPT};

pub const WHY_HOW_NAMESPACE: &str = "why_how";

pub struct WhyHowExtractor {
    llm: Arc<dyn LanguageModel>,
    cache: Arc<dyn ResponseCache>,
    artifacts: Arc<dyn ArtifactSink>,
    parser: ResponseParser,
}

impl WhyHowExtractor {
    pub fn new(
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

    /// Extract why/how relations touching the target items of `set`.
    ///
    /// The raw response is cached under the id-set key once it parses, so a
    /// cache hit rebuilds the same relations without calling the model.
    /// Malformed JSON is logged, written as an artifact and yields `None`.
    /// Transport failures are returned as [`MindGraphError::Oracle`].
    pub async fn extract(&self, set: &CandidateSet) -> Result<Option<Vec<Relation>>> {
        if set.target_indices.is_empty() || set.len() < 2 {
            return Ok(Some(Vec::new()));
        }
        let key = set.cache_key(WHY_HOW_NAMESPACE);

        if let Some(raw) = self.cached_response(&key).await {
            if let Ok(response) = self.parser.parse_json::<RelationsResponse>(&raw) {
                debug!("why/how cache hit for group {}", set.group_id);
                return Ok(Some(build_why_how_relations(set, &response)));
            }
            warn!("Ignoring unparseable cached why/how response {}", key);
        }

        let raw = self
            .llm
            .generate_chat(
                &chat(WHY_HOW_SYSTEM_PROMPT, why_how_prompt(set)),
                &extraction_config(),
            )
            .await
            .map_err(|e| MindGraphError::Oracle(format!("{}: {}", self.llm.model_name(), e)))?;

        match self.parser.parse_json::<RelationsResponse>(&raw) {
            Ok(response) => {
                if let Err(e) = self.cache.set(&key, Value::String(raw)).await {
                    warn!("Failed to cache why/how response {}: {}", key, e);
                }
                let relations = build_why_how_relations(set, &response);
                info!(
                    "why/how for group {}: {} relations from {} proposed",
                    set.group_id,
                    relations.len(),
                    response.relations.len()
                );
                Ok(Some(relations))
            }
            Err(err) => {
                error!(
                    "Malformed why/how response for group {} at line {}, column {} \
                     (offset {}): {} | context: {}",
                    set.group_id, err.line, err.column, err.offset, err.message, err.snippet
                );
                let content = format!("{}\n\n{}", err, raw);
                if let Err(e) = self.artifacts.persist(WHY_HOW_NAMESPACE, &key, &content) {
                    warn!("Failed to persist why/how artifact {}: {}", key, e);
                }
                Ok(None)
            }
        }
    }

    async fn cached_response(&self, key: &str) -> Option<String> {
        match self.cache.get(key).await {
            Ok(Some(Value::String(raw))) => Some(raw),
            Ok(_) => None,
            Err(e) => {
                warn!("Cache lookup failed for {}: {}", key, e);
                None
            }
        }
    }
}

/// Resolve a parsed response against the candidate indices.
///
/// Out-of-range indices, types other than why/how, self-loops and relations
/// that do not touch a target item are dropped. Scores are 1.0.
pub fn build_why_how_relations(set: &CandidateSet, response: &RelationsResponse) -> Vec<Relation> {
    let mut relations: Vec<Relation> = response
        .relations
        .iter()
        .filter_map(|raw| {
            let (Some(source), Some(target)) =
                (raw.source.resolve(set.len()), raw.target.resolve(set.len()))
            else {
                debug!("Dropping why/how relation with out-of-range index: {:?}", raw);
                return None;
            };
            let relation_type = match raw.relation_type.parse::<RelationType>() {
                Ok(t @ (RelationType::Why | RelationType::How)) => t,
                _ => return None,
            };
            if !set.is_target(source) && !set.is_target(target) {
                return None;
            }
            let (source, target) = (set.get(source)?, set.get(target)?);
            Relation::new(&source.id, &target.id, relation_type, 1.0, raw.reason.trim()).ok()
        })
        .collect();
    sort_relations(&mut relations);
    relations.dedup_by(|a, b| a.sort_key() == b.sort_key());
    relations
}
