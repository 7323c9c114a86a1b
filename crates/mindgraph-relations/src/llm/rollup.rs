//! Hierarchical rollup: outline trees become generated goal nodes plus
//! `goal-means` edges.

use mindgraph_cache::id_set_key;
use mindgraph_core::{
    sort_relations, GeneratedNode, Item, LanguageModel, MindGraphError, Relation, RelationType,
    ResponseCache, Result,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::artifact::ArtifactSink;
use super::outline::{OutlineNode, OutlineParser};
use super::prompt::{chat, extraction_config, rollup_prompt, ROLLUP_SYSTEM_PROMPT};

pub const ROLLUP_NAMESPACE: &str = "rollup";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollupGraph {
    pub generated: Vec<GeneratedNode>,
    pub relations: Vec<Relation>,
}

struct RollupBuilder<'a> {
    known: &'a HashSet<String>,
    id_prefix: &'a str,
    next_id: usize,
    used: HashSet<String>,
    edges: HashSet<(String, String)>,
    graph: RollupGraph,
}

impl RollupBuilder<'_> {
    fn fresh_id(&mut self) -> String {
        loop {
            let id = format!("{}{}", self.id_prefix, self.next_id);
            self.next_id += 1;
            if !self.known.contains(&id) && self.used.insert(id.clone()) {
                return id;
            }
        }
    }

    /// Preorder walk. `parent` is the nearest valid ancestor.
    fn visit(&mut self, node: &OutlineNode, parent: Option<&str>) {
        let resolved = match node.id.as_deref() {
            Some(id) if self.known.contains(id) => Some(id.to_string()),
            _ if !node.children.is_empty() && !node.text.trim().is_empty() => {
                let id = self.fresh_id();
                let level = node
                    .properties
                    .get("level")
                    .and_then(|l| l.trim().parse().ok())
                    .unwrap_or(node.level);
                self.graph.generated.push(GeneratedNode {
                    id: id.clone(),
                    text: node.text.trim().to_string(),
                    level,
                    properties: node.properties.clone(),
                });
                Some(id)
            }
            _ => {
                debug!("Skipping invalid rollup node {:?} ({})", node.id, node.text);
                None
            }
        };

        if let (Some(child), Some(parent)) = (resolved.as_deref(), parent) {
            if self.edges.insert((child.to_string(), parent.to_string())) {
                let relation =
                    Relation::new(child, parent, RelationType::GoalMeans, 1.0, "rollup");
                if let Ok(rel) = relation {
                    self.graph.relations.push(rel);
                }
            }
        }

        let next_parent = resolved.as_deref().or(parent);
        for child in &node.children {
            self.visit(child, next_parent);
        }
    }
}

/// Turn a parsed outline into generated nodes and child→parent `goal-means`
/// relations.
///
/// A node whose id is in `known` stands for that item. A node with an unknown
/// id, children and text becomes a generated node with id `<prefix><n>`,
/// numbered in preorder. Any other node is invalid and its children attach to
/// the nearest valid ancestor.
pub fn build_rollup(
    roots: &[OutlineNode],
    known: &HashSet<String>,
    id_prefix: &str,
) -> RollupGraph {
    let mut builder = RollupBuilder {
        known,
        id_prefix,
        next_id: 0,
        used: HashSet::new(),
        edges: HashSet::new(),
        graph: RollupGraph::default(),
    };
    for root in roots {
        builder.visit(root, None);
    }
    sort_relations(&mut builder.graph.relations);
    builder.graph
}

pub struct RollupExtractor {
    llm: Arc<dyn LanguageModel>,
    cache: Arc<dyn ResponseCache>,
    artifacts: Arc<dyn ArtifactSink>,
    parser: OutlineParser,
    id_prefix: String,
}

impl RollupExtractor {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        cache: Arc<dyn ResponseCache>,
        artifacts: Arc<dyn ArtifactSink>,
    ) -> Result<Self> {
        Ok(Self {
            llm,
            cache,
            artifacts,
            parser: OutlineParser::new()?,
            id_prefix: "ultra_".to_string(),
        })
    }

    #[must_use]
    pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = prefix.into();
        self
    }

    /// Ask the model to organise `items` into a goal tree. An empty or
    /// unusable outline is persisted as an artifact and yields `None`.
    pub async fn rollup(&self, items: &[Item]) -> Result<Option<RollupGraph>> {
        if items.is_empty() {
            return Ok(Some(RollupGraph::default()));
        }
        let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
        let known: HashSet<String> = ids.iter().cloned().collect();
        let key = id_set_key(ROLLUP_NAMESPACE, &[&ids]);

        match self.cache.get(&key).await {
            Ok(Some(Value::String(raw))) => {
                let roots = self.parser.parse(&raw);
                if !roots.is_empty() {
                    debug!("Rollup cache hit for {} items", items.len());
                    return Ok(Some(build_rollup(&roots, &known, &self.id_prefix)));
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Cache lookup failed for {}: {}", key, e),
        }

        let raw = self
            .llm
            .generate_chat(&chat(ROLLUP_SYSTEM_PROMPT, rollup_prompt(items)), &extraction_config())
            .await
            .map_err(|e| MindGraphError::Oracle(format!("{}: {}", self.llm.model_name(), e)))?;

        let roots = self.parser.parse(&raw);
        if roots.is_empty() {
            error!(
                "Rollup response for {} items contained no outline ({} chars)",
                items.len(),
                raw.chars().count()
            );
            if let Err(e) = self.artifacts.persist(ROLLUP_NAMESPACE, &key, &raw) {
                warn!("Failed to persist rollup artifact {}: {}", key, e);
            }
            return Ok(None);
        }
        if let Err(e) = self.cache.set(&key, Value::String(raw)).await {
            warn!("Failed to cache rollup response {}: {}", key, e);
        }
        let graph = build_rollup(&roots, &known, &self.id_prefix);
        info!(
            "Rollup of {} items: {} generated nodes, {} relations",
            items.len(),
            graph.generated.len(),
            graph.relations.len()
        );
        Ok(Some(graph))
    }
}
