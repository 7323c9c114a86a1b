//! Retrieval over graph nodes: vector hits, balanced subgraph expansion and
//! a grounded LLM answer.

use async_trait::async_trait;
use dashmap::DashMap;
use mindgraph_core::{Embedder, GenerationConfig, LanguageModel, Message, MessageRole};
use mindgraph_graph::{GoalGraph, GraphRecord, Subgraph, SubgraphStrategy};
use mindgraph_relations::cosine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

const RAG_SYSTEM_PROMPT: &str = "You answer questions about the user's goals and intents. \
Use only the graph context provided; say so when it does not contain the answer.";

/// Exact-match filter over metadata keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub equals: BTreeMap<String, Value>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, metadata: &Value) -> bool {
        self.equals
            .iter()
            .all(|(key, expected)| metadata.get(key) == Some(expected))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
    pub metadata: Value,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: Value) -> Result<()>;

    /// Best `k` matches by similarity, highest first.
    async fn query(
        &self,
        vector: &[f32],
        filter: Option<&MetadataFilter>,
        k: usize,
    ) -> Result<Vec<SearchHit>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Brute-force cosine index held in memory.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    entries: DashMap<String, (Vec<f32>, Value)>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: Value) -> Result<()> {
        self.entries.insert(id.to_string(), (vector, metadata));
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        filter: Option<&MetadataFilter>,
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        let mut hits: Vec<SearchHit> = self
            .entries
            .iter()
            .filter(|entry| filter.map_or(true, |f| f.matches(&entry.value().1)))
            .filter_map(|entry| {
                let (stored, metadata) = entry.value();
                cosine(vector, stored).map(|score| SearchHit {
                    id: entry.key().clone(),
                    score,
                    metadata: metadata.clone(),
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(k);
        Ok(hits)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagAnswer {
    pub answer: String,
    pub hits: Vec<SearchHit>,
    pub subgraph: Subgraph,
}

pub struct RagEngine {
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn LanguageModel>,
    index: Arc<dyn VectorIndex>,
    record: GraphRecord,
    graph: GoalGraph,
    top_k: usize,
    strategy: SubgraphStrategy,
}

impl RagEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LanguageModel>,
        index: Arc<dyn VectorIndex>,
        record: GraphRecord,
    ) -> Self {
        let graph = record.to_graph();
        Self {
            embedder,
            llm,
            index,
            record,
            graph,
            top_k: 5,
            strategy: SubgraphStrategy::Balanced,
        }
    }

    #[must_use]
    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = k.max(1);
        self
    }

    pub fn graph(&self) -> &GoalGraph {
        &self.graph
    }

    /// Embed every node of the record and add it to the index. Metadata
    /// carries the node type and status.
    pub async fn index_record(&self) -> Result<usize> {
        let ids: Vec<&String> = self.record.nodes.keys().collect();
        let texts: Vec<String> = self.record.nodes.values().map(|n| n.intent.clone()).collect();
        if texts.is_empty() {
            return Ok(0);
        }
        let vectors = self.embedder.embed(&texts).await.map_err(PipelineError::oracle)?;
        if vectors.len() != texts.len() {
            return Err(PipelineError::Oracle(format!(
                "requested {} embeddings, received {}",
                texts.len(),
                vectors.len()
            )));
        }
        for (id, vector) in ids.iter().zip(vectors) {
            let node = &self.record.nodes[*id];
            let metadata = json!({"type": node.node_type, "status": node.status});
            self.index.upsert(id, vector, metadata).await?;
        }
        info!("Indexed {} graph nodes", texts.len());
        Ok(texts.len())
    }

    pub async fn query(&self, question: &str) -> Result<RagAnswer> {
        self.query_filtered(question, None).await
    }

    pub async fn query_filtered(
        &self,
        question: &str,
        filter: Option<&MetadataFilter>,
    ) -> Result<RagAnswer> {
        let vectors = self
            .embedder
            .embed(&[question.to_string()])
            .await
            .map_err(PipelineError::oracle)?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| {
                PipelineError::Oracle("no embedding returned for the question".to_string())
            })?;

        let hits = self.index.query(&vector, filter, self.top_k).await?;
        let hit_ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        let subgraph = self.graph.subgraph(&hit_ids, &self.strategy.to_string())?;
        debug!(
            "RAG query matched {} hits, subgraph of {} nodes",
            hits.len(),
            subgraph.nodes.len()
        );

        let messages = vec![
            Message {
                role: MessageRole::System,
                content: RAG_SYSTEM_PROMPT.to_string(),
            },
            Message {
                role: MessageRole::User,
                content: format!("{}\nQuestion: {}", self.context(&subgraph), question),
            },
        ];
        let answer = self
            .llm
            .generate_chat(&messages, &GenerationConfig::default())
            .await
            .map_err(PipelineError::oracle)?;

        Ok(RagAnswer {
            answer,
            hits,
            subgraph,
        })
    }

    /// Node and edge listing handed to the model.
    pub fn context(&self, subgraph: &Subgraph) -> String {
        let mut out = String::from("Nodes:\n");
        for id in &subgraph.nodes {
            let (kind, text) = self
                .record
                .nodes
                .get(id)
                .map_or(("node", ""), |n| (n.node_type.as_str(), n.intent.as_str()));
            out.push_str(&format!("- [{}] ({}) {}\n", id, kind, text));
        }
        out.push_str("Edges (child -> parent):\n");
        for edge in &subgraph.edges {
            out.push_str(&format!(
                "- {} -[{}]-> {}\n",
                edge.child, edge.relation_type, edge.parent
            ));
        }
        out
    }
}

/// Metadata object for ad-hoc upserts.
pub fn metadata<I, K>(pairs: I) -> Value
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    Value::Object(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect::<Map<_, _>>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_query_orders_and_filters() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert("a", vec![1.0, 0.0], metadata([("type", json!("goal"))]))
            .await
            .unwrap();
        index
            .upsert("b", vec![0.8, 0.6], metadata([("type", json!("intent"))]))
            .await
            .unwrap();
        index
            .upsert("c", vec![0.0, 1.0], metadata([("type", json!("goal"))]))
            .await
            .unwrap();

        let hits = index.query(&[1.0, 0.0], None, 2).await.unwrap();
        assert_eq!(hits.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);

        let goals = MetadataFilter::new().with("type", "goal");
        let hits = index.query(&[0.0, 1.0], Some(&goals), 5).await.unwrap();
        assert_eq!(hits.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(), vec!["c", "a"]);
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let index = InMemoryVectorIndex::new();
        index.upsert("a", vec![1.0, 0.0], Value::Null).await.unwrap();
        index.upsert("a", vec![0.0, 1.0], Value::Null).await.unwrap();
        assert_eq!(index.len(), 1);
        let hits = index.query(&[0.0, 1.0], None, 1).await.unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unscorable_entries_are_skipped() {
        let index = InMemoryVectorIndex::new();
        index.upsert("zero", vec![0.0, 0.0], Value::Null).await.unwrap();
        index.upsert("short", vec![1.0], Value::Null).await.unwrap();
        index.upsert("ok", vec![0.6, 0.8], Value::Null).await.unwrap();

        let hits = index.query(&[1.0, 0.0], None, 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "ok");
        assert!((hits[0].score - 0.6).abs() < 1e-6);
        assert!(index.query(&[0.0, 0.0], None, 5).await.unwrap().is_empty());
    }
}
