use async_trait::async_trait;
use mindgraph_cache::MemoryCache;
use mindgraph_core::{GenerationConfig, Item, LanguageModel, Message, OracleResult, RelationType};
use mindgraph_relations::{
    CandidateSelector, IntentGroup, MemoryArtifactSink, RollupExtractor, WhyHowExtractor,
    ROLLUP_NAMESPACE, WHY_HOW_NAMESPACE,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct ScriptedLlm {
    response: String,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    fn new(response: &str) -> Arc<Self> {
        Arc::new(Self {
            response: response.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn generate_chat(
        &self,
        _messages: &[Message],
        _config: &GenerationConfig,
    ) -> OracleResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

struct FailingLlm;

#[async_trait]
impl LanguageModel for FailingLlm {
    async fn generate_chat(
        &self,
        _messages: &[Message],
        _config: &GenerationConfig,
    ) -> OracleResult<String> {
        anyhow::bail!("connection refused")
    }

    fn model_name(&self) -> &str {
        "failing"
    }
}

fn groups() -> Vec<IntentGroup> {
    vec![
        IntentGroup::new(
            "g0",
            vec![Item::new("i0", "stay fit"), Item::new("i1", "lose weight")],
        ),
        IntentGroup::new("g1", vec![Item::new("i2", "go running every morning")]),
    ]
}

const FENCED: &str = r#"```json
{"relations": [
  {"source": 0, "target": 2, "type": "how", "reason": "running helps weight loss"},
  {"source": 1, "target": 2, "type": "why", "reason": "only context items"},
  {"source": 0, "target": 9, "type": "how", "reason": "out of range"},
  {"source": 0, "target": 0, "type": "why", "reason": "self loop"},
  {"source": "1", "target": 0, "type": "why", "reason": "fitness drives running"},
  {"source": 0, "target": 1, "type": "hierarchy", "reason": "wrong type"}
]}
```"#;

#[tokio::test]
async fn test_why_how_filters_and_caches() {
    let llm = ScriptedLlm::new(FENCED);
    let cache = Arc::new(MemoryCache::new());
    let sinks = Arc::new(MemoryArtifactSink::new());
    let extractor = WhyHowExtractor::new(llm.clone(), cache.clone(), sinks.clone()).unwrap();

    let set = CandidateSelector::new(0, 5).select(&groups(), 1).unwrap();
    // index 0 = i2 (target), 1 = i0, 2 = i1
    let first = extractor.extract(&set).await.unwrap().unwrap();
    let pairs: Vec<(&str, &str, RelationType)> = first
        .iter()
        .map(|r| (r.source_id.as_str(), r.target_id.as_str(), r.relation_type))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("i0", "i2", RelationType::Why),
            ("i2", "i1", RelationType::How),
        ]
    );
    assert!(first.iter().all(|r| r.score == 1.0));
    assert_eq!(llm.calls(), 1);
    assert_eq!(cache.len(), 1);

    let second = extractor.extract(&set).await.unwrap().unwrap();
    assert_eq!(second, first);
    assert_eq!(llm.calls(), 1);
    assert!(sinks.artifacts().is_empty());
}

#[tokio::test]
async fn test_malformed_response_writes_artifact() {
    let llm = ScriptedLlm::new("{\"relations\": [ {\"source\": 0 \"target\": 1} ]}");
    let cache = Arc::new(MemoryCache::new());
    let sinks = Arc::new(MemoryArtifactSink::new());
    let extractor = WhyHowExtractor::new(llm.clone(), cache.clone(), sinks.clone()).unwrap();

    let set = CandidateSelector::new(0, 5).select(&groups(), 1).unwrap();
    let result = extractor.extract(&set).await.unwrap();
    assert!(result.is_none());
    assert!(cache.is_empty());

    let artifacts = sinks.artifacts();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].kind, WHY_HOW_NAMESPACE);
    assert_eq!(artifacts[0].key, set.cache_key(WHY_HOW_NAMESPACE));
    assert!(artifacts[0].content.contains("line 1"));
}

#[tokio::test]
async fn test_oracle_failure_is_an_error() {
    let extractor = WhyHowExtractor::new(
        Arc::new(FailingLlm),
        Arc::new(MemoryCache::new()),
        Arc::new(MemoryArtifactSink::new()),
    )
    .unwrap();
    let set = CandidateSelector::new(0, 5).select(&groups(), 1).unwrap();
    let err = extractor.extract(&set).await.unwrap_err();
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn test_rollup_round_trip_through_cache() {
    let outline = "- [NEW] Get fit\n  - [i0] stay fit\n  - [i2] go running every morning\n";
    let llm = ScriptedLlm::new(outline);
    let cache = Arc::new(MemoryCache::new());
    let extractor = RollupExtractor::new(
        llm.clone(),
        cache.clone(),
        Arc::new(MemoryArtifactSink::new()),
    )
    .unwrap()
    .with_id_prefix("ultra_");

    let items: Vec<Item> = groups().into_iter().flat_map(|g| g.items).collect();
    let graph = extractor.rollup(&items).await.unwrap().unwrap();
    assert_eq!(graph.generated.len(), 1);
    assert_eq!(graph.generated[0].id, "ultra_0");
    assert_eq!(graph.relations.len(), 2);
    assert!(graph.relations.iter().all(|r| r.target_id == "ultra_0"));

    let again = extractor.rollup(&items).await.unwrap().unwrap();
    assert_eq!(again, graph);
    assert_eq!(llm.calls(), 1);
}

#[tokio::test]
async fn test_rollup_without_outline_is_none() {
    let sinks = Arc::new(MemoryArtifactSink::new());
    let extractor = RollupExtractor::new(
        ScriptedLlm::new("I cannot help with that."),
        Arc::new(MemoryCache::new()),
        sinks.clone(),
    )
    .unwrap();
    let items = vec![Item::new("a", "x"), Item::new("b", "y")];
    assert!(extractor.rollup(&items).await.unwrap().is_none());
    assert_eq!(sinks.artifacts()[0].kind, ROLLUP_NAMESPACE);
}
