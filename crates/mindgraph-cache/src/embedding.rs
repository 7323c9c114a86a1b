use crate::embedding_key;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use mindgraph_core::{BatchPolicy, Embedder, OracleResult, ResponseCache};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Embedder that consults a response cache per text and sends only the
/// misses to the wrapped oracle, in batches paced by a [`BatchPolicy`].
///
/// Identical text always maps to the same cache key, so a re-run returns the
/// cached vector instead of recomputing it.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Arc<dyn ResponseCache>,
    policy: BatchPolicy,
}

impl CachedEmbedder {
    pub fn new(
        inner: Arc<dyn Embedder>,
        cache: Arc<dyn ResponseCache>,
        policy: BatchPolicy,
    ) -> Self {
        Self {
            inner,
            cache,
            policy,
        }
    }

    pub fn policy(&self) -> &BatchPolicy {
        &self.policy
    }

    async fn lookup(&self, key: &str) -> Option<Vec<f32>> {
        match self.cache.get(key).await {
            Ok(Some(value)) => match serde_json::from_value::<Vec<f32>>(value) {
                Ok(v) if self.inner.dimension() == 0 || v.len() == self.inner.dimension() => {
                    Some(v)
                }
                Ok(v) => {
                    warn!(
                        "Cached embedding has dimension {} (expected {}), recomputing",
                        v.len(),
                        self.inner.dimension()
                    );
                    None
                }
                Err(e) => {
                    warn!("Unreadable cached embedding {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Embedding cache read failed for {}: {}", key, e);
                None
            }
        }
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, texts: &[String]) -> OracleResult<Vec<Vec<f32>>> {
        let model = self.inner.model_name().to_string();
        let mut resolved: HashMap<&str, Vec<f32>> = HashMap::new();
        let mut misses: Vec<String> = Vec::new();

        for text in texts {
            if resolved.contains_key(text.as_str()) || misses.contains(text) {
                continue;
            }
            match self.lookup(&embedding_key(&model, text)).await {
                Some(vector) => {
                    resolved.insert(text.as_str(), vector);
                }
                None => misses.push(text.clone()),
            }
        }

        debug!(
            "Embedding {} texts: {} cached, {} to compute",
            texts.len(),
            resolved.len(),
            misses.len()
        );

        let batch_size = self.policy.batch_size.max(1);
        let mut computed: HashMap<String, Vec<f32>> = HashMap::new();
        for (batch_index, batch) in misses.chunks(batch_size).enumerate() {
            if batch_index > 0 && !self.policy.inter_batch_delay().is_zero() {
                tokio::time::sleep(self.policy.inter_batch_delay()).await;
            }
            let vectors = self
                .inner
                .embed(batch)
                .await
                .with_context(|| format!("embedding batch {} failed", batch_index))?;
            if vectors.len() != batch.len() {
                return Err(anyhow!(
                    "embedding oracle returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                ));
            }
            for (text, vector) in batch.iter().zip(vectors) {
                let value = serde_json::to_value(&vector)?;
                if let Err(e) = self.cache.set(&embedding_key(&model, text), value).await {
                    warn!("Embedding cache write failed: {}", e);
                }
                computed.insert(text.clone(), vector);
            }
        }
        if !misses.is_empty() {
            info!(
                "Computed {} embeddings in {} batches",
                misses.len(),
                misses.len().div_ceil(batch_size)
            );
        }

        texts
            .iter()
            .map(|t| {
                resolved
                    .get(t.as_str())
                    .or_else(|| computed.get(t))
                    .cloned()
                    .ok_or_else(|| anyhow!("no embedding produced for text"))
            })
            .collect()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryCache;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingEmbedder {
        calls: AtomicUsize,
        texts_seen: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, texts: &[String]) -> OracleResult<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.texts_seen.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, 1.0])
                .collect())
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "counting"
        }
    }

    fn texts(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_second_call_is_served_from_cache() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
            texts_seen: AtomicUsize::new(0),
        });
        let embedder = CachedEmbedder::new(
            inner.clone(),
            Arc::new(MemoryCache::new()),
            BatchPolicy::new(2, Duration::ZERO),
        );

        let input = texts(&["a", "bb", "ccc", "a"]);
        let first = embedder.embed(&input).await.unwrap();
        let second = embedder.embed(&input).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first[0], first[3]);
        // three distinct texts, batch size two
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(inner.texts_seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_short_oracle_response_is_an_error() {
        struct Short;
        #[async_trait]
        impl Embedder for Short {
            async fn embed(&self, _texts: &[String]) -> OracleResult<Vec<Vec<f32>>> {
                Ok(vec![])
            }
            fn dimension(&self) -> usize {
                2
            }
            fn model_name(&self) -> &str {
                "short"
            }
        }

        let embedder = CachedEmbedder::new(
            Arc::new(Short),
            Arc::new(MemoryCache::new()),
            BatchPolicy::default(),
        );
        assert!(embedder.embed(&texts(&["x"])).await.is_err());
    }
}
