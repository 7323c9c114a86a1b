use crate::{CacheStats, Counters};
use async_trait::async_trait;
use dashmap::DashMap;
use mindgraph_core::{ResponseCache, Result};
use serde_json::Value;
use std::sync::Arc;

/// Process-local cache backed by a concurrent map.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, Value>>,
    counters: Arc<Counters>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot(self.entries.len())
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        match self.entries.get(key) {
            Some(entry) => {
                self.counters.hit();
                Ok(Some(entry.value().clone()))
            }
            None => {
                self.counters.miss();
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        self.counters.write();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_set_and_stats() {
        let cache = MemoryCache::new();
        assert!(cache.get("k").await.unwrap().is_none());
        cache.set("k", json!({"a": 1})).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!({"a": 1})));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.entries, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let cache = MemoryCache::new();
        cache.set("k", json!(1)).await.unwrap();
        cache.set("k", json!(2)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!(2)));
        assert_eq!(cache.len(), 1);
    }
}
