use crate::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Shared response cache keyed by a content hash of the semantically
/// relevant input. Values are pure functions of their keys, so concurrent
/// writers may race and the last write wins.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// Cache that never stores anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

#[async_trait]
impl ResponseCache for NoopCache {
    async fn get(&self, _key: &str) -> Result<Option<Value>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: Value) -> Result<()> {
        Ok(())
    }
}
