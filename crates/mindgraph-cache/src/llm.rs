use crate::content_hash;
use async_trait::async_trait;
use mindgraph_core::{GenerationConfig, LanguageModel, Message, OracleResult, ResponseCache};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Language model wrapper that memoizes completions by prompt content.
pub struct CachedLanguageModel {
    inner: Arc<dyn LanguageModel>,
    cache: Arc<dyn ResponseCache>,
}

impl CachedLanguageModel {
    pub fn new(inner: Arc<dyn LanguageModel>, cache: Arc<dyn ResponseCache>) -> Self {
        Self { inner, cache }
    }

    fn key(&self, messages: &[Message], config: &GenerationConfig) -> String {
        let mut parts: Vec<String> = vec![
            self.inner.model_name().to_string(),
            format!("{:.3}", config.temperature),
        ];
        for m in messages {
            parts.push(m.role.to_string());
            parts.push(m.content.clone());
        }
        format!("llm_{}", content_hash(&parts))
    }
}

#[async_trait]
impl LanguageModel for CachedLanguageModel {
    async fn generate_chat(
        &self,
        messages: &[Message],
        config: &GenerationConfig,
    ) -> OracleResult<String> {
        let key = self.key(messages, config);
        match self.cache.get(&key).await {
            Ok(Some(Value::String(text))) => {
                debug!("LLM cache hit {}", key);
                return Ok(text);
            }
            Ok(_) => {}
            Err(e) => warn!("LLM cache read failed: {}", e),
        }

        let text = self.inner.generate_chat(messages, config).await?;
        if let Err(e) = self.cache.set(&key, Value::String(text.clone())).await {
            warn!("LLM cache write failed: {}", e);
        }
        Ok(text)
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
