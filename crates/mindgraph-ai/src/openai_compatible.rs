use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use mindgraph_core::{
    Embedder, GenerationConfig, LanguageModel, Message, OracleConfig, OracleResult,
};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for OpenAI-compatible endpoints (OpenAI, LM Studio, Ollama, etc.)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAICompatibleConfig {
    /// Base URL for the API (e.g., "http://localhost:1234/v1")
    pub base_url: String,
    /// Chat completion model
    pub chat_model: String,
    /// Embedding model
    pub embedding_model: String,
    /// Dimensionality of the embedding model's output
    pub embedding_dimension: usize,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Maximum retries for failed requests
    pub max_retries: u32,
    /// Optional API key (some providers require it, some don't)
    pub api_key: Option<String>,
}

impl Default for OpenAICompatibleConfig {
    fn default() -> Self {
        Self::from(&OracleConfig::default())
    }
}

impl From<&OracleConfig> for OpenAICompatibleConfig {
    fn from(config: &OracleConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            chat_model: config.chat_model.clone(),
            embedding_model: config.embedding_model.clone(),
            embedding_dimension: config.embedding_dimension,
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
            api_key: config.api_key.clone(),
        }
    }
}

impl OpenAICompatibleConfig {
    /// Create config for Ollama (OpenAI-compatible endpoint)
    pub fn ollama(chat_model: String, embedding_model: String, embedding_dimension: usize) -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            chat_model,
            embedding_model,
            embedding_dimension,
            api_key: None,
            ..Default::default()
        }
    }
}

/// Chat and embedding oracle over an OpenAI-compatible HTTP API.
pub struct OpenAICompatibleOracle {
    config: OpenAICompatibleConfig,
    client: Client,
}

impl OpenAICompatibleOracle {
    pub fn new(config: OpenAICompatibleConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { config, client })
    }

    pub fn from_config(config: &OracleConfig) -> Result<Self> {
        Self::new(OpenAICompatibleConfig::from(config))
    }

    pub fn config(&self) -> &OpenAICompatibleConfig {
        &self.config
    }

    fn post(&self, endpoint: &str) -> RequestBuilder {
        let mut builder = self
            .client
            .post(format!("{}/{}", self.config.base_url, endpoint))
            .header("Content-Type", "application/json");
        if let Some(api_key) = &self.config.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", api_key));
        }
        builder
    }

    /// Run `request` with exponential backoff: 1s, 2s, 4s, ...
    async fn with_retries<T, F, Fut>(&self, what: &str, request: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(2u64.pow(attempt - 1));
                tokio::time::sleep(delay).await;
            }

            match request().await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if attempt < self.config.max_retries {
                        warn!(
                            "{} request failed (attempt {}/{}): {}; retrying...",
                            what,
                            attempt + 1,
                            self.config.max_retries + 1,
                            e
                        );
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("All retry attempts failed")))
    }

    async fn send_json<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &Req,
    ) -> Result<Resp> {
        let response = self.post(endpoint).json(body).send().await.context(format!(
            "Failed to send request to {}/{}",
            self.config.base_url, endpoint
        ))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!("API error ({}): {}", status, error_text));
        }

        response
            .json::<Resp>()
            .await
            .context(format!("Failed to parse {} response", endpoint))
    }

    fn chat_request(
        &self,
        messages: &[Message],
        config: &GenerationConfig,
    ) -> ChatCompletionsRequest {
        ChatCompletionsRequest {
            model: self.config.chat_model.clone(),
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            temperature: Some(config.temperature),
            max_tokens: config.max_tokens,
            top_p: config.top_p,
            stop: config.stop.clone(),
        }
    }
}

/// Content of the first choice.
fn chat_content(response: ChatCompletionsResponse) -> Result<String> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No choices in response"))?;
    Ok(choice.message.content)
}

/// Vectors in input order, checked against the expected count and dimension.
fn ordered_embeddings(
    response: EmbeddingsResponse,
    expected: usize,
    dimension: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut data = response.data;
    if data.len() != expected {
        return Err(anyhow!(
            "Embedding API returned {} vectors for {} inputs",
            data.len(),
            expected
        ));
    }
    data.sort_by_key(|d| d.index);
    data.into_iter()
        .map(|d| {
            if dimension > 0 && d.embedding.len() != dimension {
                Err(anyhow!(
                    "Embedding {} has dimension {}, expected {}",
                    d.index,
                    d.embedding.len(),
                    dimension
                ))
            } else {
                Ok(d.embedding)
            }
        })
        .collect()
}

#[async_trait]
impl LanguageModel for OpenAICompatibleOracle {
    async fn generate_chat(
        &self,
        messages: &[Message],
        config: &GenerationConfig,
    ) -> OracleResult<String> {
        let request = self.chat_request(messages, config);
        let response: ChatCompletionsResponse = self
            .with_retries("chat completion", || self.send_json("chat/completions", &request))
            .await?;
        if let Some(usage) = &response.usage {
            debug!(
                "{}: {} prompt + {} completion tokens",
                self.config.chat_model, usage.prompt_tokens, usage.completion_tokens
            );
        }
        chat_content(response)
    }

    fn model_name(&self) -> &str {
        &self.config.chat_model
    }
}

#[async_trait]
impl Embedder for OpenAICompatibleOracle {
    async fn embed(&self, texts: &[String]) -> OracleResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = EmbeddingsRequest {
            model: self.config.embedding_model.clone(),
            input: texts.to_vec(),
        };
        let response: EmbeddingsResponse = self
            .with_retries("embedding", || self.send_json("embeddings", &request))
            .await?;
        ordered_embeddings(response, texts.len(), self.config.embedding_dimension)
    }

    fn dimension(&self) -> usize {
        self.config.embedding_dimension
    }

    fn model_name(&self) -> &str {
        &self.config.embedding_model
    }
}

// API request/response types for Chat Completions API

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

// API request/response types for Embeddings API

#[derive(Debug, Serialize)]
struct EmbeddingsRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
