use std::env;
use std::thread::sleep;
use std::time::Duration;

use grantdraft_core::{count_tokens, DraftError, HashEmbedder, HashEmbedderConfig, Result};
use grantdraft_llm::{backoff_delay, is_retryable_status};
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{EmbeddingConfig, EmbeddingProvider};

/// Turns text into fixed-width vectors. Documents and queries must go
/// through the same implementation so their distances are comparable.
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])?
            .pop()
            .ok_or_else(|| DraftError::GenerationFailed("embedding service returned no vector".into()))
    }
}

#[derive(Clone)]
pub enum EmbeddingBackend {
    Hash(HashEmbedder),
    OpenAi(OpenAiEmbeddingClient),
}

#[derive(Clone)]
pub struct EmbeddingClient {
    backend: EmbeddingBackend,
    model: String,
    batch_size: usize,
    max_input_tokens: usize,
}

impl EmbeddingClient {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let (backend, model) = match config.provider {
            EmbeddingProvider::OpenAi => (
                EmbeddingBackend::OpenAi(OpenAiEmbeddingClient::new(
                    &config.model,
                    config.max_retries,
                )?),
                config.model.clone(),
            ),
            EmbeddingProvider::Hash => (
                EmbeddingBackend::Hash(HashEmbedder::new(HashEmbedderConfig {
                    dimensions: config.dimensions,
                    ..HashEmbedderConfig::default()
                })),
                format!("hash-{}", config.dimensions),
            ),
        };
        Ok(Self {
            backend,
            model,
            batch_size: config.batch_size.max(1),
            max_input_tokens: config.max_input_tokens,
        })
    }

    pub fn hash() -> Self {
        let config = EmbeddingConfig::default();
        Self {
            backend: EmbeddingBackend::Hash(HashEmbedder::new(HashEmbedderConfig::default())),
            model: format!("hash-{}", HashEmbedderConfig::default().dimensions),
            batch_size: config.batch_size,
            max_input_tokens: config.max_input_tokens,
        }
    }

    fn check_input_sizes(&self, inputs: &[String]) -> Result<()> {
        for (position, text) in inputs.iter().enumerate() {
            let tokens = count_tokens(text);
            if tokens > self.max_input_tokens {
                return Err(DraftError::InvalidInput(format!(
                    "embedding input {position} has {tokens} tokens, limit is {}; re-chunk it",
                    self.max_input_tokens
                )));
            }
        }
        Ok(())
    }

    fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        match &self.backend {
            EmbeddingBackend::Hash(embedder) => Ok(inputs
                .iter()
                .map(|text| embedder.embed_text(text))
                .collect()),
            EmbeddingBackend::OpenAi(client) => client.embed_batch(inputs),
        }
    }
}

impl Embedder for EmbeddingClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.check_input_sizes(texts)?;
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let embedded = self.embed_batch(batch)?;
            if embedded.len() != batch.len() {
                return Err(DraftError::GenerationFailed(format!(
                    "embedding service returned {} vectors for {} inputs",
                    embedded.len(),
                    batch.len()
                )));
            }
            vectors.extend(embedded);
        }
        let width = vectors.first().map(Vec::len).unwrap_or(0);
        if width == 0 || vectors.iter().any(|vector| vector.len() != width) {
            return Err(DraftError::GenerationFailed(
                "embedding service returned vectors of inconsistent dimensionality".into(),
            ));
        }
        debug!(model = %self.model, inputs = texts.len(), width, "embedded texts");
        Ok(vectors)
    }
}

#[derive(Clone)]
pub struct OpenAiEmbeddingClient {
    http: Client,
    model: String,
    api_key: String,
    base_url: String,
    max_retries: usize,
}

impl OpenAiEmbeddingClient {
    pub fn new(model: &str, max_retries: usize) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY").map_err(|_| {
            DraftError::InvalidInput("OPENAI_API_KEY is required for openai embeddings".into())
        })?;
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| DraftError::InvalidInput(format!("failed to build http client: {err}")))?;
        Ok(Self {
            http,
            model: model.to_string(),
            api_key,
            base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            max_retries,
        })
    }

    pub fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let payload = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let response = match self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&payload)
                .send()
            {
                Ok(resp) => resp,
                Err(err) => {
                    if attempt > self.max_retries {
                        return Err(DraftError::TransientService(format!(
                            "openai embeddings request failed after {attempt} attempts: {err}"
                        )));
                    }
                    warn!(attempt, error = %err, "embedding request failed, retrying");
                    sleep(backoff_delay(attempt, None));
                    continue;
                }
            };
            let status = response.status();
            if is_retryable_status(status) {
                if attempt > self.max_retries {
                    return Err(DraftError::TransientService(format!(
                        "openai embeddings unavailable after {attempt} attempts (status {status})"
                    )));
                }
                let wait = backoff_delay(attempt, response.headers().get("retry-after"));
                warn!(attempt, %status, wait_secs = wait.as_secs(), "embedding request throttled");
                sleep(wait);
                continue;
            }
            if !status.is_success() {
                let body = response.text().unwrap_or_default();
                return Err(DraftError::InvalidInput(format!(
                    "openai embeddings rejected the request (status {status}): {body}"
                )));
            }
            let mut parsed: OpenAiEmbeddingResponse = response.json().map_err(|err| {
                DraftError::GenerationFailed(format!("failed to decode embeddings: {err}"))
            })?;
            parsed.data.sort_by_key(|data| data.index);
            return Ok(parsed.data.into_iter().map(|data| data.embedding).collect());
        }
    }
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}
