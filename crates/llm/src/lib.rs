mod local;

use std::env;

use reqwest::{header::HeaderValue, Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::runtime::Runtime;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

pub use local::{SOURCES_END, SOURCES_START};

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("{provider} unavailable after {attempts} attempts: {reason}")]
    Transient {
        provider: &'static str,
        attempts: usize,
        reason: String,
    },
    #[error("{provider} rejected the request (status {status}): {body}")]
    Rejected {
        provider: &'static str,
        status: u16,
        body: String,
    },
    #[error("{0} returned no text")]
    EmptyResponse(&'static str),
    #[error("failed to decode {provider} response: {reason}")]
    Decode {
        provider: &'static str,
        reason: String,
    },
    #[error("{0} is not set")]
    MissingApiKey(String),
    #[error("invalid api key: {0}")]
    InvalidApiKey(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl LlmError {
    /// Timeouts, rate limits and 5xx responses that outlived the retry budget.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Local,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::Local => "local",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "openai" => Some(LlmProvider::OpenAi),
            "anthropic" => Some(LlmProvider::Anthropic),
            "local" => Some(LlmProvider::Local),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for LlmRequest {
    fn default() -> Self {
        Self {
            system: None,
            user: String::new(),
            temperature: 0.7,
            max_tokens: 600,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl LlmResponse {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// Anything that can turn a prompt into text with a single blocking call.
pub trait TextGenerator: Send + Sync {
    fn model_name(&self) -> &str;

    fn generate(&self, request: &LlmRequest) -> Result<LlmResponse>;
}

#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    /// Retries after the first attempt, for transient failures only.
    pub max_retries: usize,
    pub timeout_secs: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout_secs: 60,
        }
    }
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    provider: LlmProvider,
    model: String,
    options: ClientOptions,
    config: ProviderConfig,
}

#[derive(Clone)]
enum ProviderConfig {
    OpenAi(OpenAiConfig),
    Anthropic(AnthropicConfig),
    Local,
}

#[derive(Clone)]
struct OpenAiConfig {
    api_key: String,
    base_url: String,
}

#[derive(Clone)]
struct AnthropicConfig {
    api_key: String,
}

impl LlmClient {
    pub fn new(provider: LlmProvider, model: impl Into<String>) -> Result<Self> {
        Self::with_options(provider, model, ClientOptions::default())
    }

    pub fn with_options(
        provider: LlmProvider,
        model: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self> {
        let model = model.into();
        let http = Client::builder()
            .timeout(Duration::from_secs(options.timeout_secs.max(1)))
            .build()
            .map_err(|err| LlmError::Runtime(format!("failed to build http client: {err}")))?;
        let config = match provider {
            LlmProvider::OpenAi => ProviderConfig::OpenAi(OpenAiConfig {
                api_key: read_api_key("OPENAI_API_KEY")?,
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            }),
            LlmProvider::Anthropic => ProviderConfig::Anthropic(AnthropicConfig {
                api_key: read_api_key("ANTHROPIC_API_KEY")?,
            }),
            LlmProvider::Local => ProviderConfig::Local,
        };
        Ok(Self {
            http,
            provider,
            model,
            options,
            config,
        })
    }

    /// Offline drafting client; never touches the network.
    pub fn local() -> Self {
        Self {
            http: Client::new(),
            provider: LlmProvider::Local,
            model: "local".to_string(),
            options: ClientOptions::default(),
            config: ProviderConfig::Local,
        }
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn chat(&self, req: &LlmRequest) -> Result<LlmResponse> {
        match &self.config {
            ProviderConfig::OpenAi(cfg) => self.chat_openai(cfg, req).await,
            ProviderConfig::Anthropic(cfg) => self.chat_anthropic(cfg, req).await,
            ProviderConfig::Local => Ok(local::draft(req)),
        }
    }

    pub fn chat_blocking(&self, req: &LlmRequest) -> Result<LlmResponse> {
        let rt = Runtime::new()
            .map_err(|err| LlmError::Runtime(format!("failed to create tokio runtime: {err}")))?;
        rt.block_on(self.chat(req))
    }

    async fn chat_openai(&self, cfg: &OpenAiConfig, req: &LlmRequest) -> Result<LlmResponse> {
        const PROVIDER: &str = "openai";
        let url = format!("{}/chat/completions", cfg.base_url.trim_end_matches('/'));
        let mut messages = Vec::new();
        if let Some(system) = &req.system {
            messages.push(json!({"role": "system", "content": system }));
        }
        messages.push(json!({"role": "user", "content": req.user }));
        let payload = json!({
            "model": self.model,
            "messages": messages,
            "temperature": req.temperature,
            "max_tokens": req.max_tokens,
        });
        let value = self
            .send_with_retry(PROVIDER, |http| {
                http.post(&url).bearer_auth(&cfg.api_key).json(&payload)
            })
            .await?;
        let content = extract_openai_text(&value).ok_or(LlmError::EmptyResponse(PROVIDER))?;
        let usage: OpenAiUsage = value
            .get("usage")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default();
        Ok(LlmResponse {
            content,
            prompt_tokens: usage.prompt_tokens.unwrap_or(0),
            completion_tokens: usage.completion_tokens.unwrap_or(0),
        })
    }

    async fn chat_anthropic(&self, cfg: &AnthropicConfig, req: &LlmRequest) -> Result<LlmResponse> {
        const PROVIDER: &str = "anthropic";
        let mut payload = json!({
            "model": self.model,
            "max_tokens": req.max_tokens,
            "temperature": req.temperature,
            "messages": [ { "role": "user", "content": req.user } ],
        });
        if let Some(system) = &req.system {
            payload["system"] = json!(system);
        }
        let value = self
            .send_with_retry(PROVIDER, |http| {
                http.post("https://api.anthropic.com/v1/messages")
                    .header("x-api-key", &cfg.api_key)
                    .header("anthropic-version", "2023-06-01")
                    .json(&payload)
            })
            .await?;
        let response: AnthropicResponse =
            serde_json::from_value(value).map_err(|err| LlmError::Decode {
                provider: PROVIDER,
                reason: err.to_string(),
            })?;
        let text = response
            .content
            .into_iter()
            .find_map(|part| part.text)
            .ok_or(LlmError::EmptyResponse(PROVIDER))?;
        let usage = response.usage.unwrap_or_default();
        Ok(LlmResponse {
            content: text,
            prompt_tokens: usage.input_tokens.unwrap_or(0),
            completion_tokens: usage.output_tokens.unwrap_or(0),
        })
    }

    /// Sends the request, retrying transport failures, 429 and 5xx responses
    /// up to `max_retries` times. Any other non-success status is final.
    async fn send_with_retry<F>(&self, provider: &'static str, build: F) -> Result<Value>
    where
        F: Fn(&Client) -> reqwest::RequestBuilder,
    {
        let max_retries = self.options.max_retries;
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let response = match build(&self.http).send().await {
                Ok(resp) => resp,
                Err(err) => {
                    if attempt > max_retries {
                        return Err(LlmError::Transient {
                            provider,
                            attempts: attempt,
                            reason: err.to_string(),
                        });
                    }
                    warn!(provider, attempt, error = %err, "request failed, retrying");
                    sleep(backoff_delay(attempt, None)).await;
                    continue;
                }
            };
            let status = response.status();
            if is_retryable_status(status) {
                if attempt > max_retries {
                    return Err(LlmError::Transient {
                        provider,
                        attempts: attempt,
                        reason: format!("status {status}"),
                    });
                }
                let wait = backoff_delay(attempt, response.headers().get("retry-after"));
                warn!(provider, attempt, %status, wait_secs = wait.as_secs(), "retrying");
                sleep(wait).await;
                continue;
            }
            let body = response.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(LlmError::Rejected {
                    provider,
                    status: status.as_u16(),
                    body,
                });
            }
            debug!(provider, attempt, bytes = body.len(), "response received");
            return serde_json::from_str(&body).map_err(|err| LlmError::Decode {
                provider,
                reason: err.to_string(),
            });
        }
    }
}

impl TextGenerator for LlmClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn generate(&self, request: &LlmRequest) -> Result<LlmResponse> {
        match self.config {
            ProviderConfig::Local => Ok(local::draft(request)),
            _ => self.chat_blocking(request),
        }
    }
}

pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

pub fn backoff_delay(attempt: usize, retry_after: Option<&HeaderValue>) -> Duration {
    if let Some(value) = retry_after {
        if let Ok(text) = value.to_str() {
            if let Ok(secs) = text.trim().parse::<u64>() {
                return Duration::from_secs(secs.max(1));
            }
        }
    }
    let capped = attempt.min(6) as u32;
    Duration::from_secs(1u64 << capped)
}

fn read_api_key(var: &str) -> Result<String> {
    let value = env::var(var).map_err(|_| LlmError::MissingApiKey(var.to_string()))?;
    validate_api_key(var, &value)?;
    Ok(value)
}

fn validate_api_key(var: &str, value: &str) -> Result<()> {
    if var.contains("OPENAI") && !value.starts_with("sk-") {
        return Err(LlmError::InvalidApiKey(format!(
            "{var} must start with 'sk-'"
        )));
    }
    if var.contains("ANTHROPIC") && !value.starts_with("sk-ant-") {
        return Err(LlmError::InvalidApiKey(format!(
            "{var} must start with 'sk-ant-'"
        )));
    }
    Ok(())
}

fn extract_openai_text(value: &Value) -> Option<String> {
    let choice = value.get("choices")?.as_array()?.first()?;
    if let Some(text) = choice.get("text").and_then(|t| t.as_str()) {
        return Some(text.to_string());
    }
    let content = choice.get("message")?.get("content")?;
    if let Some(text) = content.as_str() {
        return Some(text.to_string());
    }
    content
        .as_array()?
        .iter()
        .find_map(|part| part.get("text").and_then(|t| t.as_str()))
        .map(str::to_string)
}

#[derive(Default, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[derive(Default, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}
