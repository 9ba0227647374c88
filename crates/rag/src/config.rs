use std::env;
use std::fs;
use std::path::Path;

use grantdraft_core::{ChunkConfig, DraftError, Result};
use grantdraft_llm::{ClientOptions, LlmProvider};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_CONFIG_FILE: &str = "grantdraft.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub chunking: ChunkConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Candidates scoring below this relevance are dropped.
    pub min_relevance: f32,
    pub snippet_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_relevance: 0.25,
            snippet_chars: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    Hash,
    #[serde(rename = "openai")]
    OpenAi,
}

impl EmbeddingProvider {
    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "hash" => Some(Self::Hash),
            "openai" => Some(Self::OpenAi),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: String,
    /// Vector width of the hash backend; remote models fix their own.
    pub dimensions: usize,
    pub batch_size: usize,
    pub max_retries: usize,
    pub max_input_tokens: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hash,
            model: "text-embedding-3-small".to_string(),
            dimensions: 64,
            batch_size: 96,
            max_retries: 3,
            max_input_tokens: 8191,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_retries: usize,
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 600,
            max_retries: 3,
            timeout_secs: 60,
        }
    }
}

impl GenerationConfig {
    pub fn llm_provider(&self) -> Result<LlmProvider> {
        LlmProvider::from_str(&self.provider).ok_or_else(|| {
            DraftError::InvalidInput(format!(
                "unknown generation provider {:?} (expected openai, anthropic or local)",
                self.provider
            ))
        })
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            max_retries: self.max_retries,
            timeout_secs: self.timeout_secs,
        }
    }
}

impl EngineConfig {
    /// Reads a TOML file; a missing file yields the defaults. Environment
    /// overrides are applied on top either way.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = fs::read_to_string(path)?;
            Self::from_toml(&raw)?
        } else {
            debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|err| DraftError::InvalidInput(format!("failed to parse config: {err}")))
    }

    /// Applies `GRANTDRAFT_*` overrides through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("GRANTDRAFT_TOP_K") {
            self.retrieval.top_k = parse_override("GRANTDRAFT_TOP_K", &value)?;
        }
        if let Some(value) = lookup("GRANTDRAFT_MIN_RELEVANCE") {
            self.retrieval.min_relevance = parse_override("GRANTDRAFT_MIN_RELEVANCE", &value)?;
        }
        if let Some(value) = lookup("GRANTDRAFT_EMBEDDING_PROVIDER") {
            self.embedding.provider = EmbeddingProvider::from_str(&value).ok_or_else(|| {
                DraftError::InvalidInput(format!(
                    "GRANTDRAFT_EMBEDDING_PROVIDER must be hash or openai, got {value:?}"
                ))
            })?;
        }
        if let Some(value) = lookup("GRANTDRAFT_PROVIDER") {
            self.generation.provider = value;
        }
        if let Some(value) = lookup("GRANTDRAFT_MODEL") {
            self.generation.model = value;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        if self.retrieval.top_k == 0 {
            return Err(DraftError::InvalidInput(
                "retrieval top_k must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retrieval.min_relevance) {
            return Err(DraftError::InvalidInput(format!(
                "retrieval min_relevance must lie in [0, 1], got {}",
                self.retrieval.min_relevance
            )));
        }
        if self.embedding.batch_size == 0 || self.embedding.dimensions == 0 {
            return Err(DraftError::InvalidInput(
                "embedding batch_size and dimensions must be positive".to_string(),
            ));
        }
        self.generation.llm_provider()?;
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| DraftError::InvalidInput(format!("{key} has an invalid value {value:?}")))
}
