pub mod citations;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod retriever;
pub mod section;
pub mod store;
pub mod synthesizer;

pub use citations::{resolve_citations, Resolution};
pub use config::{
    EmbeddingConfig, EmbeddingProvider, EngineConfig, GenerationConfig, RetrievalConfig,
    DEFAULT_CONFIG_FILE,
};
pub use embedding::{Embedder, EmbeddingBackend, EmbeddingClient};
pub use engine::DraftEngine;
pub use retriever::{build_query, rank_candidates, relevance_from_distance, CitationCandidate, Retriever};
pub use section::{
    length_warning, GeneratedSection, LimitStatus, DEFAULT_LIMIT_THRESHOLD_PERCENT,
};
pub use store::SectionStore;
pub use synthesizer::{build_prompt, GenerationSettings, SectionConstraints, Synthesizer};
pub use grantdraft_core::{DraftError, PageText, ParagraphLocks};
pub use grantdraft_index::{MemoryIndex, VectorIndex};
pub use grantdraft_llm::{LlmClient, LlmProvider, LlmRequest, LlmResponse, TextGenerator};
