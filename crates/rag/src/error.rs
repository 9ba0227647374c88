//! Translation of collaborator failures into the engine's error taxonomy.

use grantdraft_core::DraftError;
use grantdraft_index::IndexError;
use grantdraft_llm::LlmError;

pub fn from_index(err: IndexError) -> DraftError {
    match err {
        IndexError::DimensionMismatch { .. } | IndexError::EmptyEmbedding(_) => {
            DraftError::InvalidInput(err.to_string())
        }
        IndexError::Io(io) => DraftError::Io(io),
        IndexError::SerdeJson(json) => DraftError::SerdeJson(json),
    }
}

pub fn from_llm(err: LlmError) -> DraftError {
    match err {
        LlmError::Transient { .. } => DraftError::TransientService(err.to_string()),
        LlmError::MissingApiKey(_) | LlmError::InvalidApiKey(_) => {
            DraftError::InvalidInput(err.to_string())
        }
        LlmError::Rejected { .. }
        | LlmError::EmptyResponse(_)
        | LlmError::Decode { .. }
        | LlmError::Runtime(_) => DraftError::GenerationFailed(err.to_string()),
    }
}
