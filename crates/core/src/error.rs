use thiserror::Error;

#[derive(Error, Debug)]
pub enum DraftError {
    #[error("service temporarily unavailable: {0}")]
    TransientService(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("generation failed: {0}")]
    GenerationFailed(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("unknown section {section:?} in session {session:?}")]
    UnknownSection { session: String, section: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

impl DraftError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientService(_))
    }
}

pub type Result<T> = std::result::Result<T, DraftError>;
