use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraderError {
    #[error("file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("unsupported file format: {extension:?}")]
    UnsupportedFormat { extension: String },

    #[error("unsupported LLM provider: {0}")]
    UnsupportedProvider(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid rubric weights: {0}")]
    InvalidRubric(String),

    #[error("{provider} API call failed: {message}")]
    Provider {
        provider: &'static str,
        message: String,
    },

    #[error("failed to parse model response: {0}")]
    ResponseParse(String),

    #[error("{backend} conversion failed: {message}")]
    Conversion {
        backend: &'static str,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GraderError {
    /// Wrap any transport or protocol failure from a backend.
    pub fn provider(provider: &'static str, cause: impl std::fmt::Display) -> Self {
        GraderError::Provider {
            provider,
            message: cause.to_string(),
        }
    }

    pub fn conversion(backend: &'static str, cause: impl std::fmt::Display) -> Self {
        GraderError::Conversion {
            backend,
            message: cause.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GraderError>;
