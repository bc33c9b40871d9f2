//! Error taxonomy for the retrieval-and-assembly pipeline.

use thiserror::Error;

/// Result type alias using the core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type.
///
/// Service-boundary variants carry a `context` string naming the chunk,
/// document batch, or query that failed, so callers can retry or log
/// without re-deriving it.
#[derive(Error, Debug)]
pub enum Error {
    /// Document text was empty after normalization. Never retried.
    #[error("Document {document_id} is empty after normalization")]
    EmptyDocument { document_id: String },

    /// The embedding service failed (after retries, if transient).
    #[error("Embedding service error ({context}): {message}")]
    EmbeddingService {
        context: String,
        message: String,
        transient: bool,
    },

    /// The generative model failed (after retries, if transient).
    #[error("Generation service error ({context}): {message}")]
    GenerationService {
        context: String,
        message: String,
        transient: bool,
    },

    /// The model output violated the insight schema after the repair attempt.
    #[error("Malformed model output: {}", violations.join("; "))]
    MalformedOutput {
        violations: Vec<String>,
        raw: String,
    },

    /// An index mutation was rejected; existing entries are untouched.
    #[error("Index consistency error: {0}")]
    IndexConsistency(String),

    /// Caller supplied an invalid argument or configuration value.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The query pipeline was cancelled before completing.
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Whether retrying the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::EmbeddingService { transient, .. } => *transient,
            Error::GenerationService { transient, .. } => *transient,
            _ => false,
        }
    }

    pub(crate) fn embedding(context: impl Into<String>, err: ServiceError) -> Self {
        Error::EmbeddingService {
            context: context.into(),
            message: err.message,
            transient: err.transient,
        }
    }

    pub(crate) fn generation(context: impl Into<String>, err: ServiceError) -> Self {
        Error::GenerationService {
            context: context.into(),
            message: err.message,
            transient: err.transient,
        }
    }
}

/// Failure reported by an external service implementation.
///
/// `transient` marks failures worth retrying (rate limits, 5xx,
/// timeouts, dropped connections).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ServiceError {
    pub message: String,
    pub transient: bool,
}

impl ServiceError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_display() {
        let err = Error::EmptyDocument {
            document_id: "t-1".to_string(),
        };
        assert_eq!(err.to_string(), "Document t-1 is empty after normalization");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_service_error_transience_carries_over() {
        let err = Error::embedding("chunk c1", ServiceError::transient("429 Too Many Requests"));
        assert!(err.is_transient());
        assert_eq!(
            err.to_string(),
            "Embedding service error (chunk c1): 429 Too Many Requests"
        );

        let err = Error::generation("query 'refund'", ServiceError::permanent("400 Bad Request"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_malformed_output_lists_violations() {
        let err = Error::MalformedOutput {
            violations: vec!["missing field `draft_reply`".into(), "bad sentiment".into()],
            raw: "{}".into(),
        };
        assert_eq!(
            err.to_string(),
            "Malformed model output: missing field `draft_reply`; bad sentiment"
        );
    }
}
