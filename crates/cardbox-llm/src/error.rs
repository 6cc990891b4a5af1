//! Model-boundary errors.

use thiserror::Error;

/// Failures from a completion backend.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The request exceeded its deadline.
    #[error("completion timed out: {0}")]
    Timeout(String),

    /// The backend answered with an error status.
    #[error("completion failed with HTTP {status}: {message}")]
    Http {
        /// Response status code.
        status: u16,
        /// Response detail.
        message: String,
    },

    /// Connection-level failure.
    #[error("completion transport failed: {0}")]
    Transport(String),

    /// The backend answered with a shape this crate cannot interpret.
    #[error("malformed completion response: {0}")]
    MalformedResponse(String),
}

impl LlmError {
    /// Whether the caller may retry with backoff: timeouts, connection
    /// failures, and server-side (5xx) statuses. Client errors are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Timeout(_) | LlmError::Transport(_) => true,
            LlmError::Http { status, .. } => *status >= 500,
            LlmError::MalformedResponse(_) => false,
        }
    }
}

/// Failures from the text-extraction collaborator.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The request exceeded its deadline.
    #[error("extraction timed out: {0}")]
    Timeout(String),

    /// Connection-level failure.
    #[error("extraction transport failed: {0}")]
    Transport(String),

    /// The collaborator answered with an error status.
    #[error("extraction failed with HTTP {0}")]
    Status(u16),

    /// The response body was not valid JSON.
    #[error("extraction response was not valid JSON")]
    InvalidJson,

    /// The response carried no extracted text.
    #[error("extraction response contained no text")]
    EmptyResult,
}

impl ExtractionError {
    /// Whether the extraction call may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExtractionError::Timeout(_) | ExtractionError::Transport(_) => true,
            ExtractionError::Status(status) => *status >= 500,
            ExtractionError::InvalidJson | ExtractionError::EmptyResult => false,
        }
    }
}
