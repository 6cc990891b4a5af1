//! Content validation errors.

use thiserror::Error;

/// Raised when card content violates a structural or storage constraint.
///
/// Construction, deserialization, and storage writes all funnel through the
/// same validation, so a `ContentError` always means the payload itself is
/// unacceptable — nothing is partially applied.
#[derive(Debug, Error)]
pub enum ContentError {
    /// URI scheme is not in the configured allow-list.
    #[error("unsupported URI scheme '{scheme}' (allowed: {allowed})")]
    UnsupportedScheme {
        /// The offending scheme.
        scheme: String,
        /// Comma-joined allowed schemes.
        allowed: String,
    },

    /// URI is malformed or missing required components.
    #[error("invalid external URI {uri:?}: {reason}")]
    InvalidUri {
        /// The offending URI.
        uri: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A field violates a content invariant.
    #[error("invalid content: {0}")]
    Invalid(String),
}

impl ContentError {
    /// Shorthand for an [`ContentError::Invalid`] with a formatted message.
    pub fn invalid(message: impl Into<String>) -> Self {
        ContentError::Invalid(message.into())
    }
}
