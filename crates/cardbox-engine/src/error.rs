//! Engine errors.

use cardbox_core::ContentError;
use cardbox_llm::LlmError;
use cardbox_store::StoreError;
use thiserror::Error;

/// Failures that abort an engine call.
///
/// Per-card transformation failures never appear here — strategies report
/// them inside [`crate::TransformationResult`] and the pipeline continues.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Content validation failure while building cards.
    #[error(transparent)]
    Content(#[from] ContentError),

    /// Completion backend failure.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// JSON (de)serialization failure.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}
