//! # cardbox-llm
//!
//! The model-facing boundary of the cardbox engine:
//!
//! - **[`types`]**: both request wire shapes (turn-based messages and
//!   segment-grouped interaction turns) plus typed completion responses
//! - **[`completion::CompletionBackend`]**: the abstract completion
//!   contract — concrete provider adapters live outside this workspace
//! - **[`retry`]**: bounded exponential backoff for retryable transport
//!   failures
//! - **[`extraction::ExtractionClient`]**: point-to-point text-extraction
//!   collaborator used by the pdf-to-text strategy
//!
//! All failures here are typed: strategies degrade them to per-card
//! transformation errors, never raw panics into the pipeline.

#![deny(unsafe_code)]

pub mod completion;
pub mod error;
pub mod extraction;
pub mod retry;
pub mod types;

pub use completion::{BackendKind, CompletionBackend, CompletionRequest};
pub use error::{ExtractionError, LlmError};
pub use extraction::{ExtractionClient, ExtractionConfig, InlineObject};
pub use retry::{RetryConfig, retry_async};
pub use types::{
    ApiMessage, ApiRequest, Completion, CompletionChoice, CompletionMessage, CompletionOutput,
    ContentPart, FilePart, InteractionTurn, MediaInfo, MessageBody,
};
