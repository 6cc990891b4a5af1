//! The abstract completion contract.
//!
//! Concrete provider adapters live outside this workspace; the engine only
//! needs the request/response shapes and a backend-kind discriminator so
//! projection knows which shape to populate.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::LlmError;
use crate::types::{ApiMessage, Completion, InteractionTurn};

/// Which request shape a backend consumes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendKind {
    /// Turn-based `messages` (the default shape).
    #[default]
    Turns,
    /// Segment-grouped `interaction_input`.
    Interactions,
}

/// One completion request.
#[derive(Clone, Debug, Default)]
pub struct CompletionRequest {
    /// Model identifier.
    pub model: String,
    /// Turn-based messages.
    pub messages: Vec<ApiMessage>,
    /// Tool definitions, if any.
    pub tools: Vec<Value>,
    /// Segment-grouped turns, for interactions backends.
    pub interaction_input: Option<Vec<InteractionTurn>>,
    /// Structured-output schema, when the caller wants one enforced.
    pub response_schema: Option<Value>,
    /// Provider-specific options passed through verbatim.
    pub extra: Map<String, Value>,
}

/// A model completion provider.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// The request shape this backend consumes.
    fn backend_kind(&self) -> BackendKind {
        BackendKind::Turns
    }

    /// Execute one completion request.
    ///
    /// Implementations apply their own caller-configured timeout and
    /// surface every failure as a typed [`LlmError`].
    async fn get_completion(&self, request: CompletionRequest) -> Result<Completion, LlmError>;
}
