//! Point-to-point text-extraction client.
//!
//! Ships a card plus external pointer metadata (and optionally inlined
//! bytes) to the extraction collaborator and returns the extracted text.
//! Accepts the common response shapes `{"text": …}`, `{"content": …}`,
//! and `{"result": {"text" | "content": …}}`.

use std::time::Duration;

use cardbox_core::Card;
use cardbox_files::ObjectPointer;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::ExtractionError;
use crate::retry::{RetryConfig, retry_async};

/// Configuration for the extraction client.
#[derive(Clone, Debug)]
pub struct ExtractionConfig {
    /// Collaborator endpoint URL.
    pub base_url: String,
    /// Per-request deadline. Extraction of large documents is slow, so the
    /// default is generous.
    pub timeout: Duration,
    /// Retry policy for retryable transport failures.
    pub retry: RetryConfig,
}

impl ExtractionConfig {
    /// Configuration with default timeout (10 minutes) and retry policy.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(600),
            retry: RetryConfig::default(),
        }
    }
}

/// An inlined payload for collaborators that cannot fetch objects
/// themselves.
#[derive(Clone, Debug, Serialize)]
pub struct InlineObject {
    /// Source URI (or `inline://<card_id>` for card-embedded payloads).
    pub uri: String,
    /// Payload encoding, e.g. `base64`.
    pub encoding: String,
    /// Payload MIME type.
    pub mime_type: String,
    /// The encoded payload.
    pub content: String,
}

#[derive(Serialize)]
struct ExtractionPayload<'a> {
    card: &'a Card,
    external_objects: &'a [ObjectPointer],
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_objects: Option<&'a [InlineObject]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a Value>,
}

/// HTTP client for the text-extraction collaborator.
#[derive(Clone, Debug)]
pub struct ExtractionClient {
    http: reqwest::Client,
    config: ExtractionConfig,
}

impl ExtractionClient {
    /// Build a client from configuration.
    pub fn new(config: ExtractionConfig) -> Result<Self, ExtractionError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ExtractionError::Transport(e.to_string()))?;
        Ok(Self { http, config })
    }

    /// Send a card with pointer metadata and return the extracted text.
    ///
    /// Retries retryable failures per the configured policy; a response
    /// with no usable text is [`ExtractionError::EmptyResult`].
    #[instrument(skip_all, fields(card_id = card.card_id()))]
    pub async fn extract_text(
        &self,
        card: &Card,
        pointers: &[ObjectPointer],
        inline_objects: &[InlineObject],
        metadata: Option<&Value>,
    ) -> Result<String, ExtractionError> {
        let payload = ExtractionPayload {
            card,
            external_objects: pointers,
            inline_objects: (!inline_objects.is_empty()).then_some(inline_objects),
            metadata,
        };

        let body = retry_async(&self.config.retry, ExtractionError::is_retryable, || {
            self.post(&payload)
        })
        .await?;

        let text = extract_text_field(&body).ok_or(ExtractionError::EmptyResult)?;
        debug!(chars = text.len(), "extraction completed");
        Ok(text)
    }

    async fn post(&self, payload: &ExtractionPayload<'_>) -> Result<Value, ExtractionError> {
        let response = self
            .http
            .post(&self.config.base_url)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExtractionError::Timeout(e.to_string())
                } else {
                    ExtractionError::Transport(e.to_string())
                }
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExtractionError::Status(status.as_u16()));
        }
        response
            .json::<Value>()
            .await
            .map_err(|_| ExtractionError::InvalidJson)
    }
}

/// Pull the extracted text out of the common response shapes.
fn extract_text_field(body: &Value) -> Option<String> {
    let direct = body
        .get("text")
        .or_else(|| body.get("content"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty());
    if let Some(text) = direct {
        return Some(text.to_string());
    }
    body.get("result")
        .and_then(|result| result.get("text").or_else(|| result.get("content")))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
