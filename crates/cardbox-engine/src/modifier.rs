//! Post-projection request modifiers.
//!
//! A modifier receives the assembled request after projection and returns
//! a replacement — the sole caller-side customization point of
//! [`crate::ContextEngine::to_api`]. It runs after every card has been
//! projected and before the request is returned.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use cardbox_files::FileAdapter;
use cardbox_llm::{ApiRequest, ContentPart, FilePart, MessageBody};
use tracing::{debug, warn};

use crate::error::EngineError;

/// Rewrites an assembled request before it is returned to the caller.
#[async_trait]
pub trait RequestModifier: Send + Sync {
    /// Produce the replacement request.
    async fn modify(&self, request: ApiRequest) -> Result<ApiRequest, EngineError>;
}

/// Replaces remote file-reference parts with inline base64 data URLs.
///
/// Only `s3://` and `http(s)` references are fetched; a fetch failure
/// keeps the original URI part — an unreadable file never rejects the
/// request.
pub struct InlineFileDataModifier {
    files: Arc<dyn FileAdapter>,
}

impl InlineFileDataModifier {
    /// Create the modifier over a byte-fetch capability.
    pub fn new(files: Arc<dyn FileAdapter>) -> Self {
        Self { files }
    }

    fn is_fetchable(uri: &str) -> bool {
        uri.starts_with("s3://") || uri.starts_with("http")
    }
}

#[async_trait]
impl RequestModifier for InlineFileDataModifier {
    async fn modify(&self, mut request: ApiRequest) -> Result<ApiRequest, EngineError> {
        for message in &mut request.messages {
            let MessageBody::Parts(parts) = &mut message.content else {
                continue;
            };
            for part in parts {
                let ContentPart::File { file } = part else {
                    continue;
                };
                let Some(uri) = file.file_id.clone() else {
                    continue;
                };
                if !Self::is_fetchable(&uri) {
                    continue;
                }
                match self.files.read(&uri).await {
                    Ok(bytes) => {
                        let format = file
                            .format
                            .clone()
                            .unwrap_or_else(|| "application/octet-stream".to_string());
                        let data_url = format!("data:{format};base64,{}", BASE64.encode(&bytes));
                        debug!(%uri, bytes = bytes.len(), "file reference inlined");
                        *file = FilePart {
                            file_id: None,
                            format: None,
                            file_data: Some(data_url),
                        };
                    }
                    Err(error) => {
                        warn!(%uri, %error, "file inline failed, keeping uri");
                    }
                }
            }
        }
        Ok(request)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
