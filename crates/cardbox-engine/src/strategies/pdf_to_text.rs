//! Convert PDF cards to text through the extraction collaborator.
//!
//! Handles two card shapes: `PdfFileContent` references (bytes fetched
//! through an injected [`ObjectReader`]) and text cards carrying an inline
//! base64 PDF payload (`metadata.mime_type == "application/pdf"`,
//! `metadata.encoding == "base64"`). Every failure — missing reader,
//! fetch, decode, transport, empty result — is a per-card error and the
//! original card passes through unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use cardbox_core::{Card, CardBox, CardUpdate, Content, TextContent};
use cardbox_files::{FileAdapter, ObjectPointer, ObjectReader};
use cardbox_llm::{ExtractionClient, InlineObject};
use cardbox_store::CardStore;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::EngineError;
use crate::strategy::{Strategy, TransformationResult};

/// Optional parameters for [`PdfToTextStrategy`].
#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct PdfToTextInput {
    /// Cap on extracted tokens, forwarded to the collaborator.
    pub max_tokens: Option<i64>,
}

/// Sends PDF cards to the extraction collaborator and replaces them with
/// extracted text cards.
pub struct PdfToTextStrategy {
    client: ExtractionClient,
    object_reader: Option<Arc<dyn ObjectReader>>,
}

impl PdfToTextStrategy {
    /// Create the strategy. Without an object reader it can only process
    /// inline base64 payloads.
    pub fn new(client: ExtractionClient) -> Self {
        Self {
            client,
            object_reader: None,
        }
    }

    /// Attach an object reader for `PdfFileContent` cards.
    pub fn with_object_reader(mut self, reader: Arc<dyn ObjectReader>) -> Self {
        self.object_reader = Some(reader);
        self
    }

    fn is_pdf_card(card: &Card) -> bool {
        match card.content() {
            Content::Pdf(_) => true,
            Content::Text(_) => {
                card.meta_str("mime_type") == Some("application/pdf")
                    && card.meta_str("encoding") == Some("base64")
            }
            _ => false,
        }
    }

    /// Run extraction for one PDF card. Every failure comes back as a
    /// message so the caller can degrade it to a per-card error.
    async fn extract(&self, card: &Card, input: Option<PdfToTextInput>) -> Result<String, String> {
        let mut pointers: Vec<ObjectPointer> = Vec::new();
        let mut inline_objects: Vec<InlineObject> = Vec::new();

        match card.content() {
            Content::Pdf(pdf) => {
                let Some(reader) = &self.object_reader else {
                    return Err(
                        "an object reader is required to process PDF file content".to_string()
                    );
                };
                let meta = &pdf.meta;
                let mut pointer = ObjectPointer::new(&meta.uri, &meta.checksum);
                pointer.content_type = meta.content_type.clone();
                pointer.size = meta.size;
                pointer.etag = meta.etag.clone();
                pointer.expires_at = meta.expires_at;

                let bytes = reader
                    .read_bytes(&meta.uri, None)
                    .await
                    .map_err(|e| e.to_string())?;
                inline_objects.push(InlineObject {
                    uri: meta.uri.clone(),
                    encoding: "base64".to_string(),
                    mime_type: meta
                        .content_type
                        .clone()
                        .or_else(|| card.meta_str("mime_type").map(ToString::to_string))
                        .unwrap_or_else(|| "application/pdf".to_string()),
                    content: BASE64.encode(&bytes),
                });
                pointers.push(pointer);
            }
            _ => {
                let raw = card.text();
                // The payload must already be valid base64.
                let _ = BASE64
                    .decode(raw.trim())
                    .map_err(|e| format!("inline payload is not valid base64: {e}"))?;
                inline_objects.push(InlineObject {
                    uri: format!("inline://{}", card.card_id()),
                    encoding: "base64".to_string(),
                    mime_type: card
                        .meta_str("mime_type")
                        .unwrap_or("application/pdf")
                        .to_string(),
                    content: raw,
                });
            }
        }

        let mut metadata = json!({"source_card_id": card.card_id()});
        if let Some(max_tokens) = input.and_then(|i| i.max_tokens) {
            metadata["max_tokens"] = json!(max_tokens);
        }

        let text = self
            .client
            .extract_text(card, &pointers, &inline_objects, Some(&metadata))
            .await
            .map_err(|e| e.to_string())?;
        Ok(text)
    }
}

#[async_trait]
impl Strategy for PdfToTextStrategy {
    fn name(&self) -> &'static str {
        "PdfToTextStrategy"
    }

    async fn apply(
        &self,
        cardbox: &CardBox,
        card_store: &CardStore,
        input: Option<&Value>,
        _files: &dyn FileAdapter,
    ) -> Result<TransformationResult, EngineError> {
        let mut result = TransformationResult::default();
        let input: Option<PdfToTextInput> = input
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok());

        for card_id in cardbox.card_ids() {
            let Some(card) = card_store.get(card_id).await? else {
                result.fail_open(card_id, "card not found in card store");
                continue;
            };
            if !Self::is_pdf_card(&card) {
                result.pass_through(card_id);
                continue;
            }

            match self.extract(&card, input).await {
                Ok(text) => {
                    let text_card = card.update(
                        CardUpdate::content(Content::Text(TextContent { text }))
                            .with_meta("mime_type", json!("text/plain"))
                            .with_meta("source_strategy", json!(self.name()))
                            .with_meta("source_card_id", json!(card.card_id())),
                    )?;
                    card_store.add(&text_card).await?;
                    result.new_box.add(text_card.card_id());
                    result.map_to(card.card_id(), vec![text_card.card_id().to_string()]);
                    debug!(source = card.card_id(), derived = text_card.card_id(), "pdf extracted");
                }
                Err(message) => {
                    result.fail_open(card_id, format!("PDF extraction failed: {message}"));
                }
            }
        }

        Ok(result)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use cardbox_core::{FileMeta, PdfFile};
    use cardbox_files::{ByteStream, InMemoryFileAdapter, ObjectError};
    use cardbox_llm::ExtractionConfig;
    use cardbox_llm::RetryConfig;
    use cardbox_store::MemoryStorageAdapter;
    use std::collections::HashMap;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Object reader over a fixed uri → bytes map.
    struct FixtureReader {
        objects: HashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl ObjectReader for FixtureReader {
        async fn read_bytes(
            &self,
            uri: &str,
            _range: Option<(u64, u64)>,
        ) -> Result<Vec<u8>, ObjectError> {
            self.objects
                .get(uri)
                .cloned()
                .ok_or_else(|| ObjectError::NotFound(uri.to_string()))
        }

        async fn open_stream(&self, uri: &str) -> Result<ByteStream, ObjectError> {
            Err(ObjectError::Transport(format!("no stream for {uri}")))
        }
    }

    fn store() -> CardStore {
        CardStore::new(Arc::new(MemoryStorageAdapter::new()), "tenant-test")
    }

    fn client(base_url: String) -> ExtractionClient {
        ExtractionClient::new(ExtractionConfig {
            base_url,
            timeout: Duration::from_secs(2),
            retry: RetryConfig {
                max_attempts: 1,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
        })
        .unwrap()
    }

    fn pdf_card() -> Card {
        let mut meta = FileMeta::new("s3://bucket/doc.pdf", "sha256:doc");
        meta.content_type = Some("application/pdf".to_string());
        Card::new(Content::Pdf(PdfFile {
            meta,
            page_count: Some(2),
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn file_card_is_fetched_inlined_and_replaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "external_objects": [{"uri": "s3://bucket/doc.pdf"}],
                "inline_objects": [{"uri": "s3://bucket/doc.pdf", "encoding": "base64"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "page text"})))
            .mount(&server)
            .await;

        let store = store();
        let source = pdf_card();
        store.add(&source).await.unwrap();
        let mut cardbox = CardBox::new();
        cardbox.add(source.card_id());

        let reader = FixtureReader {
            objects: HashMap::from([("s3://bucket/doc.pdf".to_string(), b"%PDF-1.7".to_vec())]),
        };
        let strategy =
            PdfToTextStrategy::new(client(server.uri())).with_object_reader(Arc::new(reader));

        let result = strategy
            .apply(&cardbox, &store, None, &InMemoryFileAdapter::default())
            .await
            .unwrap();

        assert!(result.errors.is_empty());
        let derived = &result.relationship_map[source.card_id()];
        let text_card = store.get(&derived[0]).await.unwrap().unwrap();
        assert_eq!(text_card.text(), "page text");
        assert_eq!(text_card.meta_str("mime_type"), Some("text/plain"));
        assert_eq!(text_card.meta_str("source_strategy"), Some("PdfToTextStrategy"));
    }

    #[tokio::test]
    async fn inline_base64_card_is_shipped_without_reader() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "inline text"})))
            .mount(&server)
            .await;

        let store = store();
        let source = Card::new(Content::Text(TextContent {
            text: BASE64.encode(b"%PDF-1.7 inline"),
        }))
        .unwrap()
        .with_meta("mime_type", json!("application/pdf"))
        .with_meta("encoding", json!("base64"));
        store.add(&source).await.unwrap();
        let mut cardbox = CardBox::new();
        cardbox.add(source.card_id());

        let strategy = PdfToTextStrategy::new(client(server.uri()));
        let result = strategy
            .apply(&cardbox, &store, Some(&json!({"max_tokens": 64})), &InMemoryFileAdapter::default())
            .await
            .unwrap();

        assert!(result.errors.is_empty());
        assert_eq!(result.relationship_map[source.card_id()].len(), 1);
    }

    #[tokio::test]
    async fn missing_reader_and_transport_failures_fail_open() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let store = store();
        let file_card = pdf_card();
        store.add(&file_card).await.unwrap();
        let inline_card = Card::new(Content::Text(TextContent {
            text: BASE64.encode(b"%PDF"),
        }))
        .unwrap()
        .with_meta("mime_type", json!("application/pdf"))
        .with_meta("encoding", json!("base64"));
        store.add(&inline_card).await.unwrap();

        let mut cardbox = CardBox::new();
        cardbox.add(file_card.card_id());
        cardbox.add(inline_card.card_id());

        // No object reader: the file card fails; the inline card reaches
        // the collaborator and fails on 503. Both ride along unchanged.
        let strategy = PdfToTextStrategy::new(client(server.uri()));
        let result = strategy
            .apply(&cardbox, &store, None, &InMemoryFileAdapter::default())
            .await
            .unwrap();

        assert_eq!(result.errors.len(), 2);
        assert!(result.errors[0].message.contains("object reader"));
        assert!(result.errors[1].message.contains("PDF extraction failed"));
        assert_eq!(
            result.new_box.card_ids(),
            [file_card.card_id(), inline_card.card_id()]
        );
        assert!(result.relationship_map.is_empty());
    }

    #[tokio::test]
    async fn non_pdf_cards_pass_through() {
        let server = MockServer::start().await;
        let store = store();
        let plain = Card::new(Content::Text(TextContent {
            text: "just text".to_string(),
        }))
        .unwrap();
        store.add(&plain).await.unwrap();
        let mut cardbox = CardBox::new();
        cardbox.add(plain.card_id());

        let strategy = PdfToTextStrategy::new(client(server.uri()));
        let result = strategy
            .apply(&cardbox, &store, None, &InMemoryFileAdapter::default())
            .await
            .unwrap();

        assert_eq!(
            result.relationship_map[plain.card_id()],
            vec![plain.card_id().to_string()]
        );
    }
}
