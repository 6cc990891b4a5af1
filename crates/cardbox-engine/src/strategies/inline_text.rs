//! Inline text-file cards as plain text content.
//!
//! For each card holding a text-file reference, fetch the bytes through
//! the file adapter and replace the card with inline text content. Fetch
//! or decode failures are per-card errors; the original card passes
//! through unchanged.

use async_trait::async_trait;
use cardbox_core::{CardBox, CardUpdate, Content, TextContent};
use cardbox_files::FileAdapter;
use cardbox_store::CardStore;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::EngineError;
use crate::strategy::{Strategy, TransformationResult};

/// Replaces `TextFileContent` cards with inline `TextContent`.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineTextFileStrategy;

impl InlineTextFileStrategy {
    /// Create the strategy.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Strategy for InlineTextFileStrategy {
    fn name(&self) -> &'static str {
        "InlineTextFileStrategy"
    }

    async fn apply(
        &self,
        cardbox: &CardBox,
        card_store: &CardStore,
        _input: Option<&Value>,
        files: &dyn FileAdapter,
    ) -> Result<TransformationResult, EngineError> {
        let mut result = TransformationResult::default();

        for card_id in cardbox.card_ids() {
            let Some(card) = card_store.get(card_id).await? else {
                result.fail_open(card_id, "card not found in card store");
                continue;
            };
            let Content::TextFile(meta) = card.content() else {
                result.pass_through(card_id);
                continue;
            };

            let text = match files.read(&meta.uri).await {
                Ok(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(e) => {
                        result.fail_open(card_id, format!("text file is not valid UTF-8: {e}"));
                        continue;
                    }
                },
                Err(e) => {
                    result.fail_open(card_id, e.to_string());
                    continue;
                }
            };

            let inlined = card.update(
                CardUpdate::content(Content::Text(TextContent { text }))
                    .with_meta("source_strategy", json!(self.name()))
                    .with_meta("source_card_id", json!(card.card_id())),
            )?;
            card_store.add(&inlined).await?;
            result.new_box.add(inlined.card_id());
            result.map_to(card.card_id(), vec![inlined.card_id().to_string()]);
            debug!(source = card.card_id(), inlined = inlined.card_id(), "text file inlined");
        }

        Ok(result)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
