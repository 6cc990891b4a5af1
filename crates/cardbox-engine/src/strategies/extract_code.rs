//! Extract fenced python code blocks out of text cards.
//!
//! Each text card with at least one block splits into an optional
//! remaining-text card plus one code card per block, every new card
//! linking back through `metadata.source_card_id`. Cards with no blocks
//! (or non-text content) pass through unchanged.

use std::sync::LazyLock;

use async_trait::async_trait;
use cardbox_core::{Card, CardBox, CardUpdate, Content, TextContent};
use cardbox_files::FileAdapter;
use cardbox_store::CardStore;
use regex::Regex;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::EngineError;
use crate::strategy::{Strategy, TransformationResult};

static CODE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```python\n(.*?)\n```").expect("code block pattern is valid")
});

/// Splits fenced ```python blocks out of text cards.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExtractCodeStrategy;

impl ExtractCodeStrategy {
    /// Create the strategy.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Strategy for ExtractCodeStrategy {
    fn name(&self) -> &'static str {
        "ExtractCodeStrategy"
    }

    async fn apply(
        &self,
        cardbox: &CardBox,
        card_store: &CardStore,
        _input: Option<&Value>,
        _files: &dyn FileAdapter,
    ) -> Result<TransformationResult, EngineError> {
        let mut result = TransformationResult::default();

        for card_id in cardbox.card_ids() {
            let Some(card) = card_store.get(card_id).await? else {
                result.fail_open(card_id, "card not found in card store");
                continue;
            };
            if !matches!(card.content(), Content::Text(_)) {
                result.pass_through(card_id);
                continue;
            }

            let content = card.text();
            let blocks: Vec<&str> = CODE_BLOCK
                .captures_iter(&content)
                .map(|captures| captures.extract::<1>().1[0])
                .collect();
            if blocks.is_empty() {
                result.pass_through(card_id);
                continue;
            }

            let mut derived: Vec<String> = Vec::new();
            let remaining = CODE_BLOCK.replace_all(&content, "").trim().to_string();
            if !remaining.is_empty() {
                let text_card = card.update(CardUpdate::content(Content::Text(TextContent {
                    text: remaining,
                })))?;
                card_store.add(&text_card).await?;
                result.new_box.add(text_card.card_id());
                derived.push(text_card.card_id().to_string());
            }

            for block in blocks {
                let code_card = Card::new(Content::Text(TextContent {
                    text: block.trim().to_string(),
                }))?
                .with_meta("type", json!("code"))
                .with_meta("language", json!("python"))
                .with_meta("source_card_id", json!(card.card_id()));
                card_store.add(&code_card).await?;
                result.new_box.add(code_card.card_id());
                derived.push(code_card.card_id().to_string());
            }

            debug!(source = card.card_id(), derived = derived.len(), "code blocks extracted");
            result.map_to(card.card_id(), derived);
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
    use cardbox_files::InMemoryFileAdapter;
    use cardbox_store::MemoryStorageAdapter;
    use std::sync::Arc;

    fn store() -> CardStore {
        CardStore::new(Arc::new(MemoryStorageAdapter::new()), "tenant-test")
    }

    async fn add_text_card(store: &CardStore, text: &str) -> Card {
        let card = Card::new(Content::Text(TextContent {
            text: text.to_string(),
        }))
        .unwrap();
        store.add(&card).await.unwrap();
        card
    }

    #[tokio::test]
    async fn bare_fence_yields_one_code_card() {
        let store = store();
        let files = InMemoryFileAdapter::default();
        let source = add_text_card(&store, "```python\ndef f(): pass\n```").await;
        let mut cardbox = CardBox::new();
        cardbox.add(source.card_id());

        let result = ExtractCodeStrategy::new()
            .apply(&cardbox, &store, None, &files)
            .await
            .unwrap();

        assert!(result.errors.is_empty());
        assert_eq!(result.new_box.len(), 1);
        let derived = &result.relationship_map[source.card_id()];
        assert_eq!(derived.len(), 1);
        assert_eq!(result.new_box.card_ids(), derived.as_slice());

        let code_card = store.get(&derived[0]).await.unwrap().unwrap();
        assert_eq!(code_card.text(), "def f(): pass");
        assert_eq!(code_card.meta_str("type"), Some("code"));
        assert_eq!(code_card.meta_str("language"), Some("python"));
        assert_eq!(code_card.meta_str("source_card_id"), Some(source.card_id()));
    }

    #[tokio::test]
    async fn surrounding_text_becomes_its_own_card() {
        let store = store();
        let files = InMemoryFileAdapter::default();
        let source = add_text_card(
            &store,
            "before\n```python\nprint(1)\n```\nmiddle\n```python\nprint(2)\n```",
        )
        .await;
        let mut cardbox = CardBox::new();
        cardbox.add(source.card_id());

        let result = ExtractCodeStrategy::new()
            .apply(&cardbox, &store, None, &files)
            .await
            .unwrap();

        let derived = &result.relationship_map[source.card_id()];
        assert_eq!(derived.len(), 3);
        assert_eq!(result.new_box.card_ids(), derived.as_slice());

        let text_card = store.get(&derived[0]).await.unwrap().unwrap();
        assert!(text_card.text().contains("before"));
        assert!(text_card.text().contains("middle"));
        // The derived text card keeps a fresh id.
        assert_ne!(text_card.card_id(), source.card_id());
    }

    #[tokio::test]
    async fn non_text_and_plain_cards_pass_through() {
        let store = store();
        let files = InMemoryFileAdapter::default();
        let plain = add_text_card(&store, "no code here").await;
        let mut cardbox = CardBox::new();
        cardbox.add(plain.card_id());
        cardbox.add("card_missing");

        let result = ExtractCodeStrategy::new()
            .apply(&cardbox, &store, None, &files)
            .await
            .unwrap();

        // Pass-through keeps the identity mapping; the missing card is a
        // fail-open error carried into the box.
        assert_eq!(
            result.relationship_map[plain.card_id()],
            vec![plain.card_id().to_string()]
        );
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].source_card_id, "card_missing");
        assert_eq!(result.new_box.card_ids(), [plain.card_id(), "card_missing"]);
    }

    #[tokio::test]
    async fn every_input_id_lands_in_map_or_errors_exactly_once() {
        let store = store();
        let files = InMemoryFileAdapter::default();
        let a = add_text_card(&store, "```python\nx = 1\n```").await;
        let b = add_text_card(&store, "plain").await;
        let mut cardbox = CardBox::new();
        cardbox.add(a.card_id());
        cardbox.add("card_gone");
        cardbox.add(b.card_id());

        let result = ExtractCodeStrategy::new()
            .apply(&cardbox, &store, None, &files)
            .await
            .unwrap();

        for card_id in cardbox.card_ids() {
            let in_map = result.relationship_map.contains_key(card_id);
            let in_errors = result
                .errors
                .iter()
                .any(|e| e.source_card_id == *card_id);
            assert!(in_map ^ in_errors, "card {card_id} must be in exactly one of map/errors");
        }

        // Box ids are exactly map values plus error-carried originals, in
        // original relative order.
        let expected: Vec<String> = result.relationship_map[a.card_id()]
            .iter()
            .cloned()
            .chain(std::iter::once("card_gone".to_string()))
            .chain(result.relationship_map[b.card_id()].iter().cloned())
            .collect();
        assert_eq!(result.new_box.card_ids(), expected.as_slice());
    }
}
