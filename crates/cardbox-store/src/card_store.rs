//! The [`CardStore`] — validating facade over a storage adapter.
//!
//! The store keeps no state of its own beyond tenant identity and the
//! content policy: every write revalidates content first (so nothing
//! invalid is ever persisted, with no partial writes) and enqueues an
//! `index` side-task when the card is flagged indexable.

use std::sync::Arc;

use cardbox_core::{Card, CardBox, UriPolicy};
use tracing::debug;

use crate::adapter::{CardQuery, MetadataFilters, SideTaskOp, StorageAdapter};
use crate::error::Result;

/// Tenant-scoped, validating access to cards.
#[derive(Clone)]
pub struct CardStore {
    storage: Arc<dyn StorageAdapter>,
    tenant_id: String,
    policy: UriPolicy,
}

impl CardStore {
    /// Create a store for a tenant with the default URI policy.
    pub fn new(storage: Arc<dyn StorageAdapter>, tenant_id: impl Into<String>) -> Self {
        Self::with_policy(storage, tenant_id, UriPolicy::default())
    }

    /// Create a store with an explicit URI policy.
    pub fn with_policy(
        storage: Arc<dyn StorageAdapter>,
        tenant_id: impl Into<String>,
        policy: UriPolicy,
    ) -> Self {
        Self {
            storage,
            tenant_id: tenant_id.into(),
            policy,
        }
    }

    /// The tenant this store reads and writes under.
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// The underlying adapter, for composing history loggers.
    pub fn storage(&self) -> Arc<dyn StorageAdapter> {
        Arc::clone(&self.storage)
    }

    /// Persist a card.
    ///
    /// Content is revalidated against the store's policy before the write;
    /// a validation failure persists nothing. Cards flagged
    /// `metadata.indexable` also enqueue an `index` side-task.
    pub async fn add(&self, card: &Card) -> Result<()> {
        card.content().validate(&self.policy)?;
        self.storage.add_card(card, &self.tenant_id).await?;
        if card.meta_truthy("indexable") {
            self.storage
                .add_side_task(card.card_id(), &self.tenant_id, SideTaskOp::Index)
                .await?;
        }
        debug!(card_id = card.card_id(), tenant = %self.tenant_id, "card persisted");
        Ok(())
    }

    /// Fetch a live card by id.
    pub async fn get(&self, card_id: &str) -> Result<Option<Card>> {
        self.storage.get_card(card_id, &self.tenant_id).await
    }

    /// List cards newest-created-first.
    pub async fn list(&self, query: CardQuery) -> Result<Vec<Card>> {
        self.storage.list_cards(&self.tenant_id, query).await
    }

    /// Fetch the most recent card matching a step id and card type.
    pub async fn get_latest_by_step_and_type(
        &self,
        step_id: &str,
        card_type: &str,
        include_deleted: bool,
    ) -> Result<Option<Card>> {
        if step_id.is_empty() || card_type.is_empty() {
            return Ok(None);
        }
        let query = CardQuery {
            include_deleted,
            ..CardQuery::default()
        }
        .with_filter("step_id", Some(step_id.to_string()))
        .with_filter("type", Some(card_type.to_string()))
        .with_limit(1);
        let cards = self.list(query).await?;
        Ok(cards.into_iter().next())
    }

    /// Fetch tool-result cards for a dispatch step by tool-call-id set.
    pub async fn list_tool_results_by_step_and_call_ids(
        &self,
        step_id: &str,
        tool_call_ids: Vec<String>,
        include_deleted: bool,
    ) -> Result<Vec<Card>> {
        if step_id.is_empty() || tool_call_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut filters = MetadataFilters::new();
        let _ = filters.insert("step_id".to_string(), Some(step_id.to_string()));
        let _ = filters.insert("type".to_string(), Some("tool.result".to_string()));
        self.storage
            .list_cards_by_tool_call_ids(&self.tenant_id, tool_call_ids, filters, include_deleted, None)
            .await
    }

    /// Resolve a box's references to live cards, preserving box order and
    /// skipping missing or soft-deleted entries.
    pub async fn hydrate(&self, cardbox: &CardBox) -> Result<Vec<Card>> {
        let mut cards = Vec::with_capacity(cardbox.len());
        for card_id in cardbox.card_ids() {
            if let Some(card) = self.get(card_id).await? {
                cards.push(card);
            }
        }
        Ok(cards)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorageAdapter;
    use cardbox_core::{Content, FileMeta, TextContent};
    use serde_json::json;

    fn text_card(text: &str) -> Card {
        Card::new(Content::Text(TextContent {
            text: text.to_string(),
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn add_revalidates_against_the_store_policy() {
        // The card passed default-policy construction, but this store only
        // accepts https. Nothing must be persisted — not even a side-task.
        let adapter = Arc::new(MemoryStorageAdapter::new());
        let store = CardStore::with_policy(
            Arc::clone(&adapter) as Arc<dyn StorageAdapter>,
            "t",
            UriPolicy::new(["https"]),
        );

        let card = Card::new(Content::File(FileMeta::new("s3://bucket/key", "sha256:x")))
            .unwrap()
            .with_meta("indexable", json!(true));
        let err = store.add(&card).await.unwrap_err();
        assert!(matches!(err, crate::StoreError::Content(_)));
        assert!(store.get(card.card_id()).await.unwrap().is_none());
        assert!(adapter.side_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn indexable_cards_enqueue_an_index_task() {
        let adapter = Arc::new(MemoryStorageAdapter::new());
        let store = CardStore::new(Arc::clone(&adapter) as Arc<dyn StorageAdapter>, "t");

        let plain = text_card("plain");
        let flagged = text_card("flagged").with_meta("indexable", json!(true));
        store.add(&plain).await.unwrap();
        store.add(&flagged).await.unwrap();

        let tasks = adapter.side_tasks().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].card_id, flagged.card_id());
        assert_eq!(tasks[0].operation, SideTaskOp::Index);
    }

    #[tokio::test]
    async fn latest_by_step_and_type_picks_the_newest_match() {
        let adapter = Arc::new(MemoryStorageAdapter::new());
        let store = CardStore::new(Arc::clone(&adapter) as Arc<dyn StorageAdapter>, "t");

        let older = text_card("v1")
            .with_meta("step_id", json!("s1"))
            .with_meta("type", json!("draft"));
        let newer = text_card("v2")
            .with_meta("step_id", json!("s1"))
            .with_meta("type", json!("draft"));
        store.add(&older).await.unwrap();
        store.add(&newer).await.unwrap();

        let latest = store
            .get_latest_by_step_and_type("s1", "draft", false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.card_id(), newer.card_id());

        // Blank keys short-circuit to absent.
        assert!(store.get_latest_by_step_and_type("", "draft", false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tool_results_filter_by_step_and_call_ids() {
        let adapter = Arc::new(MemoryStorageAdapter::new());
        let store = CardStore::new(Arc::clone(&adapter) as Arc<dyn StorageAdapter>, "t");

        let matching = text_card("hit")
            .with_tool_call_id("call_1")
            .with_meta("step_id", json!("s1"))
            .with_meta("type", json!("tool.result"));
        let wrong_step = text_card("miss")
            .with_tool_call_id("call_2")
            .with_meta("step_id", json!("s2"))
            .with_meta("type", json!("tool.result"));
        store.add(&matching).await.unwrap();
        store.add(&wrong_step).await.unwrap();

        let results = store
            .list_tool_results_by_step_and_call_ids(
                "s1",
                vec!["call_1".to_string(), "call_2".to_string()],
                false,
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].card_id(), matching.card_id());

        assert!(store
            .list_tool_results_by_step_and_call_ids("s1", Vec::new(), false)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn hydrate_keeps_box_order_and_skips_missing() {
        let adapter = Arc::new(MemoryStorageAdapter::new());
        let store = CardStore::new(Arc::clone(&adapter) as Arc<dyn StorageAdapter>, "t");

        let first = text_card("first");
        let second = text_card("second");
        store.add(&first).await.unwrap();
        store.add(&second).await.unwrap();

        let mut cardbox = CardBox::new();
        cardbox.add(first.card_id());
        cardbox.add("card_missing");
        cardbox.add(second.card_id());

        let cards = store.hydrate(&cardbox).await.unwrap();
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].card_id(), first.card_id());
        assert_eq!(cards[1].card_id(), second.card_id());
    }
}
