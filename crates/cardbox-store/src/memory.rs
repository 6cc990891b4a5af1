//! In-process storage adapter.
//!
//! A complete [`StorageAdapter`] over tenant-keyed maps behind a
//! `tokio::sync::RwLock`. Used as the storage double in tests and as a
//! real adapter for embedded, single-process callers. Inspection helpers
//! expose the side-task queue and log tables so tests can assert on them.

use std::collections::HashMap;

use async_trait::async_trait;
use cardbox_core::{Card, CardBox, ids};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::adapter::{
    ApiLogEntry, BoxLogEntry, CardQuery, MetadataFilters, SideTaskOp, StorageAdapter,
};
use crate::error::{Result, StoreError};

#[derive(Clone, Debug)]
struct StoredCard {
    card: Card,
    created_at: DateTime<Utc>,
    seq: u64,
    expires_at: Option<DateTime<Utc>>,
    deleted: bool,
}

#[derive(Clone, Debug)]
struct StoredBox {
    card_ids: Vec<String>,
    parent_ids: Option<Vec<String>>,
}

/// One enqueued side-task, observable in tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SideTaskRecord {
    /// Card the task refers to.
    pub card_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// The queued operation.
    pub operation: SideTaskOp,
}

/// One recorded operation log row, observable in tests.
#[derive(Clone, Debug)]
pub struct OperationLogRecord {
    /// Assigned log id.
    pub log_id: i64,
    /// Owning tenant.
    pub tenant_id: String,
    /// Trace the operation ran under.
    pub trace_id: String,
    /// Strategy that produced it.
    pub strategy_name: String,
}

/// One recorded transformation edge, observable in tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransformationRecord {
    /// Owning operation log id.
    pub operation_log_id: i64,
    /// Pre-transform card.
    pub source_card_id: String,
    /// Post-transform card.
    pub derived_card_id: String,
}

#[derive(Default)]
struct MemoryState {
    cards: HashMap<String, HashMap<String, StoredCard>>,
    boxes: HashMap<String, HashMap<String, StoredBox>>,
    side_tasks: Vec<SideTaskRecord>,
    operation_logs: Vec<OperationLogRecord>,
    transformations: Vec<TransformationRecord>,
    box_logs: Vec<BoxLogEntry>,
    api_logs: Vec<ApiLogEntry>,
    next_log_id: i64,
    next_seq: u64,
}

/// In-memory [`StorageAdapter`] implementation.
#[derive(Default)]
pub struct MemoryStorageAdapter {
    state: RwLock<MemoryState>,
}

impl MemoryStorageAdapter {
    /// Create an empty adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the side-task queue.
    pub async fn side_tasks(&self) -> Vec<SideTaskRecord> {
        self.state.read().await.side_tasks.clone()
    }

    /// Snapshot of the operation log.
    pub async fn operation_logs(&self) -> Vec<OperationLogRecord> {
        self.state.read().await.operation_logs.clone()
    }

    /// Snapshot of the transformation edges.
    pub async fn transformations(&self) -> Vec<TransformationRecord> {
        self.state.read().await.transformations.clone()
    }

    /// Snapshot of the box-transformation log.
    pub async fn box_logs(&self) -> Vec<BoxLogEntry> {
        self.state.read().await.box_logs.clone()
    }

    /// Snapshot of the API-call log.
    pub async fn api_logs(&self) -> Vec<ApiLogEntry> {
        self.state.read().await.api_logs.clone()
    }
}

/// Stringified comparison value for a metadata entry, mirroring how the
/// relational adapter compares `metadata ->> key` as text.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn matches_filters(card: &Card, filters: &MetadataFilters) -> bool {
    filters.iter().all(|(key, expected)| {
        let actual = card.meta(key);
        match expected {
            None => actual.is_none() || actual == Some(&Value::Null),
            Some(want) => actual
                .filter(|v| !v.is_null())
                .is_some_and(|v| stringify(v) == *want),
        }
    })
}

fn visible(stored: &StoredCard, include_deleted: bool) -> bool {
    include_deleted || !stored.deleted
}

#[async_trait]
impl StorageAdapter for MemoryStorageAdapter {
    async fn add_card(&self, card: &Card, tenant_id: &str) -> Result<()> {
        let now = Utc::now();
        let expires_at = card.ttl_seconds().map(|ttl| now + Duration::seconds(ttl));
        let mut state = self.state.write().await;
        state.next_seq += 1;
        let seq = state.next_seq;
        let tenant = state.cards.entry(tenant_id.to_string()).or_default();

        // Full replace clears soft-delete and recomputes expiry, but keeps
        // the original creation instant for ordering.
        let (created_at, seq) = tenant
            .get(card.card_id())
            .map_or((now, seq), |existing| (existing.created_at, existing.seq));
        let _ = tenant.insert(
            card.card_id().to_string(),
            StoredCard {
                card: card.clone(),
                created_at,
                seq,
                expires_at,
                deleted: false,
            },
        );
        Ok(())
    }

    async fn get_card(&self, card_id: &str, tenant_id: &str) -> Result<Option<Card>> {
        let state = self.state.read().await;
        Ok(state
            .cards
            .get(tenant_id)
            .and_then(|tenant| tenant.get(card_id))
            .filter(|stored| !stored.deleted)
            .map(|stored| stored.card.clone()))
    }

    async fn list_cards(&self, tenant_id: &str, query: CardQuery) -> Result<Vec<Card>> {
        let state = self.state.read().await;
        let mut matches: Vec<&StoredCard> = state
            .cards
            .get(tenant_id)
            .map(|tenant| {
                tenant
                    .values()
                    .filter(|stored| visible(stored, query.include_deleted))
                    .filter(|stored| matches_filters(&stored.card, &query.metadata_filters))
                    .collect()
            })
            .unwrap_or_default();
        matches.sort_by(|a, b| (b.created_at, b.seq).cmp(&(a.created_at, a.seq)));

        let cards = matches
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit.map_or(usize::MAX, |l| l as usize))
            .map(|stored| stored.card.clone())
            .collect();
        Ok(cards)
    }

    async fn list_cards_by_tool_call_ids(
        &self,
        tenant_id: &str,
        tool_call_ids: Vec<String>,
        metadata_filters: MetadataFilters,
        include_deleted: bool,
        limit: Option<u32>,
    ) -> Result<Vec<Card>> {
        if tool_call_ids.is_empty() {
            return Ok(Vec::new());
        }
        let state = self.state.read().await;
        let mut matches: Vec<&StoredCard> = state
            .cards
            .get(tenant_id)
            .map(|tenant| {
                tenant
                    .values()
                    .filter(|stored| visible(stored, include_deleted))
                    .filter(|stored| {
                        stored
                            .card
                            .tool_call_id()
                            .is_some_and(|id| tool_call_ids.iter().any(|want| want == id))
                    })
                    .filter(|stored| matches_filters(&stored.card, &metadata_filters))
                    .collect()
            })
            .unwrap_or_default();
        matches.sort_by(|a, b| (b.created_at, b.seq).cmp(&(a.created_at, a.seq)));

        Ok(matches
            .into_iter()
            .take(limit.map_or(usize::MAX, |l| l as usize))
            .map(|stored| stored.card.clone())
            .collect())
    }

    async fn list_cards_by_ids(
        &self,
        tenant_id: &str,
        card_ids: Vec<String>,
        include_deleted: bool,
    ) -> Result<Vec<Card>> {
        if card_ids.is_empty() {
            return Ok(Vec::new());
        }
        let state = self.state.read().await;
        let Some(tenant) = state.cards.get(tenant_id) else {
            return Ok(Vec::new());
        };
        Ok(card_ids
            .iter()
            .filter_map(|id| tenant.get(id))
            .filter(|stored| visible(stored, include_deleted))
            .map(|stored| stored.card.clone())
            .collect())
    }

    async fn save_box(&self, cardbox: &mut CardBox, tenant_id: &str) -> Result<String> {
        let mut state = self.state.write().await;
        let tenant = state.boxes.entry(tenant_id.to_string()).or_default();
        let box_id = match cardbox.box_id() {
            None => {
                let id = ids::new_box_id();
                cardbox.set_box_id(id.clone());
                id
            }
            Some(id) => {
                if !tenant.contains_key(id) {
                    return Err(StoreError::BoxNotFound {
                        box_id: id.to_string(),
                        tenant_id: tenant_id.to_string(),
                    });
                }
                id.to_string()
            }
        };
        let _ = tenant.insert(
            box_id.clone(),
            StoredBox {
                card_ids: cardbox.card_ids().to_vec(),
                parent_ids: cardbox.parent_ids().map(<[String]>::to_vec),
            },
        );
        Ok(box_id)
    }

    async fn append_to_box(
        &self,
        box_id: &str,
        tenant_id: &str,
        card_ids: Vec<String>,
    ) -> Result<String> {
        let mut state = self.state.write().await;
        let stored = state
            .boxes
            .get_mut(tenant_id)
            .and_then(|tenant| tenant.get_mut(box_id))
            .ok_or_else(|| StoreError::BoxNotFound {
                box_id: box_id.to_string(),
                tenant_id: tenant_id.to_string(),
            })?;
        stored.card_ids.extend(card_ids);
        Ok(box_id.to_string())
    }

    async fn load_box(&self, box_id: &str, tenant_id: &str) -> Result<Option<CardBox>> {
        let state = self.state.read().await;
        Ok(state
            .boxes
            .get(tenant_id)
            .and_then(|tenant| tenant.get(box_id))
            .map(|stored| {
                CardBox::from_parts(
                    Some(box_id.to_string()),
                    stored.parent_ids.clone(),
                    stored.card_ids.clone(),
                )
            }))
    }

    async fn add_side_task(
        &self,
        card_id: &str,
        tenant_id: &str,
        operation: SideTaskOp,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.side_tasks.push(SideTaskRecord {
            card_id: card_id.to_string(),
            tenant_id: tenant_id.to_string(),
            operation,
        });
        Ok(())
    }

    async fn add_operation_log(
        &self,
        tenant_id: &str,
        trace_id: &str,
        strategy_name: &str,
    ) -> Result<i64> {
        let mut state = self.state.write().await;
        state.next_log_id += 1;
        let log_id = state.next_log_id;
        state.operation_logs.push(OperationLogRecord {
            log_id,
            tenant_id: tenant_id.to_string(),
            trace_id: trace_id.to_string(),
            strategy_name: strategy_name.to_string(),
        });
        Ok(log_id)
    }

    async fn add_transformation(
        &self,
        operation_log_id: i64,
        source_card_id: &str,
        derived_card_id: &str,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.transformations.push(TransformationRecord {
            operation_log_id,
            source_card_id: source_card_id.to_string(),
            derived_card_id: derived_card_id.to_string(),
        });
        Ok(())
    }

    async fn add_box_log(&self, entry: BoxLogEntry) -> Result<()> {
        let mut state = self.state.write().await;
        state.box_logs.push(entry);
        Ok(())
    }

    async fn add_api_log(&self, entry: ApiLogEntry) -> Result<i64> {
        let mut state = self.state.write().await;
        state.next_log_id += 1;
        let log_id = state.next_log_id;
        state.api_logs.push(entry);
        Ok(log_id)
    }

    async fn source_cards(
        &self,
        tenant_id: &str,
        trace_id: &str,
        card_id: &str,
    ) -> Result<Vec<Card>> {
        let source_ids: Vec<String> = {
            let state = self.state.read().await;
            let log_ids: Vec<i64> = state
                .operation_logs
                .iter()
                .filter(|log| log.tenant_id == tenant_id && log.trace_id == trace_id)
                .map(|log| log.log_id)
                .collect();
            state
                .transformations
                .iter()
                .filter(|edge| {
                    edge.derived_card_id == card_id && log_ids.contains(&edge.operation_log_id)
                })
                .map(|edge| edge.source_card_id.clone())
                .collect()
        };

        let mut cards = Vec::new();
        for source_id in source_ids {
            if let Some(card) = self.get_card(&source_id, tenant_id).await? {
                cards.push(card);
            }
        }
        Ok(cards)
    }

    async fn expire_cards(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut marked = 0u64;
        for tenant in state.cards.values_mut() {
            for stored in tenant.values_mut() {
                if !stored.deleted && stored.expires_at.is_some_and(|expiry| expiry <= now) {
                    stored.deleted = true;
                    marked += 1;
                }
            }
        }
        Ok(marked)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
