//! The tenant-scoped storage contract.
//!
//! Every operation takes a tenant identifier and is implicitly filtered by
//! it. Soft-deleted cards stay in the store — reads exclude them unless
//! `include_deleted` is set, and TTL expiry is a maintenance sweep
//! ([`StorageAdapter::expire_cards`]), not something the engine drives.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use cardbox_core::{Card, CardBox};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Metadata equality filters: key → expected stringified value, or `None`
/// meaning "key must be absent".
pub type MetadataFilters = BTreeMap<String, Option<String>>;

/// Listing parameters for card queries. Results are ordered
/// newest-created-first.
#[derive(Clone, Debug, Default)]
pub struct CardQuery {
    /// Metadata equality filters.
    pub metadata_filters: MetadataFilters,
    /// Maximum number of cards to return.
    pub limit: Option<u32>,
    /// Number of cards to skip.
    pub offset: u32,
    /// Whether soft-deleted cards are included.
    pub include_deleted: bool,
}

impl CardQuery {
    /// Add one metadata equality filter.
    pub fn with_filter(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        let _ = self.metadata_filters.insert(key.into(), value);
        self
    }

    /// Set the result limit.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Asynchronous follow-up work enqueued alongside a persistence write and
/// consumed by an external worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SideTaskOp {
    /// Index the card in the external search index.
    Index,
    /// Remove the card from the external search index.
    Delete,
}

impl SideTaskOp {
    /// Stable storage label.
    pub fn as_str(self) -> &'static str {
        match self {
            SideTaskOp::Index => "index",
            SideTaskOp::Delete => "delete",
        }
    }

    /// Parse a stored label.
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "index" => Some(SideTaskOp::Index),
            "delete" => Some(SideTaskOp::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for SideTaskOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One box-transformation history row: strategy identity plus full
/// before/after box snapshots as JSON text.
#[derive(Clone, Debug)]
pub struct BoxLogEntry {
    /// Owning tenant.
    pub tenant_id: String,
    /// Trace the transformation ran under.
    pub trace_id: String,
    /// Strategy that produced the transformation.
    pub strategy_name: String,
    /// Stringified strategy input, if any.
    pub strategy_input: Option<String>,
    /// JSON snapshot of the box before the strategy ran.
    pub input_box: String,
    /// JSON snapshot of the box after the strategy ran.
    pub output_box: String,
}

/// One API-call history row.
#[derive(Clone, Debug)]
pub struct ApiLogEntry {
    /// Owning tenant.
    pub tenant_id: String,
    /// Trace the call ran under.
    pub trace_id: String,
    /// API category (e.g. `"llm"`).
    pub api_type: String,
    /// Endpoint path, URL, or model id.
    pub endpoint: String,
    /// Request payload, when captured.
    pub request: Option<String>,
    /// Response payload, when captured.
    pub response: Option<String>,
}

/// The persistence interface any backing store must implement.
///
/// Tenant isolation is the primary invariant: a card written under tenant A
/// must be invisible to every read under tenant B, for every operation.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Insert or fully replace a card. Replacing clears any soft-delete
    /// marker; a TTL is converted to an absolute expiry at write time.
    async fn add_card(&self, card: &Card, tenant_id: &str) -> Result<()>;

    /// Fetch a live (non-soft-deleted) card by id.
    async fn get_card(&self, card_id: &str, tenant_id: &str) -> Result<Option<Card>>;

    /// List cards newest-created-first with metadata filters and paging.
    async fn list_cards(&self, tenant_id: &str, query: CardQuery) -> Result<Vec<Card>>;

    /// List cards whose `tool_call_id` is in the given set, with optional
    /// metadata filters, newest-created-first.
    async fn list_cards_by_tool_call_ids(
        &self,
        tenant_id: &str,
        tool_call_ids: Vec<String>,
        metadata_filters: MetadataFilters,
        include_deleted: bool,
        limit: Option<u32>,
    ) -> Result<Vec<Card>>;

    /// Fetch a set of cards by id.
    async fn list_cards_by_ids(
        &self,
        tenant_id: &str,
        card_ids: Vec<String>,
        include_deleted: bool,
    ) -> Result<Vec<Card>>;

    /// Save or replace a box. The first save assigns a fresh box id (also
    /// written back onto `cardbox`); subsequent saves require the id to
    /// exist for the tenant and fail with
    /// [`crate::StoreError::BoxNotFound`] otherwise.
    async fn save_box(&self, cardbox: &mut CardBox, tenant_id: &str) -> Result<String>;

    /// Append card ids to the end of an existing box. An empty id list is
    /// an idempotent no-op that still verifies the box exists.
    async fn append_to_box(
        &self,
        box_id: &str,
        tenant_id: &str,
        card_ids: Vec<String>,
    ) -> Result<String>;

    /// Load a box by id.
    async fn load_box(&self, box_id: &str, tenant_id: &str) -> Result<Option<CardBox>>;

    /// Enqueue a side-task keyed by (card, tenant, operation).
    async fn add_side_task(&self, card_id: &str, tenant_id: &str, operation: SideTaskOp)
    -> Result<()>;

    /// Append an operation log row; returns its log id.
    async fn add_operation_log(
        &self,
        tenant_id: &str,
        trace_id: &str,
        strategy_name: &str,
    ) -> Result<i64>;

    /// Append one source→derived transformation edge under a log id.
    async fn add_transformation(
        &self,
        operation_log_id: i64,
        source_card_id: &str,
        derived_card_id: &str,
    ) -> Result<()>;

    /// Append a box-transformation history row.
    async fn add_box_log(&self, entry: BoxLogEntry) -> Result<()>;

    /// Append an API-call history row; returns its log id.
    async fn add_api_log(&self, entry: ApiLogEntry) -> Result<i64>;

    /// Resolve the live source cards that produced `card_id` within the
    /// given trace.
    async fn source_cards(&self, tenant_id: &str, trace_id: &str, card_id: &str)
    -> Result<Vec<Card>>;

    /// Soft-delete every card whose absolute expiry is at or before `now`.
    /// Returns the number of cards marked. Maintenance operation — the
    /// engine never drives this directly.
    async fn expire_cards(&self, now: DateTime<Utc>) -> Result<u64>;
}
