//! The pooled SQLite [`StorageAdapter`].
//!
//! Bridges the synchronous rusqlite pool onto the async contract with one
//! `spawn_blocking` hop per operation. Each operation checks out its own
//! connection and releases it before returning — nothing holds a
//! connection across operations, so a multi-strategy `transform` never
//! pins the pool. Multi-step operations (box save/append) run inside a
//! single checkout and transaction.
//!
//! INVARIANT: ownership of the pool is fixed at construction. Only an
//! owned pool is drained by [`SqliteStorageAdapter::close`]; closing an
//! attached pool is a no-op and ownership never transfers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cardbox_core::{Card, CardBox};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, instrument, warn};

use crate::adapter::{
    ApiLogEntry, BoxLogEntry, CardQuery, MetadataFilters, SideTaskOp, StorageAdapter,
};
use crate::error::{Result, StoreError};
use crate::sqlite::connection::{ConnectionPool, SqlitePoolConfig, build_pool};
use crate::sqlite::repos::{BoxRepo, CardRepo, LogRepo, TaskRepo};
use crate::sqlite::schema;

const BUSY_MAX_RETRIES: u32 = 32;

/// Pooled SQLite persistence for cards, boxes, lineage, and side-tasks.
pub struct SqliteStorageAdapter {
    pool: ConnectionPool,
    owns_pool: bool,
    schema_initialized: AtomicBool,
}

impl SqliteStorageAdapter {
    /// Open an adapter that owns its pool, bootstrapping the schema when
    /// the configuration asks for it.
    pub async fn open(config: SqlitePoolConfig) -> Result<Self> {
        let auto_bootstrap = config.auto_bootstrap;
        let pool = tokio::task::spawn_blocking(move || build_pool(&config))
            .await
            .map_err(|e| StoreError::Internal(format!("pool open task failed: {e}")))??;
        let adapter = Self {
            pool,
            owns_pool: true,
            schema_initialized: AtomicBool::new(false),
        };
        if auto_bootstrap {
            adapter.ensure_schema().await?;
        }
        Ok(adapter)
    }

    /// Attach to a pool owned by the host service. The schema is assumed
    /// to exist and [`close`](Self::close) will not drain the pool.
    pub fn attach(pool: ConnectionPool) -> Self {
        Self {
            pool,
            owns_pool: false,
            schema_initialized: AtomicBool::new(true),
        }
    }

    /// Whether this adapter owns (and may drain) its pool.
    pub fn owns_pool(&self) -> bool {
        self.owns_pool
    }

    /// Run the idempotent schema bootstrap once per adapter.
    ///
    /// The guard is an in-process flag, not a distributed lock: two racing
    /// first-opens may both run the DDL batch, which is safe because every
    /// statement is `CREATE … IF NOT EXISTS`.
    async fn ensure_schema(&self) -> Result<()> {
        if self.schema_initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        self.run(|conn| schema::bootstrap(conn).map_err(StoreError::from))
            .await?;
        self.schema_initialized.store(true, Ordering::Release);
        debug!("sqlite schema bootstrapped");
        Ok(())
    }

    /// Wait for all connections of an owned pool to return to idle, up to
    /// the optional timeout. Closing an attached pool is a no-op.
    pub async fn close(&self, timeout: Option<Duration>) -> Result<()> {
        if !self.owns_pool {
            return Ok(());
        }
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let state = self.pool.state();
            if state.idle_connections == state.connections {
                return Ok(());
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!(
                    busy = state.connections - state.idle_connections,
                    "close timed out with connections still checked out"
                );
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Execute one storage operation on a pooled connection.
    ///
    /// The closure runs on the blocking pool, checks out its own
    /// connection, and is retried with jittered linear backoff while
    /// SQLite reports BUSY/LOCKED.
    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            retry_on_busy(|| {
                let conn = pool.get()?;
                op(&conn)
            })
        })
        .await
        .map_err(|e| StoreError::Internal(format!("storage task join failed: {e}")))?
    }
}

/// Retry an operation on SQLite BUSY/LOCKED with linear backoff + jitter.
fn retry_on_busy<T>(mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempts = 0u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempts < BUSY_MAX_RETRIES => {
                attempts += 1;
                let base_ms = u64::from(attempts).saturating_mul(10).min(500);
                let jitter_range = base_ms / 4;
                let jitter = if jitter_range > 0 {
                    rand::random::<u64>() % (jitter_range * 2 + 1)
                } else {
                    0
                };
                let backoff_ms = base_ms.saturating_sub(jitter_range) + jitter;
                std::thread::sleep(Duration::from_millis(backoff_ms));
            }
            Err(err) => return Err(err),
        }
    }
}

#[async_trait]
impl StorageAdapter for SqliteStorageAdapter {
    #[instrument(skip(self, card), fields(card_id = card.card_id()))]
    async fn add_card(&self, card: &Card, tenant_id: &str) -> Result<()> {
        let card = card.clone();
        let tenant = tenant_id.to_string();
        let now = Utc::now();
        self.run(move |conn| CardRepo::upsert(conn, &card, &tenant, now))
            .await
    }

    async fn get_card(&self, card_id: &str, tenant_id: &str) -> Result<Option<Card>> {
        let card_id = card_id.to_string();
        let tenant = tenant_id.to_string();
        self.run(move |conn| CardRepo::get(conn, &card_id, &tenant))
            .await
    }

    async fn list_cards(&self, tenant_id: &str, query: CardQuery) -> Result<Vec<Card>> {
        let tenant = tenant_id.to_string();
        self.run(move |conn| CardRepo::list(conn, &tenant, &query))
            .await
    }

    async fn list_cards_by_tool_call_ids(
        &self,
        tenant_id: &str,
        tool_call_ids: Vec<String>,
        metadata_filters: MetadataFilters,
        include_deleted: bool,
        limit: Option<u32>,
    ) -> Result<Vec<Card>> {
        let tenant = tenant_id.to_string();
        self.run(move |conn| {
            CardRepo::list_by_tool_call_ids(
                conn,
                &tenant,
                &tool_call_ids,
                &metadata_filters,
                include_deleted,
                limit,
            )
        })
        .await
    }

    async fn list_cards_by_ids(
        &self,
        tenant_id: &str,
        card_ids: Vec<String>,
        include_deleted: bool,
    ) -> Result<Vec<Card>> {
        let tenant = tenant_id.to_string();
        self.run(move |conn| CardRepo::list_by_ids(conn, &tenant, &card_ids, include_deleted))
            .await
    }

    #[instrument(skip(self, cardbox), fields(box_id = cardbox.box_id()))]
    async fn save_box(&self, cardbox: &mut CardBox, tenant_id: &str) -> Result<String> {
        let snapshot = cardbox.clone();
        let tenant = tenant_id.to_string();
        let now = Utc::now();
        let box_id = self
            .run(move |conn| {
                let tx = conn.unchecked_transaction()?;
                let mut working = snapshot.clone();
                let box_id = BoxRepo::save(&tx, &mut working, &tenant, now)?;
                tx.commit()?;
                Ok(box_id)
            })
            .await?;
        cardbox.set_box_id(box_id.clone());
        Ok(box_id)
    }

    #[instrument(skip(self, card_ids), fields(count = card_ids.len()))]
    async fn append_to_box(
        &self,
        box_id: &str,
        tenant_id: &str,
        card_ids: Vec<String>,
    ) -> Result<String> {
        let box_id = box_id.to_string();
        let tenant = tenant_id.to_string();
        let now = Utc::now();
        self.run(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let result = BoxRepo::append(&tx, &box_id, &tenant, &card_ids, now)?;
            tx.commit()?;
            Ok(result)
        })
        .await
    }

    async fn load_box(&self, box_id: &str, tenant_id: &str) -> Result<Option<CardBox>> {
        let box_id = box_id.to_string();
        let tenant = tenant_id.to_string();
        self.run(move |conn| BoxRepo::load(conn, &box_id, &tenant))
            .await
    }

    async fn add_side_task(
        &self,
        card_id: &str,
        tenant_id: &str,
        operation: SideTaskOp,
    ) -> Result<()> {
        let card_id = card_id.to_string();
        let tenant = tenant_id.to_string();
        let now = Utc::now();
        self.run(move |conn| TaskRepo::enqueue(conn, &card_id, &tenant, operation, now))
            .await
    }

    async fn add_operation_log(
        &self,
        tenant_id: &str,
        trace_id: &str,
        strategy_name: &str,
    ) -> Result<i64> {
        let tenant = tenant_id.to_string();
        let trace = trace_id.to_string();
        let strategy = strategy_name.to_string();
        let now = Utc::now();
        self.run(move |conn| LogRepo::add_operation(conn, &tenant, &trace, &strategy, now))
            .await
    }

    async fn add_transformation(
        &self,
        operation_log_id: i64,
        source_card_id: &str,
        derived_card_id: &str,
    ) -> Result<()> {
        let source = source_card_id.to_string();
        let derived = derived_card_id.to_string();
        self.run(move |conn| LogRepo::add_transformation(conn, operation_log_id, &source, &derived))
            .await
    }

    async fn add_box_log(&self, entry: BoxLogEntry) -> Result<()> {
        let now = Utc::now();
        self.run(move |conn| LogRepo::add_box_log(conn, &entry, now))
            .await
    }

    async fn add_api_log(&self, entry: ApiLogEntry) -> Result<i64> {
        let now = Utc::now();
        self.run(move |conn| LogRepo::add_api_log(conn, &entry, now))
            .await
    }

    async fn source_cards(
        &self,
        tenant_id: &str,
        trace_id: &str,
        card_id: &str,
    ) -> Result<Vec<Card>> {
        let tenant = tenant_id.to_string();
        let trace = trace_id.to_string();
        let derived = card_id.to_string();
        self.run(move |conn| {
            let source_ids = LogRepo::source_card_ids(conn, &tenant, &trace, &derived)?;
            let mut cards = Vec::new();
            for source_id in source_ids {
                if let Some(card) = CardRepo::get(conn, &source_id, &tenant)? {
                    cards.push(card);
                }
            }
            Ok(cards)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn expire_cards(&self, now: DateTime<Utc>) -> Result<u64> {
        let marked = self.run(move |conn| CardRepo::expire(conn, now)).await?;
        if marked > 0 {
            debug!(marked, "expired cards soft-deleted");
        }
        Ok(marked as u64)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
