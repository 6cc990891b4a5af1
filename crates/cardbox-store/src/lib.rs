//! # cardbox-store
//!
//! Persistence for cards, boxes, and lineage:
//!
//! - **[`adapter::StorageAdapter`]**: the tenant-scoped async contract any
//!   backing store must implement (card CRUD, box CRUD, lineage and
//!   operation logs, side-task queue, TTL expiry)
//! - **[`card_store::CardStore`]**: validating facade — revalidates content
//!   before every write and enqueues index side-tasks
//! - **[`history`]**: card / box / api history loggers
//! - **[`memory::MemoryStorageAdapter`]**: complete in-process adapter for
//!   tests and embedding
//! - **[`sqlite::SqliteStorageAdapter`]**: pooled SQLite implementation
//!   (rusqlite + r2d2) with idempotent schema bootstrap
//!
//! Every adapter operation takes a tenant id and is implicitly filtered by
//! it — cross-tenant reads return nothing, never someone else's rows.

#![deny(unsafe_code)]

pub mod adapter;
pub mod card_store;
pub mod error;
pub mod history;
pub mod memory;
pub mod sqlite;

pub use adapter::{
    ApiLogEntry, BoxLogEntry, CardQuery, MetadataFilters, SideTaskOp, StorageAdapter,
};
pub use card_store::CardStore;
pub use error::{Result, StoreError};
pub use history::{ApiHistory, ApiLogLevel, CardBoxHistory, CardHistory};
pub use memory::{
    MemoryStorageAdapter, OperationLogRecord, SideTaskRecord, TransformationRecord,
};
pub use sqlite::{SqlitePoolConfig, SqliteStorageAdapter};
