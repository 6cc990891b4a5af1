//! Pooled SQLite storage.
//!
//! Layout mirrors the rest of the workspace's database code: a connection
//! pool ([`connection`]), idempotent schema bootstrap ([`schema`]),
//! stateless per-table repositories ([`repos`]), and the async
//! [`adapter::SqliteStorageAdapter`] that bridges the pool onto the
//! [`crate::StorageAdapter`] contract.

pub mod adapter;
pub mod connection;
pub mod repos;
pub mod schema;

pub use adapter::SqliteStorageAdapter;
pub use connection::{ConnectionPool, PooledConnection, SqlitePoolConfig};
