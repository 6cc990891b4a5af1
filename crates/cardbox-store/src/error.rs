//! Storage error taxonomy.

use cardbox_core::ContentError;
use thiserror::Error;

/// Convenient result alias for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by storage adapters and the card store facade.
///
/// Callers can distinguish not-found ([`StoreError::BoxNotFound`]),
/// validation ([`StoreError::Content`]), and connectivity
/// ([`StoreError::is_retryable`]) failures. Connectivity errors should be
/// retried with backoff by the caller; they are never swallowed here.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Content failed validation; nothing was persisted.
    #[error(transparent)]
    Content(#[from] ContentError),

    /// A box save/append/update referenced an id that does not exist for
    /// the tenant.
    #[error("card box {box_id} not found for tenant {tenant_id}")]
    BoxNotFound {
        /// The missing box id.
        box_id: String,
        /// The requesting tenant.
        tenant_id: String,
    },

    /// A stored required field could not be decoded.
    #[error("corrupt stored record: {0}")]
    Corrupt(String),

    /// JSON (de)serialization failure.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// SQLite-level failure.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool failure (checkout timeout, pool closed).
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Anything else (task join failures, invariant breaches).
    #[error("storage internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether this error is a transient connectivity problem the caller
    /// may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Pool(_) => true,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(code, _)) => matches!(
                code.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}
