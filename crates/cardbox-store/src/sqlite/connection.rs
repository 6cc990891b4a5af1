//! Connection pool construction.

use std::path::PathBuf;

use r2d2_sqlite::SqliteConnectionManager;

use crate::error::{Result, StoreError};

/// A bounded pool of SQLite connections.
pub type ConnectionPool = r2d2::Pool<SqliteConnectionManager>;

/// One checked-out pooled connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Pool configuration for an owned SQLite store.
#[derive(Clone, Debug)]
pub struct SqlitePoolConfig {
    /// Database file path.
    pub path: PathBuf,
    /// Idle connections kept warm.
    pub min_idle: u32,
    /// Upper bound on open connections.
    pub max_size: u32,
    /// Whether to run the idempotent schema bootstrap on open.
    pub auto_bootstrap: bool,
}

impl SqlitePoolConfig {
    /// Configuration with the default pool bounds (1..=10) and bootstrap on.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            min_idle: 1,
            max_size: 10,
            auto_bootstrap: true,
        }
    }

    /// Pure override merge: unset fields keep the base values.
    pub fn overridden(mut self, min_idle: Option<u32>, max_size: Option<u32>) -> Self {
        if let Some(min_idle) = min_idle {
            self.min_idle = min_idle;
        }
        if let Some(max_size) = max_size {
            self.max_size = max_size;
        }
        self
    }
}

/// Build a WAL-mode pool for the configured database file.
///
/// Every connection runs the same init pragmas; `busy_timeout` keeps
/// short write contention out of the error path before the adapter's
/// retry loop has to engage.
pub fn build_pool(config: &SqlitePoolConfig) -> Result<ConnectionPool> {
    let manager = SqliteConnectionManager::file(&config.path).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
    });
    let pool = r2d2::Pool::builder()
        .max_size(config.max_size.max(1))
        .min_idle(Some(config.min_idle.min(config.max_size.max(1))))
        .build(manager)
        .map_err(StoreError::Pool)?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_opens_and_checks_out() {
        let dir = tempfile::tempdir().unwrap();
        let config = SqlitePoolConfig::new(dir.path().join("pool.db")).overridden(None, Some(2));
        let pool = build_pool(&config).unwrap();
        let conn = pool.get().unwrap();
        let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0)).unwrap();
        assert_eq!(one, 1);
    }

    #[test]
    fn overridden_merges_bounds() {
        let config = SqlitePoolConfig::new("x.db").overridden(Some(2), None);
        assert_eq!(config.min_idle, 2);
        assert_eq!(config.max_size, 10);
    }
}
