//! Side-task queue repository.
//!
//! Insert-only from this crate's perspective: the queue is drained by an
//! external worker with at-least-once semantics.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use super::timestamp;
use crate::adapter::SideTaskOp;
use crate::error::Result;

/// One queued side-task row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SideTaskRow {
    /// Card the task refers to.
    pub card_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// The queued operation label (`index` or `delete`).
    pub operation: String,
}

/// Side-task table access. Stateless; every method takes `&Connection`.
pub struct TaskRepo;

impl TaskRepo {
    /// Enqueue one side-task.
    pub fn enqueue(
        conn: &Connection,
        card_id: &str,
        tenant_id: &str,
        operation: SideTaskOp,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO side_tasks (card_id, tenant_id, operation, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![card_id, tenant_id, operation.as_str(), timestamp(now)],
        )?;
        Ok(())
    }

    /// List a tenant's queued tasks in enqueue order.
    pub fn list(conn: &Connection, tenant_id: &str) -> Result<Vec<SideTaskRow>> {
        let mut stmt = conn.prepare(
            "SELECT card_id, tenant_id, operation FROM side_tasks
             WHERE tenant_id = ?1 ORDER BY task_id",
        )?;
        let rows = stmt.query_map(params![tenant_id], |row| {
            Ok(SideTaskRow {
                card_id: row.get(0)?,
                tenant_id: row.get(1)?,
                operation: row.get(2)?,
            })
        })?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }
}
