//! Log repositories — operation logs, transformation edges, box snapshots,
//! API calls, and source-card resolution.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use super::timestamp;
use crate::adapter::{ApiLogEntry, BoxLogEntry};
use crate::error::Result;

/// Log table access. Stateless; every method takes `&Connection`.
pub struct LogRepo;

impl LogRepo {
    /// Append one operation log row; returns the assigned log id.
    pub fn add_operation(
        conn: &Connection,
        tenant_id: &str,
        trace_id: &str,
        strategy_name: &str,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let _ = conn.execute(
            "INSERT INTO operation_logs (tenant_id, trace_id, strategy_name, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![tenant_id, trace_id, strategy_name, timestamp(now)],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Append one source→derived transformation edge.
    pub fn add_transformation(
        conn: &Connection,
        operation_log_id: i64,
        source_card_id: &str,
        derived_card_id: &str,
    ) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO card_transformations (operation_log_id, source_card_id, derived_card_id)
             VALUES (?1, ?2, ?3)",
            params![operation_log_id, source_card_id, derived_card_id],
        )?;
        Ok(())
    }

    /// Append one box-transformation row with before/after snapshots.
    pub fn add_box_log(conn: &Connection, entry: &BoxLogEntry, now: DateTime<Utc>) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO card_box_logs
                 (tenant_id, trace_id, strategy_name, strategy_input,
                  input_box, output_box, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.tenant_id,
                entry.trace_id,
                entry.strategy_name,
                entry.strategy_input,
                entry.input_box,
                entry.output_box,
                timestamp(now),
            ],
        )?;
        Ok(())
    }

    /// Append one API-call row; returns the assigned log id.
    pub fn add_api_log(conn: &Connection, entry: &ApiLogEntry, now: DateTime<Utc>) -> Result<i64> {
        let _ = conn.execute(
            "INSERT INTO api_logs
                 (tenant_id, trace_id, api_type, endpoint, request, response, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.tenant_id,
                entry.trace_id,
                entry.api_type,
                entry.endpoint,
                entry.request,
                entry.response,
                timestamp(now),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Resolve the source card ids recorded for a derived card within a
    /// trace.
    pub fn source_card_ids(
        conn: &Connection,
        tenant_id: &str,
        trace_id: &str,
        derived_card_id: &str,
    ) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT t.source_card_id
             FROM card_transformations t
             JOIN operation_logs l ON t.operation_log_id = l.log_id
             WHERE l.tenant_id = ?1 AND l.trace_id = ?2 AND t.derived_card_id = ?3",
        )?;
        let rows = stmt.query_map(params![tenant_id, trace_id, derived_card_id], |row| {
            row.get::<_, String>(0)
        })?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
