//! Schema bootstrap.
//!
//! All DDL is `CREATE … IF NOT EXISTS` so concurrent first-opens are safe:
//! the adapter guards bootstrap with an in-process flag, not a distributed
//! lock, and two racing opens may both run this batch.

use rusqlite::Connection;

/// Idempotent DDL for every cardbox table.
pub const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS cards (
    card_id      TEXT NOT NULL,
    tenant_id    TEXT NOT NULL,
    content      TEXT NOT NULL,
    tool_calls   TEXT,
    tool_call_id TEXT,
    metadata     TEXT,
    ttl_seconds  INTEGER,
    expires_at   TEXT,
    created_at   TEXT NOT NULL,
    deleted_at   TEXT,
    PRIMARY KEY (tenant_id, card_id)
);
CREATE INDEX IF NOT EXISTS idx_cards_tenant_created ON cards (tenant_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_cards_tenant_tool_call ON cards (tenant_id, tool_call_id);
CREATE INDEX IF NOT EXISTS idx_cards_expiry ON cards (expires_at) WHERE expires_at IS NOT NULL;

CREATE TABLE IF NOT EXISTS card_boxes (
    box_id     TEXT PRIMARY KEY,
    tenant_id  TEXT NOT NULL,
    card_ids   TEXT NOT NULL,
    parent_ids TEXT,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_card_boxes_tenant ON card_boxes (tenant_id);

CREATE TABLE IF NOT EXISTS side_tasks (
    task_id    INTEGER PRIMARY KEY AUTOINCREMENT,
    card_id    TEXT NOT NULL,
    tenant_id  TEXT NOT NULL,
    operation  TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_side_tasks_tenant ON side_tasks (tenant_id, created_at);

CREATE TABLE IF NOT EXISTS operation_logs (
    log_id        INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id     TEXT NOT NULL,
    trace_id      TEXT NOT NULL,
    strategy_name TEXT NOT NULL,
    created_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_operation_logs_trace ON operation_logs (tenant_id, trace_id);

CREATE TABLE IF NOT EXISTS card_transformations (
    operation_log_id INTEGER NOT NULL REFERENCES operation_logs (log_id),
    source_card_id   TEXT NOT NULL,
    derived_card_id  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_transformations_derived ON card_transformations (derived_card_id);

CREATE TABLE IF NOT EXISTS card_box_logs (
    log_id         INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id      TEXT NOT NULL,
    trace_id       TEXT NOT NULL,
    strategy_name  TEXT NOT NULL,
    strategy_input TEXT,
    input_box      TEXT NOT NULL,
    output_box     TEXT NOT NULL,
    created_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS api_logs (
    log_id     INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id  TEXT NOT NULL,
    trace_id   TEXT NOT NULL,
    api_type   TEXT NOT NULL,
    endpoint   TEXT NOT NULL,
    request    TEXT,
    response   TEXT,
    created_at TEXT NOT NULL
);
";

/// Run the bootstrap batch on one connection.
pub fn bootstrap(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}
