//! Card repository — upsert, lookups, filtered listings, TTL sweep.

use cardbox_core::Card;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, ToSql, params, params_from_iter};
use serde_json::Value;

use super::{metadata_path, timestamp};
use crate::adapter::{CardQuery, MetadataFilters};
use crate::error::{Result, StoreError};

const CARD_COLUMNS: &str = "card_id, content, tool_calls, tool_call_id, metadata, ttl_seconds";

/// Raw card row, mapped inside rusqlite closures and decoded afterwards.
struct CardRow {
    card_id: String,
    content: String,
    tool_calls: Option<String>,
    tool_call_id: Option<String>,
    metadata: Option<String>,
    ttl_seconds: Option<i64>,
}

impl CardRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            card_id: row.get(0)?,
            content: row.get(1)?,
            tool_calls: row.get(2)?,
            tool_call_id: row.get(3)?,
            metadata: row.get(4)?,
            ttl_seconds: row.get(5)?,
        })
    }

    /// Decode into a validated [`Card`].
    ///
    /// The content body is required — a malformed value raises. Optional
    /// JSON fields degrade to their defaults instead.
    fn into_card(self) -> Result<Card> {
        let content: Value = serde_json::from_str(&self.content).map_err(|e| {
            StoreError::Corrupt(format!("card {} has unreadable content: {e}", self.card_id))
        })?;

        let mut record = serde_json::Map::new();
        let _ = record.insert("card_id".to_string(), Value::String(self.card_id.clone()));
        let _ = record.insert("content".to_string(), content);
        if let Some(text) = self.tool_calls.as_deref() {
            if let Ok(value) = serde_json::from_str::<Value>(text) {
                let _ = record.insert("tool_calls".to_string(), value);
            }
        }
        if let Some(id) = self.tool_call_id {
            let _ = record.insert("tool_call_id".to_string(), Value::String(id));
        }
        if let Some(ttl) = self.ttl_seconds {
            let _ = record.insert("ttl_seconds".to_string(), Value::from(ttl));
        }
        let metadata = self
            .metadata
            .as_deref()
            .and_then(|text| serde_json::from_str::<Value>(text).ok())
            .filter(Value::is_object)
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        let _ = record.insert("metadata".to_string(), metadata);

        serde_json::from_value(Value::Object(record)).map_err(|e| {
            StoreError::Corrupt(format!("card {} failed revalidation: {e}", self.card_id))
        })
    }
}

/// Card table access. Stateless; every method takes `&Connection`.
pub struct CardRepo;

impl CardRepo {
    /// Insert or fully replace a card, clearing any soft-delete marker.
    ///
    /// A TTL becomes an absolute `expires_at` computed from `now`; the
    /// original `created_at` is preserved on replace so listing order is
    /// stable.
    pub fn upsert(conn: &Connection, card: &Card, tenant_id: &str, now: DateTime<Utc>) -> Result<()> {
        let content = serde_json::to_string(card.content())?;
        let tool_calls = card
            .tool_calls()
            .map(serde_json::to_string)
            .transpose()?;
        let metadata = if card.metadata().is_empty() {
            None
        } else {
            Some(serde_json::to_string(card.metadata())?)
        };
        let expires_at = card
            .ttl_seconds()
            .map(|ttl| timestamp(now + Duration::seconds(ttl)));

        let _ = conn.execute(
            "INSERT INTO cards
                 (card_id, tenant_id, content, tool_calls, tool_call_id, metadata,
                  ttl_seconds, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT (tenant_id, card_id) DO UPDATE SET
                 content = excluded.content,
                 tool_calls = excluded.tool_calls,
                 tool_call_id = excluded.tool_call_id,
                 metadata = excluded.metadata,
                 ttl_seconds = excluded.ttl_seconds,
                 expires_at = excluded.expires_at,
                 deleted_at = NULL",
            params![
                card.card_id(),
                tenant_id,
                content,
                tool_calls,
                card.tool_call_id(),
                metadata,
                card.ttl_seconds(),
                expires_at,
                timestamp(now),
            ],
        )?;
        Ok(())
    }

    /// Fetch a live card by id.
    pub fn get(conn: &Connection, card_id: &str, tenant_id: &str) -> Result<Option<Card>> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {CARD_COLUMNS} FROM cards
                     WHERE card_id = ?1 AND tenant_id = ?2 AND deleted_at IS NULL"
                ),
                params![card_id, tenant_id],
                CardRow::from_row,
            )
            .optional()?;
        row.map(CardRow::into_card).transpose()
    }

    /// List cards newest-created-first with filters and paging.
    pub fn list(conn: &Connection, tenant_id: &str, query: &CardQuery) -> Result<Vec<Card>> {
        let mut sql = format!("SELECT {CARD_COLUMNS} FROM cards WHERE tenant_id = ?");
        let mut args: Vec<Box<dyn ToSql>> = vec![Box::new(tenant_id.to_string())];

        if !query.include_deleted {
            sql.push_str(" AND deleted_at IS NULL");
        }
        push_metadata_filters(&mut sql, &mut args, &query.metadata_filters);
        sql.push_str(" ORDER BY created_at DESC, card_id DESC");

        match (query.limit, query.offset) {
            (Some(limit), 0) => {
                sql.push_str(" LIMIT ?");
                args.push(Box::new(i64::from(limit)));
            }
            (Some(limit), offset) => {
                sql.push_str(" LIMIT ? OFFSET ?");
                args.push(Box::new(i64::from(limit)));
                args.push(Box::new(i64::from(offset)));
            }
            (None, offset) if offset > 0 => {
                sql.push_str(" LIMIT -1 OFFSET ?");
                args.push(Box::new(i64::from(offset)));
            }
            (None, _) => {}
        }

        Self::collect(conn, &sql, args)
    }

    /// List cards whose `tool_call_id` is in the given set.
    pub fn list_by_tool_call_ids(
        conn: &Connection,
        tenant_id: &str,
        tool_call_ids: &[String],
        metadata_filters: &MetadataFilters,
        include_deleted: bool,
        limit: Option<u32>,
    ) -> Result<Vec<Card>> {
        if tool_call_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; tool_call_ids.len()].join(", ");
        let mut sql = format!(
            "SELECT {CARD_COLUMNS} FROM cards
             WHERE tenant_id = ? AND tool_call_id IN ({placeholders})"
        );
        let mut args: Vec<Box<dyn ToSql>> = vec![Box::new(tenant_id.to_string())];
        for id in tool_call_ids {
            args.push(Box::new(id.clone()));
        }
        if !include_deleted {
            sql.push_str(" AND deleted_at IS NULL");
        }
        push_metadata_filters(&mut sql, &mut args, metadata_filters);
        sql.push_str(" ORDER BY created_at DESC, card_id DESC");
        if let Some(limit) = limit {
            sql.push_str(" LIMIT ?");
            args.push(Box::new(i64::from(limit)));
        }

        Self::collect(conn, &sql, args)
    }

    /// Fetch a set of cards by id.
    pub fn list_by_ids(
        conn: &Connection,
        tenant_id: &str,
        card_ids: &[String],
        include_deleted: bool,
    ) -> Result<Vec<Card>> {
        if card_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; card_ids.len()].join(", ");
        let mut sql = format!(
            "SELECT {CARD_COLUMNS} FROM cards
             WHERE tenant_id = ? AND card_id IN ({placeholders})"
        );
        let mut args: Vec<Box<dyn ToSql>> = vec![Box::new(tenant_id.to_string())];
        for id in card_ids {
            args.push(Box::new(id.clone()));
        }
        if !include_deleted {
            sql.push_str(" AND deleted_at IS NULL");
        }

        Self::collect(conn, &sql, args)
    }

    /// Soft-delete every card whose expiry is at or before `now`.
    pub fn expire(conn: &Connection, now: DateTime<Utc>) -> Result<usize> {
        let stamp = timestamp(now);
        let changed = conn.execute(
            "UPDATE cards SET deleted_at = ?1
             WHERE deleted_at IS NULL AND expires_at IS NOT NULL AND expires_at <= ?1",
            params![stamp],
        )?;
        Ok(changed)
    }

    fn collect(conn: &Connection, sql: &str, args: Vec<Box<dyn ToSql>>) -> Result<Vec<Card>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(args), CardRow::from_row)?;
        let mut cards = Vec::new();
        for row in rows {
            cards.push(row?.into_card()?);
        }
        Ok(cards)
    }
}

fn push_metadata_filters(sql: &mut String, args: &mut Vec<Box<dyn ToSql>>, filters: &MetadataFilters) {
    for (key, expected) in filters {
        let path = metadata_path(key);
        match expected {
            None => {
                sql.push_str(" AND json_extract(metadata, ?) IS NULL");
                args.push(Box::new(path));
            }
            Some(value) => {
                sql.push_str(" AND CAST(json_extract(metadata, ?) AS TEXT) = ?");
                args.push(Box::new(path));
                args.push(Box::new(value.clone()));
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use crate::sqlite::schema;
    use cardbox_core::{Content, TextContent};
    use serde_json::json;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::bootstrap(&conn).unwrap();
        conn
    }

    fn text_card(text: &str) -> Card {
        Card::new(Content::Text(TextContent {
            text: text.to_string(),
        }))
        .unwrap()
    }

    #[test]
    fn upsert_and_get_round_trip() {
        let conn = setup();
        let card = text_card("hello")
            .with_tool_call_id("call_1")
            .with_ttl_seconds(300)
            .with_meta("step_id", json!("s1"));
        CardRepo::upsert(&conn, &card, "t", Utc::now()).unwrap();

        let loaded = CardRepo::get(&conn, card.card_id(), "t").unwrap().unwrap();
        assert_eq!(loaded, card);
    }

    #[test]
    fn get_is_tenant_scoped() {
        let conn = setup();
        let card = text_card("scoped");
        CardRepo::upsert(&conn, &card, "tenant-a", Utc::now()).unwrap();
        assert!(CardRepo::get(&conn, card.card_id(), "tenant-b").unwrap().is_none());
    }

    #[test]
    fn same_card_id_under_two_tenants_stays_separate() {
        let conn = setup();
        let card = text_card("tenant A's body");
        CardRepo::upsert(&conn, &card, "tenant-a", Utc::now()).unwrap();

        // A colliding write from another tenant must not touch A's row.
        let raw = serde_json::json!({
            "card_id": card.card_id(),
            "content": {"__type__": "TextContent", "text": "tenant B's body"},
            "metadata": {}
        });
        let intruder: Card = serde_json::from_value(raw).unwrap();
        CardRepo::upsert(&conn, &intruder, "tenant-b", Utc::now()).unwrap();

        let a = CardRepo::get(&conn, card.card_id(), "tenant-a").unwrap().unwrap();
        assert_eq!(a.text(), "tenant A's body");
        let b = CardRepo::get(&conn, card.card_id(), "tenant-b").unwrap().unwrap();
        assert_eq!(b.text(), "tenant B's body");
    }

    #[test]
    fn list_filters_and_orders() {
        let conn = setup();
        let base = Utc::now();
        let a = text_card("a").with_meta("type", json!("note"));
        let b = text_card("b").with_meta("type", json!("note"));
        let c = text_card("c");
        CardRepo::upsert(&conn, &a, "t", base).unwrap();
        CardRepo::upsert(&conn, &b, "t", base + Duration::seconds(1)).unwrap();
        CardRepo::upsert(&conn, &c, "t", base + Duration::seconds(2)).unwrap();

        let query = CardQuery::default().with_filter("type", Some("note".to_string()));
        let cards = CardRepo::list(&conn, "t", &query).unwrap();
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].card_id(), b.card_id());
        assert_eq!(cards[1].card_id(), a.card_id());

        // Absent-key filter matches only the untagged card.
        let absent = CardQuery::default().with_filter("type", None);
        let cards = CardRepo::list(&conn, "t", &absent).unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].card_id(), c.card_id());
    }

    #[test]
    fn list_paging() {
        let conn = setup();
        let base = Utc::now();
        for i in 0..5 {
            let card = text_card(&format!("card {i}"));
            CardRepo::upsert(&conn, &card, "t", base + Duration::seconds(i)).unwrap();
        }
        let query = CardQuery {
            limit: Some(2),
            offset: 1,
            ..CardQuery::default()
        };
        let cards = CardRepo::list(&conn, "t", &query).unwrap();
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].text(), "card 3");
        assert_eq!(cards[1].text(), "card 2");
    }

    #[test]
    fn numeric_metadata_compares_as_text() {
        let conn = setup();
        let card = text_card("n").with_meta("attempt", json!(2));
        CardRepo::upsert(&conn, &card, "t", Utc::now()).unwrap();

        let query = CardQuery::default().with_filter("attempt", Some("2".to_string()));
        assert_eq!(CardRepo::list(&conn, "t", &query).unwrap().len(), 1);
    }

    #[test]
    fn list_by_tool_call_ids_scopes_and_filters() {
        let conn = setup();
        let result_a = text_card("r1")
            .with_tool_call_id("call_a")
            .with_meta("type", json!("tool.result"));
        let result_b = text_card("r2")
            .with_tool_call_id("call_b")
            .with_meta("type", json!("tool.result"));
        CardRepo::upsert(&conn, &result_a, "t", Utc::now()).unwrap();
        CardRepo::upsert(&conn, &result_b, "t", Utc::now()).unwrap();

        let mut filters = MetadataFilters::new();
        filters.insert("type".to_string(), Some("tool.result".to_string()));
        let cards = CardRepo::list_by_tool_call_ids(
            &conn,
            "t",
            &["call_a".to_string()],
            &filters,
            false,
            None,
        )
        .unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].tool_call_id(), Some("call_a"));
    }

    #[test]
    fn expire_marks_and_upsert_revives() {
        let conn = setup();
        let now = Utc::now();
        let card = text_card("ttl").with_ttl_seconds(10);
        CardRepo::upsert(&conn, &card, "t", now).unwrap();

        assert_eq!(CardRepo::expire(&conn, now + Duration::seconds(5)).unwrap(), 0);
        assert_eq!(CardRepo::expire(&conn, now + Duration::seconds(11)).unwrap(), 1);
        assert!(CardRepo::get(&conn, card.card_id(), "t").unwrap().is_none());

        // Replacing the card clears the soft delete.
        CardRepo::upsert(&conn, &card, "t", now + Duration::seconds(20)).unwrap();
        assert!(CardRepo::get(&conn, card.card_id(), "t").unwrap().is_some());
    }

    #[test]
    fn malformed_optional_fields_degrade_but_content_raises() {
        let conn = setup();
        conn.execute(
            "INSERT INTO cards (card_id, tenant_id, content, metadata, created_at)
             VALUES ('card_ok', 't', ?1, 'not json', ?2)",
            params![
                r#"{"__type__":"TextContent","text":"fine"}"#,
                timestamp(Utc::now())
            ],
        )
        .unwrap();
        let card = CardRepo::get(&conn, "card_ok", "t").unwrap().unwrap();
        assert!(card.metadata().is_empty());

        conn.execute(
            "INSERT INTO cards (card_id, tenant_id, content, created_at)
             VALUES ('card_bad', 't', 'not json', ?1)",
            params![timestamp(Utc::now())],
        )
        .unwrap();
        assert!(matches!(
            CardRepo::get(&conn, "card_bad", "t"),
            Err(StoreError::Corrupt(_))
        ));
    }
}
