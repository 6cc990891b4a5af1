//! Card-box repository — save-or-update, append, load.

use cardbox_core::{CardBox, ids};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::timestamp;
use crate::error::{Result, StoreError};

/// Card-box table access. Stateless; every method takes `&Connection`.
pub struct BoxRepo;

impl BoxRepo {
    /// Save a transient box (assigning a fresh id, written back onto the
    /// box) or replace an existing one. Updating an id that does not exist
    /// for the tenant fails with [`StoreError::BoxNotFound`].
    pub fn save(
        conn: &Connection,
        cardbox: &mut CardBox,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let card_ids = serde_json::to_string(cardbox.card_ids())?;
        let parent_ids = cardbox
            .parent_ids()
            .map(serde_json::to_string)
            .transpose()?;

        match cardbox.box_id() {
            None => {
                let box_id = ids::new_box_id();
                let _ = conn.execute(
                    "INSERT INTO card_boxes (box_id, tenant_id, card_ids, parent_ids, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![box_id, tenant_id, card_ids, parent_ids, timestamp(now)],
                )?;
                cardbox.set_box_id(box_id.clone());
                Ok(box_id)
            }
            Some(box_id) => {
                let changed = conn.execute(
                    "UPDATE card_boxes
                     SET card_ids = ?1, parent_ids = ?2, updated_at = ?3
                     WHERE box_id = ?4 AND tenant_id = ?5",
                    params![card_ids, parent_ids, timestamp(now), box_id, tenant_id],
                )?;
                if changed == 0 {
                    return Err(StoreError::BoxNotFound {
                        box_id: box_id.to_string(),
                        tenant_id: tenant_id.to_string(),
                    });
                }
                Ok(box_id.to_string())
            }
        }
    }

    /// Append card ids to the end of an existing box.
    ///
    /// Read-modify-write; the caller wraps this in a transaction. An empty
    /// id list is a no-op that still verifies the box exists.
    pub fn append(
        conn: &Connection,
        box_id: &str,
        tenant_id: &str,
        card_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<String> {
        let mut cardbox =
            Self::load(conn, box_id, tenant_id)?.ok_or_else(|| StoreError::BoxNotFound {
                box_id: box_id.to_string(),
                tenant_id: tenant_id.to_string(),
            })?;
        if card_ids.is_empty() {
            return Ok(box_id.to_string());
        }
        for card_id in card_ids {
            cardbox.add(card_id.clone());
        }
        let serialized = serde_json::to_string(cardbox.card_ids())?;
        let _ = conn.execute(
            "UPDATE card_boxes SET card_ids = ?1, updated_at = ?2
             WHERE box_id = ?3 AND tenant_id = ?4",
            params![serialized, timestamp(now), box_id, tenant_id],
        )?;
        Ok(box_id.to_string())
    }

    /// Load a box by id.
    pub fn load(conn: &Connection, box_id: &str, tenant_id: &str) -> Result<Option<CardBox>> {
        let row: Option<(String, Option<String>)> = conn
            .query_row(
                "SELECT card_ids, parent_ids FROM card_boxes
                 WHERE box_id = ?1 AND tenant_id = ?2",
                params![box_id, tenant_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((card_ids_text, parent_ids_text)) = row else {
            return Ok(None);
        };

        // Reference lists degrade to defaults when unreadable.
        let card_ids: Vec<String> = serde_json::from_str(&card_ids_text).unwrap_or_default();
        let parent_ids: Option<Vec<String>> = parent_ids_text
            .as_deref()
            .and_then(|text| serde_json::from_str(text).ok());

        Ok(Some(CardBox::from_parts(
            Some(box_id.to_string()),
            parent_ids,
            card_ids,
        )))
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

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::bootstrap(&conn).unwrap();
        conn
    }

    #[test]
    fn first_save_assigns_id_and_load_round_trips() {
        let conn = setup();
        let mut cardbox = CardBox::with_parents(["box_parent"]);
        cardbox.add("c1");
        cardbox.add("c2");

        let box_id = BoxRepo::save(&conn, &mut cardbox, "t", Utc::now()).unwrap();
        assert_eq!(cardbox.box_id(), Some(box_id.as_str()));

        let loaded = BoxRepo::load(&conn, &box_id, "t").unwrap().unwrap();
        assert_eq!(loaded.card_ids(), ["c1", "c2"]);
        assert_eq!(loaded.parent_ids(), Some(&["box_parent".to_string()][..]));
    }

    #[test]
    fn update_requires_existing_id() {
        let conn = setup();
        let mut cardbox = CardBox::new();
        cardbox.set_box_id("box_ghost");
        let err = BoxRepo::save(&conn, &mut cardbox, "t", Utc::now()).unwrap_err();
        assert!(matches!(err, StoreError::BoxNotFound { .. }));
    }

    #[test]
    fn resave_replaces_contents() {
        let conn = setup();
        let mut cardbox = CardBox::new();
        cardbox.add("c1");
        let box_id = BoxRepo::save(&conn, &mut cardbox, "t", Utc::now()).unwrap();

        assert!(cardbox.delete("c1"));
        cardbox.add("c2");
        BoxRepo::save(&conn, &mut cardbox, "t", Utc::now()).unwrap();

        let loaded = BoxRepo::load(&conn, &box_id, "t").unwrap().unwrap();
        assert_eq!(loaded.card_ids(), ["c2"]);
    }

    #[test]
    fn append_preserves_order_and_handles_empty() {
        let conn = setup();
        let mut cardbox = CardBox::new();
        cardbox.add("c1");
        let box_id = BoxRepo::save(&conn, &mut cardbox, "t", Utc::now()).unwrap();

        BoxRepo::append(
            &conn,
            &box_id,
            "t",
            &["c2".to_string(), "c3".to_string()],
            Utc::now(),
        )
        .unwrap();
        BoxRepo::append(&conn, &box_id, "t", &[], Utc::now()).unwrap();

        let loaded = BoxRepo::load(&conn, &box_id, "t").unwrap().unwrap();
        assert_eq!(loaded.card_ids(), ["c1", "c2", "c3"]);

        let err = BoxRepo::append(&conn, "box_missing", "t", &[], Utc::now()).unwrap_err();
        assert!(matches!(err, StoreError::BoxNotFound { .. }));
    }

    #[test]
    fn load_is_tenant_scoped() {
        let conn = setup();
        let mut cardbox = CardBox::new();
        let box_id = BoxRepo::save(&conn, &mut cardbox, "tenant-a", Utc::now()).unwrap();
        assert!(BoxRepo::load(&conn, &box_id, "tenant-b").unwrap().is_none());
    }
}
