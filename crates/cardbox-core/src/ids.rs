//! Prefixed, time-ordered identifiers.
//!
//! All ids are UUIDv7 strings with a short type prefix (`card_…`, `box_…`)
//! so they sort chronologically and are recognizable in logs and rows.

use uuid::Uuid;

/// Generate a new card id.
pub fn new_card_id() -> String {
    format!("card_{}", Uuid::now_v7())
}

/// Generate a new box id.
pub fn new_box_id() -> String {
    format!("box_{}", Uuid::now_v7())
}
