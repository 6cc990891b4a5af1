//! The [`CardBox`] — an ordered collection of card references.
//!
//! A box holds card ids only (never embedded cards), so one card can be
//! referenced by any number of boxes and box-to-box ancestry is tracked
//! independently of card-to-card derivation. `parent_ids` records direct
//! upstream boxes — one hop, never the full chain.
//!
//! Boxes are mutable in memory and transient until a storage adapter
//! assigns a `box_id` on first save; persisted snapshots are immutable
//! history records.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Ordered card-reference container with one-hop lineage.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BoxRecord", into = "BoxRecord")]
pub struct CardBox {
    box_id: Option<String>,
    parent_ids: Option<Vec<String>>,
    card_ids: Vec<String>,
}

impl CardBox {
    /// Create an empty, transient box.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transient box with the given direct parents (normalized).
    pub fn with_parents<I, S>(parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cardbox = Self::new();
        cardbox.set_parent_ids(Some(parents.into_iter().map(Into::into).collect()));
        cardbox
    }

    /// Reassemble a box from stored parts, normalizing parents.
    pub fn from_parts(
        box_id: Option<String>,
        parent_ids: Option<Vec<String>>,
        card_ids: Vec<String>,
    ) -> Self {
        Self {
            box_id,
            parent_ids: normalize_parent_ids(parent_ids),
            card_ids,
        }
    }

    /// Storage identity, assigned by the adapter on first save.
    pub fn box_id(&self) -> Option<&str> {
        self.box_id.as_deref()
    }

    /// Set the storage identity. Called by storage adapters on save.
    pub fn set_box_id(&mut self, box_id: impl Into<String>) {
        self.box_id = Some(box_id.into());
    }

    /// Direct upstream box ids, if any.
    pub fn parent_ids(&self) -> Option<&[String]> {
        self.parent_ids.as_deref()
    }

    /// Replace the parent set. De-duplicates, drops empties, and collapses
    /// an empty list to `None`.
    pub fn set_parent_ids(&mut self, parent_ids: Option<Vec<String>>) {
        self.parent_ids = normalize_parent_ids(parent_ids);
    }

    /// The referenced card ids, in order.
    pub fn card_ids(&self) -> &[String] {
        &self.card_ids
    }

    /// Number of card references.
    pub fn len(&self) -> usize {
        self.card_ids.len()
    }

    /// Whether the box references no cards.
    pub fn is_empty(&self) -> bool {
        self.card_ids.is_empty()
    }

    /// Append one card id to the end.
    pub fn add(&mut self, card_id: impl Into<String>) {
        self.card_ids.push(card_id.into());
    }

    /// Insert one card id at the given position (clamped to the end).
    pub fn insert(&mut self, index: usize, card_id: impl Into<String>) {
        let index = index.min(self.card_ids.len());
        self.card_ids.insert(index, card_id.into());
    }

    /// Insert several card ids at the given position, preserving their
    /// relative order (clamped to the end).
    pub fn insert_many(&mut self, index: usize, card_ids: Vec<String>) {
        let index = index.min(self.card_ids.len());
        let tail = self.card_ids.split_off(index);
        self.card_ids.extend(card_ids);
        self.card_ids.extend(tail);
    }

    /// Swap the card ids at two positions.
    ///
    /// Panics if either index is out of bounds, like slice indexing.
    pub fn swap(&mut self, a: usize, b: usize) {
        self.card_ids.swap(a, b);
    }

    /// Remove the first reference to `card_id`. Returns whether a
    /// reference was removed.
    pub fn delete(&mut self, card_id: &str) -> bool {
        match self.card_ids.iter().position(|id| id == card_id) {
            Some(index) => {
                let _ = self.card_ids.remove(index);
                true
            }
            None => false,
        }
    }

    /// Replace the first reference to `old_card_id` with `new_card_id`.
    /// Returns whether a reference was replaced.
    pub fn replace(&mut self, old_card_id: &str, new_card_id: impl Into<String>) -> bool {
        match self.card_ids.iter().position(|id| id == old_card_id) {
            Some(index) => {
                self.card_ids[index] = new_card_id.into();
                true
            }
            None => false,
        }
    }

    /// The parents a derived box should record for this box: its own
    /// `box_id` when persisted, otherwise its existing parents.
    pub fn effective_parents(&self) -> Vec<String> {
        if let Some(box_id) = &self.box_id {
            return vec![box_id.clone()];
        }
        self.parent_ids.clone().unwrap_or_default()
    }

    /// Concatenate with another box into a new transient box.
    ///
    /// Card ids are appended in order; the new box's parents are the union
    /// of both inputs' effective parents, normalized.
    pub fn concat(&self, other: &CardBox) -> CardBox {
        let mut parents = self.effective_parents();
        parents.extend(other.effective_parents());

        let mut merged = CardBox::new();
        merged.card_ids = self
            .card_ids
            .iter()
            .chain(other.card_ids.iter())
            .cloned()
            .collect();
        merged.parent_ids = normalize_parent_ids(Some(parents));
        merged
    }
}

fn normalize_parent_ids(parent_ids: Option<Vec<String>>) -> Option<Vec<String>> {
    let parent_ids = parent_ids?;
    let mut seen: HashSet<String> = HashSet::new();
    let mut normalized: Vec<String> = Vec::new();
    for id in parent_ids {
        if !id.is_empty() && seen.insert(id.clone()) {
            normalized.push(id);
        }
    }
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Raw wire/storage form; deserialization converts through this so parent
/// ids are normalized on load.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct BoxRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    box_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent_ids: Option<Vec<String>>,
    #[serde(default)]
    card_ids: Vec<String>,
}

impl From<CardBox> for BoxRecord {
    fn from(cardbox: CardBox) -> Self {
        Self {
            box_id: cardbox.box_id,
            parent_ids: cardbox.parent_ids,
            card_ids: cardbox.card_ids,
        }
    }
}

impl From<BoxRecord> for CardBox {
    fn from(record: BoxRecord) -> Self {
        CardBox::from_parts(record.box_id, record.parent_ids, record.card_ids)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn positional_operations() {
        let mut cardbox = CardBox::new();
        cardbox.add("a");
        cardbox.add("c");
        cardbox.insert(1, "b");
        assert_eq!(cardbox.card_ids(), ["a", "b", "c"]);

        cardbox.insert_many(1, vec!["x".to_string(), "y".to_string()]);
        assert_eq!(cardbox.card_ids(), ["a", "x", "y", "b", "c"]);

        cardbox.swap(0, 4);
        assert_eq!(cardbox.card_ids(), ["c", "x", "y", "b", "a"]);

        assert!(cardbox.delete("y"));
        assert!(!cardbox.delete("y"));
        assert!(cardbox.replace("x", "z"));
        assert!(!cardbox.replace("missing", "q"));
        assert_eq!(cardbox.card_ids(), ["c", "z", "b", "a"]);
    }

    #[test]
    fn insert_clamps_to_end() {
        let mut cardbox = CardBox::new();
        cardbox.add("a");
        cardbox.insert(99, "b");
        assert_eq!(cardbox.card_ids(), ["a", "b"]);
    }

    #[test]
    fn parent_ids_normalize_to_none_when_empty() {
        let mut cardbox = CardBox::new();
        cardbox.set_parent_ids(Some(vec![String::new(), String::new()]));
        assert_eq!(cardbox.parent_ids(), None);

        cardbox.set_parent_ids(Some(vec![
            "p1".to_string(),
            "p2".to_string(),
            "p1".to_string(),
        ]));
        assert_eq!(cardbox.parent_ids(), Some(&["p1".to_string(), "p2".to_string()][..]));
    }

    #[test]
    fn concat_unions_effective_parents() {
        let mut persisted = CardBox::new();
        persisted.set_box_id("box_1");
        persisted.add("a");

        let mut transient = CardBox::with_parents(["box_2", "box_3"]);
        transient.add("b");

        let merged = persisted.concat(&transient);
        assert_eq!(merged.card_ids(), ["a", "b"]);
        assert_eq!(merged.box_id(), None);
        assert_eq!(
            merged.parent_ids(),
            Some(&["box_1".to_string(), "box_2".to_string(), "box_3".to_string()][..])
        );
    }

    #[test]
    fn concat_of_parentless_boxes_has_no_parents() {
        let mut a = CardBox::new();
        a.add("a");
        let b = CardBox::new();
        assert_eq!(a.concat(&b).parent_ids(), None);
    }

    #[test]
    fn serde_round_trip_normalizes_parents() {
        let raw = r#"{"box_id":"box_9","parent_ids":["p","p",""],"card_ids":["c1","c2"]}"#;
        let cardbox: CardBox = serde_json::from_str(raw).unwrap();
        assert_eq!(cardbox.parent_ids(), Some(&["p".to_string()][..]));
        assert_eq!(cardbox.box_id(), Some("box_9"));

        let text = serde_json::to_string(&cardbox).unwrap();
        let back: CardBox = serde_json::from_str(&text).unwrap();
        assert_eq!(back, cardbox);
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(ids in proptest::collection::vec("[a-z0-9]{0,6}", 0..12)) {
            let once = normalize_parent_ids(Some(ids));
            let twice = normalize_parent_ids(once.clone());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn normalized_parents_are_unique_and_non_empty(
            ids in proptest::collection::vec("[a-z0-9]{0,6}", 0..12)
        ) {
            if let Some(normalized) = normalize_parent_ids(Some(ids)) {
                let mut seen = HashSet::new();
                for id in &normalized {
                    prop_assert!(!id.is_empty());
                    prop_assert!(seen.insert(id.clone()));
                }
                prop_assert!(!normalized.is_empty());
            }
        }
    }
}
