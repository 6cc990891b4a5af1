//! The strategy contract.
//!
//! A strategy maps an input box to a new box while persisting any derived
//! cards through the card store. The contract every implementation (and
//! the tests) hold:
//!
//! - every input card id appears exactly once — either as a relationship
//!   map key, or as an error entry whose card is carried into the new box
//!   unchanged (fail-open per card, never per box)
//! - cards are never mutated in place; "transformation" means persisting
//!   new cards and mapping old id → new id(s)
//! - relative card order is preserved unless the strategy explicitly
//!   reorders

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use cardbox_core::CardBox;
use cardbox_files::FileAdapter;
use cardbox_store::CardStore;
use serde_json::Value;

use crate::error::EngineError;

/// One per-card failure reported by a strategy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransformationError {
    /// The input card that failed.
    pub source_card_id: String,
    /// What went wrong.
    pub message: String,
}

/// The outcome of one strategy application.
#[derive(Clone, Debug, Default)]
pub struct TransformationResult {
    /// The produced box.
    pub new_box: CardBox,
    /// source card id → derived card id(s). A pass-through card maps to
    /// itself.
    pub relationship_map: BTreeMap<String, Vec<String>>,
    /// Per-card failures; their cards ride along in `new_box` unchanged.
    pub errors: Vec<TransformationError>,
}

impl TransformationResult {
    /// Carry a card through unchanged, mapping it to itself.
    pub fn pass_through(&mut self, card_id: &str) {
        self.new_box.add(card_id);
        let _ = self
            .relationship_map
            .insert(card_id.to_string(), vec![card_id.to_string()]);
    }

    /// Record a per-card failure and carry the original card unchanged.
    pub fn fail_open(&mut self, card_id: &str, message: impl Into<String>) {
        self.new_box.add(card_id);
        self.errors.push(TransformationError {
            source_card_id: card_id.to_string(),
            message: message.into(),
        });
    }

    /// Record the derived ids for a source card. The strategy has already
    /// appended the derived cards to `new_box` in order.
    pub fn map_to(&mut self, source_card_id: &str, derived_ids: Vec<String>) {
        let _ = self
            .relationship_map
            .insert(source_card_id.to_string(), derived_ids);
    }
}

/// A pluggable transformation over a card box.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Stable strategy name, recorded in operation and box logs.
    fn name(&self) -> &'static str;

    /// Apply the transformation.
    ///
    /// `input` carries strategy-specific parameters as JSON; the engine
    /// stringifies it for box-history logs. Per-card failures go into the
    /// result — only storage-level failures abort the call.
    async fn apply(
        &self,
        cardbox: &CardBox,
        card_store: &CardStore,
        input: Option<&Value>,
        files: &dyn FileAdapter,
    ) -> Result<TransformationResult, EngineError>;
}

/// One pipeline step: a strategy plus its optional input.
pub type StrategyStep = (Arc<dyn Strategy>, Option<Value>);
