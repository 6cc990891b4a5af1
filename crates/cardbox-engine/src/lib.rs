//! # cardbox-engine
//!
//! The orchestration core:
//!
//! - **[`strategy::Strategy`]**: the transformation unit — consumes a box
//!   and a card store, produces a new box, a lineage map, and per-card
//!   errors (fail-open per card, never per box)
//! - **[`strategies`]**: extract-code, inline-text-file, and pdf-to-text
//! - **[`engine::ContextEngine`]**: runs strategy sequences with lineage
//!   auto-fill, side-task scheduling, and history recording, and projects
//!   boxes into model requests ([`engine::ContextEngine::to_api`] /
//!   [`engine::ContextEngine::call_model`])
//! - **[`modifier::RequestModifier`]**: post-projection request rewriting
//!   (e.g. inlining file references as base64 data URLs)

#![deny(unsafe_code)]

pub mod engine;
pub mod error;
pub mod modifier;
pub mod projection;
pub mod strategies;
pub mod strategy;

pub use engine::{ContextEngine, EngineConfig, EngineOverrides, HistoryLevel};
pub use error::EngineError;
pub use modifier::{InlineFileDataModifier, RequestModifier};
pub use projection::BackendMode;
pub use strategies::{ExtractCodeStrategy, InlineTextFileStrategy, PdfToTextStrategy};
pub use strategy::{Strategy, StrategyStep, TransformationError, TransformationResult};
