//! # cardbox-core
//!
//! Foundation types for the cardbox content-versioning engine.
//!
//! This crate provides the shared vocabulary the other cardbox crates build on:
//!
//! - **Content**: [`content::Content`] sealed union of card payload kinds,
//!   each self-validating against a [`config::UriPolicy`]
//! - **Cards**: [`card::Card`] immutable content unit with copy-on-write
//!   [`card::Card::update`]
//! - **Boxes**: [`card_box::CardBox`] ordered card-reference container with
//!   one-hop lineage via parent ids
//! - **IDs**: [`ids::new_card_id`] / [`ids::new_box_id`] prefixed UUIDv7
//! - **Errors**: [`error::ContentError`] via `thiserror`
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other cardbox crates. No I/O.

#![deny(unsafe_code)]

pub mod card;
pub mod card_box;
pub mod config;
pub mod content;
pub mod error;
pub mod ids;

pub use card::{Card, CardUpdate, ToolCall, ToolCallFunction, is_truthy};
pub use card_box::CardBox;
pub use config::UriPolicy;
pub use content::{
    AfterExecution, AudioFile, Content, FieldSchema, FieldsSchemaContent, FileContent, FileMeta,
    ImageFile, JsonContent, MultiFileContent, PdfFile, PreviewImage, TextContent, ToolCallContent,
    ToolContent, ToolResultContent, VideoFile,
};
pub use error::ContentError;
