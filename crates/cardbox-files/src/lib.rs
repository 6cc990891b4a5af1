//! # cardbox-files
//!
//! Byte-reading capabilities for the cardbox engine:
//!
//! - **[`adapter::FileAdapter`]**: `read(uri) -> bytes` over local paths,
//!   `file://`, `s3://`, and `http(s)://`, with distinguishable
//!   not-found / unsupported-scheme / I/O failures
//! - **[`object::ObjectPointer`]**: immutable metadata (URI, checksum, size,
//!   expiry) describing bytes that live outside the card store
//! - **[`object::ObjectReader`]**: ranged reads, streaming, and `head`
//!   metadata lookups against external object storage
//!
//! ## Crate Position
//!
//! Leaf capability crate. Consumed by strategies and request modifiers;
//! depends on nothing else in the workspace.

#![deny(unsafe_code)]

pub mod adapter;
pub mod object;

pub use adapter::{
    FileAdapter, FileError, InMemoryFileAdapter, LocalFileAdapter, RemoteFileAdapter,
    RemoteFileConfig, StandardFileAdapter,
};
pub use object::{ByteStream, HttpObjectReader, ObjectError, ObjectPointer, ObjectReader};
