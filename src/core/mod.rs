//! Package engine core
//!
//! Subsystems, leaves first:
//!
//! - [`compression`], [`meta`], [`container`] - the zip bundle, its `meta`
//!   entry and zstd framing of the modern entries
//! - [`manifest`] - the media manifest in its JSON and protobuf forms
//! - [`database`] - SQLite images held in memory between reads and writes
//! - [`schema`] - rows to model and back, for both schema generations
//! - [`model`] - the collection and its entities, with [`ids`] and
//!   [`validation`]
//! - [`render`] - card templates, cloze deletions and inline media
//! - [`tracker`] - edits, origin-based deletion and undo/redo
//! - [`export`] - row selection and package assembly
//! - [`config`] - engine settings
//!
//! Read path: container → schema → model. Write path: model → export →
//! schema → manifest → container.

pub mod compression;
pub mod config;
pub mod container;
pub mod database;
pub mod error;
pub mod export;
pub mod ids;
pub mod manifest;
pub mod meta;
pub mod model;
pub mod render;
pub mod schema;
pub mod tracker;
pub mod validation;

pub use config::EngineConfig;
pub use error::{ApkgError, MutationError, Result};
pub use model::Collection;
