//! Domain model
//!
//! The [`Collection`] owns every entity by value in id-keyed maps. Entities
//! refer to each other by numeric id only; nothing outside the collection
//! holds a reference into it.

pub mod card;
pub mod collection;
pub mod deck;
pub mod media;
pub mod note;
pub mod notetype;
pub mod revlog;

pub use card::{Capabilities, Card, CardKind, CardOrigin, CardQueue, CardType, Scheduling};
pub use collection::{
    CardPolicy, Collection, CollectionMeta, ConfigEntry, DeckDeletion, DeckOptions, Grave,
    GraveKind, SubdeckPolicy, TagEntry, DEFAULT_DECK_NAME,
};
pub use deck::{Deck, DeckTreeNode};
pub use media::MediaFile;
pub use note::Note;
pub use notetype::{FieldDef, Model, ModelKind, TemplateDef};
pub use revlog::ReviewLogEntry;

use std::collections::BTreeMap;

pub type DeckId = i64;
pub type ModelId = i64;
pub type NoteId = i64;
pub type CardId = i64;
pub type DeckOptionsId = i64;

/// The distinguished default deck
pub const DEFAULT_DECK_ID: DeckId = 1;

/// Default deck options group
pub const DEFAULT_OPTIONS_ID: DeckOptionsId = 1;

/// Separator between note field values on disk
pub const FIELD_SEPARATOR: char = '\x1f';

/// Source data the model does not interpret
///
/// `json` is the complete JSON object an entity was read from (legacy
/// schema); on export the modeled keys are overwritten in place so key
/// order and unmodeled keys survive. `blobs` holds the raw protobuf configs
/// an entity was read from (modern schema), keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Opaque {
    pub json: serde_json::Map<String, serde_json::Value>,
    pub blobs: BTreeMap<String, Vec<u8>>,
}

impl Opaque {
    pub fn from_json(json: serde_json::Map<String, serde_json::Value>) -> Self {
        Opaque {
            json,
            blobs: BTreeMap::new(),
        }
    }

    pub fn with_blob(mut self, column: &str, blob: Vec<u8>) -> Self {
        self.blobs.insert(column.to_string(), blob);
        self
    }

    pub fn blob(&self, column: &str) -> Option<&[u8]> {
        self.blobs.get(column).map(Vec::as_slice)
    }
}

/// Current time in whole seconds
pub(crate) fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Current time in milliseconds
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Split a joined field string
pub fn split_fields(joined: &str) -> Vec<String> {
    joined.split(FIELD_SEPARATOR).map(str::to_string).collect()
}

/// Join field values for storage
pub fn join_fields(fields: &[String]) -> String {
    fields.join(&FIELD_SEPARATOR.to_string())
}

/// Split a stored tag string on whitespace, dropping duplicates
pub fn split_tags(joined: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in joined.split_whitespace() {
        if !tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            tags.push(tag.to_string());
        }
    }
    tags
}

/// Join tags in stored form (space padded, or empty)
pub fn join_tags(tags: &[String]) -> String {
    if tags.is_empty() {
        String::new()
    } else {
        format!(" {} ", tags.join(" "))
    }
}
