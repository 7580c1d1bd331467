//! Decks and the derived deck tree

use super::{DeckId, DeckOptionsId, Opaque, DEFAULT_OPTIONS_ID};
use crate::validation::DECK_SEPARATOR;
use serde::Serialize;

/// A deck
///
/// `name` is the fully qualified name (`Parent::Child`). `parent_id` and
/// `children` are kept consistent with the name by the collection; they are
/// never edited directly by callers.
#[derive(Debug, Clone, PartialEq)]
pub struct Deck {
    pub id: DeckId,
    pub name: String,
    pub description: String,
    pub parent_id: Option<DeckId>,
    /// Child decks in display order
    pub children: Vec<DeckId>,
    /// Filtered (dynamic) deck
    pub filtered: bool,
    /// Options group, `None` for filtered decks
    pub options_id: Option<DeckOptionsId>,
    /// Modification time in seconds
    pub mtime: i64,
    pub usn: i32,
    pub raw: Opaque,
}

impl Deck {
    /// A normal deck using the default options group
    pub fn new(id: DeckId, name: impl Into<String>) -> Self {
        Deck {
            id,
            name: name.into(),
            description: String::new(),
            parent_id: None,
            children: Vec::new(),
            filtered: false,
            options_id: Some(DEFAULT_OPTIONS_ID),
            mtime: super::now_secs(),
            usn: -1,
            raw: Opaque::default(),
        }
    }

    /// Last name segment
    pub fn leaf_name(&self) -> &str {
        self.name.rsplit(DECK_SEPARATOR).next().unwrap_or(&self.name)
    }

    /// Full name of the parent implied by `name`
    pub fn parent_name(&self) -> Option<&str> {
        self.name.rfind(DECK_SEPARATOR).map(|idx| &self.name[..idx])
    }

    pub(crate) fn touch(&mut self) {
        self.mtime = super::now_secs();
        self.usn = -1;
    }
}

/// One node of the materialized deck tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeckTreeNode {
    pub id: DeckId,
    pub name: String,
    pub full_name: String,
    pub children: Vec<DeckTreeNode>,
}

impl DeckTreeNode {
    /// Depth-first ids of this node and all descendants
    pub fn ids(&self) -> Vec<DeckId> {
        let mut out = vec![self.id];
        for child in &self.children {
            out.extend(child.ids());
        }
        out
    }

    pub fn find(&self, id: DeckId) -> Option<&DeckTreeNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }
}
