//! The collection: owner of every entity
//!
//! Entities live in id-keyed maps. The deck tree is derived from the decks'
//! parent pointers and rebuilt after every structural change, so the map and
//! the tree can never disagree.

use super::{
    Card, CardId, CardKind, Deck, DeckId, DeckOptionsId, DeckTreeNode, MediaFile, Model, ModelId,
    Note, NoteId, Opaque, ReviewLogEntry, DEFAULT_DECK_ID, DEFAULT_OPTIONS_ID,
};
use crate::error::MutationError;
use crate::ids::IdSource;
use crate::meta::PackageVersion;
use crate::validation::{validate_media_filename, DeckName, DECK_SEPARATOR};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

type MutResult<T> = std::result::Result<T, MutationError>;

/// Name of the default deck in a new collection
pub const DEFAULT_DECK_NAME: &str = "Default";

/// Collection-level metadata (the `col` row)
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionMeta {
    /// Creation time in seconds
    pub created: i64,
    /// Modification time in milliseconds
    pub mtime: i64,
    /// Schema modification time in milliseconds
    pub schema_mtime: i64,
    /// Schema version the collection was read with
    pub schema_version: i64,
    pub dirty: i64,
    pub usn: i32,
    pub last_sync: i64,
    /// Legacy collection config (`col.conf`)
    pub conf: serde_json::Map<String, serde_json::Value>,
}

impl Default for CollectionMeta {
    fn default() -> Self {
        let conf = serde_json::json!({
            "activeDecks": [DEFAULT_DECK_ID],
            "curDeck": DEFAULT_DECK_ID,
            "newSpread": 0,
            "collapseTime": 1200,
            "timeLim": 0,
            "estTimes": true,
            "dueCounts": true,
            "curModel": null,
            "nextPos": 1,
            "sortType": "noteFld",
            "sortBackwards": false,
            "addToCur": true
        });
        let now = super::now_millis();
        CollectionMeta {
            created: now / 1000,
            mtime: now,
            schema_mtime: now,
            schema_version: 11,
            dirty: 0,
            usn: 0,
            last_sync: 0,
            conf: match conf {
                serde_json::Value::Object(map) => map,
                _ => serde_json::Map::new(),
            },
        }
    }
}

/// A row of the modern `config` table, kept verbatim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub key: String,
    pub usn: i32,
    pub mtime: i64,
    pub value: Vec<u8>,
}

/// A known tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagEntry {
    pub name: String,
    pub usn: i32,
    pub collapsed: bool,
    /// Modern `tags.config` blob
    pub config: Option<Vec<u8>>,
}

/// A deck options group
///
/// Only the values needed to carry a group across schema generations are
/// modeled; everything else rides in `raw`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeckOptions {
    pub id: DeckOptionsId,
    pub name: String,
    pub mtime: i64,
    pub usn: i32,
    pub new_per_day: u32,
    pub reviews_per_day: u32,
    /// Learning steps in minutes
    pub learn_steps: Vec<f32>,
    pub relearn_steps: Vec<f32>,
    /// Starting ease as a multiplier (2.5 = 250%)
    pub initial_ease: f32,
    pub max_interval: u32,
    pub leech_threshold: u32,
    pub raw: Opaque,
}

impl DeckOptions {
    pub fn new(id: DeckOptionsId, name: impl Into<String>) -> Self {
        DeckOptions {
            id,
            name: name.into(),
            mtime: 0,
            usn: 0,
            new_per_day: 20,
            reviews_per_day: 200,
            learn_steps: vec![1.0, 10.0],
            relearn_steps: vec![10.0],
            initial_ease: 2.5,
            max_interval: 36500,
            leech_threshold: 8,
            raw: Opaque::default(),
        }
    }
}

/// Tombstone type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i64)]
pub enum GraveKind {
    Card = 0,
    Note = 1,
    Deck = 2,
}

impl GraveKind {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(GraveKind::Card),
            1 => Some(GraveKind::Note),
            2 => Some(GraveKind::Deck),
            _ => None,
        }
    }
}

/// A tombstone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Grave {
    pub oid: i64,
    pub kind: GraveKind,
    pub usn: i32,
}

/// What happens to the cards of a deleted deck
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardPolicy {
    MoveToDefault,
    Delete,
}

/// What happens to the subdecks of a deleted deck
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubdeckPolicy {
    /// Reattach them to the deleted deck's parent
    Promote,
    Delete,
}

/// Outcome of a deck deletion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeckDeletion {
    pub removed_decks: Vec<DeckId>,
    /// Generated cards taken out of the collection
    pub removed_cards: Vec<CardId>,
    /// Imported cards flagged as deleted and parked in the default deck
    pub soft_deleted_cards: Vec<CardId>,
    pub moved_cards: Vec<CardId>,
}

/// A card taken out of the collection with its orphaned note and history
pub(crate) type PurgedCard = (Card, Option<Note>, Vec<ReviewLogEntry>);

/// Everything a deck deletion changed, enough to put it back
#[derive(Debug, Clone)]
pub(crate) struct DeckRemoval {
    pub deck: DeckId,
    pub cards: CardPolicy,
    pub subdecks: SubdeckPolicy,
    pub outcome: DeckDeletion,
    /// Moved or flagged cards as they were before
    pub changed: Vec<Card>,
    pub purged: Vec<PurgedCard>,
    pub decks: Vec<Deck>,
    /// Promoted subdecks with their previous parent and full name
    pub promoted: Vec<(DeckId, Option<DeckId>, String)>,
    pub graves_len: usize,
    pub created_default: bool,
}

/// An in-memory flashcard collection
#[derive(Debug, Clone)]
pub struct Collection {
    pub meta: CollectionMeta,
    pub(crate) decks: BTreeMap<DeckId, Deck>,
    pub(crate) models: BTreeMap<ModelId, Model>,
    pub(crate) notes: BTreeMap<NoteId, Note>,
    pub(crate) cards: BTreeMap<CardId, Card>,
    pub(crate) revlog: BTreeMap<CardId, Vec<ReviewLogEntry>>,
    pub(crate) media: BTreeMap<String, MediaFile>,
    /// Media filenames in package order
    pub(crate) media_order: Vec<String>,
    pub deck_options: BTreeMap<DeckOptionsId, DeckOptions>,
    /// Modern `config` rows, in table order
    pub config: Vec<ConfigEntry>,
    pub tags: Vec<TagEntry>,
    pub graves: Vec<Grave>,
    /// Package version the collection was read from
    pub source_version: Option<PackageVersion>,
    /// Manifest filenames dropped on import because they were unusable
    pub skipped_media: Vec<String>,
    tree: Vec<DeckTreeNode>,
    ids: IdSource,
}

impl Default for Collection {
    fn default() -> Self {
        Self::new()
    }
}

impl Collection {
    /// A collection holding only the default deck and options group
    pub fn new() -> Self {
        Self::with_id_source(IdSource::Global)
    }

    pub fn with_id_source(ids: IdSource) -> Self {
        let mut col = Self::empty(ids);
        col.decks
            .insert(DEFAULT_DECK_ID, Deck::new(DEFAULT_DECK_ID, DEFAULT_DECK_NAME));
        col.deck_options
            .insert(DEFAULT_OPTIONS_ID, DeckOptions::new(DEFAULT_OPTIONS_ID, "Default"));
        col.rebuild_tree();
        col
    }

    /// A collection with no decks at all; used while reading rows
    pub(crate) fn empty(ids: IdSource) -> Self {
        Collection {
            meta: CollectionMeta::default(),
            decks: BTreeMap::new(),
            models: BTreeMap::new(),
            notes: BTreeMap::new(),
            cards: BTreeMap::new(),
            revlog: BTreeMap::new(),
            media: BTreeMap::new(),
            media_order: Vec::new(),
            deck_options: BTreeMap::new(),
            config: Vec::new(),
            tags: Vec::new(),
            graves: Vec::new(),
            source_version: None,
            skipped_media: Vec::new(),
            tree: Vec::new(),
            ids,
        }
    }

    pub fn id_source(&self) -> &IdSource {
        &self.ids
    }

    pub fn set_id_source(&mut self, ids: IdSource) {
        self.ids = ids;
    }

    // ---- queries ----

    pub fn decks(&self) -> &BTreeMap<DeckId, Deck> {
        &self.decks
    }

    pub fn deck(&self, id: DeckId) -> Option<&Deck> {
        self.decks.get(&id)
    }

    /// Case-insensitive lookup by full name
    pub fn deck_by_name(&self, name: &str) -> Option<&Deck> {
        let wanted = DeckName::new(name).ok()?;
        self.decks
            .values()
            .find(|d| d.name.to_lowercase() == wanted.as_str().to_lowercase())
    }

    /// Top-level deck tree nodes
    pub fn deck_tree(&self) -> &[DeckTreeNode] {
        &self.tree
    }

    /// The deck and every deck below it
    pub fn deck_and_descendants(&self, id: DeckId) -> Vec<DeckId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(deck) = self.decks.get(&current) {
                out.push(current);
                stack.extend(deck.children.iter().rev());
            }
        }
        out
    }

    /// Ancestors from the root down, excluding the deck itself
    pub fn deck_ancestors(&self, id: DeckId) -> Vec<DeckId> {
        let mut out = Vec::new();
        let mut current = self.decks.get(&id).and_then(|d| d.parent_id);
        while let Some(parent) = current {
            if out.contains(&parent) {
                break;
            }
            out.push(parent);
            current = self.decks.get(&parent).and_then(|d| d.parent_id);
        }
        out.reverse();
        out
    }

    pub fn models(&self) -> &BTreeMap<ModelId, Model> {
        &self.models
    }

    pub fn model(&self, id: ModelId) -> Option<&Model> {
        self.models.get(&id)
    }

    pub fn model_by_name(&self, name: &str) -> Option<&Model> {
        self.models.values().find(|m| m.name == name)
    }

    pub fn notes(&self) -> &BTreeMap<NoteId, Note> {
        &self.notes
    }

    pub fn note(&self, id: NoteId) -> Option<&Note> {
        self.notes.get(&id)
    }

    pub fn cards(&self) -> &BTreeMap<CardId, Card> {
        &self.cards
    }

    pub fn card(&self, id: CardId) -> Option<&Card> {
        self.cards.get(&id)
    }

    /// Cards sharing a note, ordered by template ordinal
    pub fn cards_of_note(&self, note_id: NoteId) -> Vec<&Card> {
        let mut cards: Vec<&Card> = self.cards.values().filter(|c| c.note_id == note_id).collect();
        cards.sort_by_key(|c| (c.ordinal, c.id));
        cards
    }

    /// Live cards in a deck, optionally including its subdecks
    pub fn cards_in_deck(&self, deck_id: DeckId, recursive: bool) -> Vec<&Card> {
        let decks: BTreeSet<DeckId> = if recursive {
            self.deck_and_descendants(deck_id).into_iter().collect()
        } else {
            [deck_id].into_iter().collect()
        };
        self.cards
            .values()
            .filter(|c| !c.is_deleted && decks.contains(&c.deck_id))
            .collect()
    }

    /// Number of live cards in a deck
    pub fn card_count(&self, deck_id: DeckId, recursive: bool) -> usize {
        self.cards_in_deck(deck_id, recursive).len()
    }

    /// Live card count of every deck, subdecks excluded
    pub fn card_counts(&self) -> BTreeMap<DeckId, usize> {
        let mut counts: BTreeMap<DeckId, usize> = self.decks.keys().map(|id| (*id, 0)).collect();
        for card in self.cards.values().filter(|c| !c.is_deleted) {
            *counts.entry(card.deck_id).or_default() += 1;
        }
        counts
    }

    pub fn total_card_count(&self) -> usize {
        self.cards.values().filter(|c| !c.is_deleted).count()
    }

    /// Review history of a card, oldest first
    pub fn revlog(&self, card_id: CardId) -> &[ReviewLogEntry] {
        self.revlog.get(&card_id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn revlog_entries(&self) -> impl Iterator<Item = &ReviewLogEntry> {
        self.revlog.values().flatten()
    }

    pub fn media(&self) -> impl Iterator<Item = &MediaFile> {
        self.media_order.iter().filter_map(|name| self.media.get(name))
    }

    pub fn media_file(&self, filename: &str) -> Option<&MediaFile> {
        self.media.get(filename)
    }

    // ---- id generation ----

    pub fn next_deck_id(&self) -> DeckId {
        self.ids.with(|g| g.next_free_id(|id| self.decks.contains_key(&id)))
    }

    pub fn next_model_id(&self) -> ModelId {
        self.ids.with(|g| g.next_free_id(|id| self.models.contains_key(&id)))
    }

    pub fn next_note_id(&self) -> NoteId {
        self.ids.with(|g| g.next_free_id(|id| self.notes.contains_key(&id)))
    }

    pub fn next_card_id(&self) -> CardId {
        self.ids.with(|g| g.next_free_id(|id| self.cards.contains_key(&id)))
    }

    pub fn next_revlog_id(&self) -> i64 {
        self.ids.with(|g| {
            g.next_free_id(|id| self.revlog.values().flatten().any(|entry| entry.id == id))
        })
    }

    pub fn next_guid(&self) -> String {
        self.ids
            .with(|g| loop {
                let guid = g.next_guid();
                if !self.notes.values().any(|n| n.guid == guid) {
                    break guid;
                }
            })
    }

    // ---- entity insertion ----

    /// Add a note type
    pub fn add_model(&mut self, model: Model) -> MutResult<ModelId> {
        model.validate().map_err(MutationError::InvalidModel)?;
        let id = model.id;
        self.models.insert(id, model);
        Ok(id)
    }

    /// Add a note; its field count must match the note type
    pub fn add_note(&mut self, note: Note) -> MutResult<NoteId> {
        let model = self
            .models
            .get(&note.model_id)
            .ok_or(MutationError::ModelNotFound(note.model_id))?;
        if note.fields.len() != model.fields.len() {
            return Err(MutationError::FieldCountMismatch {
                expected: model.fields.len(),
                actual: note.fields.len(),
            });
        }
        let id = note.id;
        self.notes.insert(id, note);
        Ok(id)
    }

    /// Add a card, fixing its derived kind from the note type
    pub fn add_card(&mut self, mut card: Card) -> MutResult<CardId> {
        let note = self
            .notes
            .get(&card.note_id)
            .ok_or(MutationError::NoteNotFound(card.note_id))?;
        let model = self
            .models
            .get(&note.model_id)
            .ok_or(MutationError::ModelNotFound(note.model_id))?;
        if !self.decks.contains_key(&card.deck_id) {
            return Err(MutationError::DeckNotFound(card.deck_id));
        }
        if !model.accepts_ordinal(card.ordinal) {
            return Err(MutationError::InvalidOrdinal {
                model: model.id,
                ordinal: card.ordinal,
            });
        }
        card.kind = CardKind::derive(model.kind, card.ordinal);
        let id = card.id;
        self.cards.insert(id, card);
        Ok(id)
    }

    /// Append a review to a card's history, keeping it ordered by time
    pub fn push_revlog(&mut self, entry: ReviewLogEntry) {
        let entries = self.revlog.entry(entry.card_id).or_default();
        let at = entries.partition_point(|e| e.id <= entry.id);
        entries.insert(at, entry);
    }

    /// Add or replace a media file
    pub fn add_media(&mut self, file: MediaFile) -> MutResult<()> {
        validate_media_filename(&file.filename).map_err(MutationError::InvalidMediaName)?;
        if !self.media.contains_key(&file.filename) {
            self.media_order.push(file.filename.clone());
        }
        self.media.insert(file.filename.clone(), file);
        Ok(())
    }

    pub fn remove_media(&mut self, filename: &str) -> Option<MediaFile> {
        self.media_order.retain(|name| name != filename);
        self.media.remove(filename)
    }

    // ---- raw access for the lifecycle layer ----

    pub(crate) fn card_mut(&mut self, id: CardId) -> Option<&mut Card> {
        self.cards.get_mut(&id)
    }

    pub(crate) fn note_mut(&mut self, id: NoteId) -> Option<&mut Note> {
        self.notes.get_mut(&id)
    }

    pub(crate) fn take_card(&mut self, id: CardId) -> Option<Card> {
        self.cards.remove(&id)
    }

    pub(crate) fn take_note(&mut self, id: NoteId) -> Option<Note> {
        self.notes.remove(&id)
    }

    pub(crate) fn take_revlog(&mut self, card_id: CardId) -> Vec<ReviewLogEntry> {
        self.revlog.remove(&card_id).unwrap_or_default()
    }

    pub(crate) fn put_card(&mut self, card: Card) {
        self.cards.insert(card.id, card);
    }

    pub(crate) fn put_note(&mut self, note: Note) {
        self.notes.insert(note.id, note);
    }

    pub(crate) fn put_revlog(&mut self, card_id: CardId, entries: Vec<ReviewLogEntry>) {
        if !entries.is_empty() {
            self.revlog.insert(card_id, entries);
        }
    }

    pub(crate) fn put_deck(&mut self, deck: Deck) {
        self.decks.insert(deck.id, deck);
    }

    pub(crate) fn put_model(&mut self, model: Model) {
        self.models.insert(model.id, model);
    }

    // ---- deck structure ----

    /// Derive parent pointers and child lists from deck names
    ///
    /// Missing ancestors are created. Used after reading rows, where only
    /// names are stored.
    pub(crate) fn link_decks(&mut self) {
        let mut by_name: BTreeMap<String, DeckId> = self
            .decks
            .values()
            .map(|d| (d.name.to_lowercase(), d.id))
            .collect();

        let mut names: Vec<String> = self.decks.values().map(|d| d.name.clone()).collect();
        names.sort_by_key(|n| n.matches(DECK_SEPARATOR).count());
        for name in names {
            let mut prefix = String::new();
            let segments: Vec<&str> = name.split(DECK_SEPARATOR).collect();
            for segment in &segments[..segments.len().saturating_sub(1)] {
                if !prefix.is_empty() {
                    prefix.push_str(DECK_SEPARATOR);
                }
                prefix.push_str(segment);
                if !by_name.contains_key(&prefix.to_lowercase()) {
                    let id = self.next_deck_id();
                    warn!("Deck {:?} has no parent {:?}, creating it", name, prefix);
                    self.decks.insert(id, Deck::new(id, prefix.clone()));
                    by_name.insert(prefix.to_lowercase(), id);
                }
            }
        }

        let parents: Vec<(DeckId, Option<DeckId>)> = self
            .decks
            .values()
            .map(|d| {
                let parent = d
                    .parent_name()
                    .and_then(|p| by_name.get(&p.to_lowercase()).copied());
                (d.id, parent)
            })
            .collect();
        for (id, parent) in parents {
            if let Some(deck) = self.decks.get_mut(&id) {
                deck.parent_id = parent;
            }
        }
        self.relink_children();
    }

    /// Recompute every child list from parent pointers
    fn relink_children(&mut self) {
        let mut children: BTreeMap<DeckId, Vec<(String, DeckId)>> = BTreeMap::new();
        for deck in self.decks.values() {
            if let Some(parent) = deck.parent_id {
                children
                    .entry(parent)
                    .or_default()
                    .push((deck.name.to_lowercase(), deck.id));
            }
        }
        for deck in self.decks.values_mut() {
            let mut kids = children.remove(&deck.id).unwrap_or_default();
            kids.sort();
            deck.children = kids.into_iter().map(|(_, id)| id).collect();
        }
        self.rebuild_tree();
    }

    /// Rebuild the materialized tree from parent pointers
    pub(crate) fn rebuild_tree(&mut self) {
        let mut roots: Vec<(String, DeckId)> = self
            .decks
            .values()
            .filter(|d| d.parent_id.map_or(true, |p| !self.decks.contains_key(&p)))
            .map(|d| (d.name.to_lowercase(), d.id))
            .collect();
        roots.sort();
        self.tree = roots
            .into_iter()
            .filter_map(|(_, id)| self.tree_node(id, 0))
            .collect();
    }

    fn tree_node(&self, id: DeckId, depth: usize) -> Option<DeckTreeNode> {
        let deck = self.decks.get(&id)?;
        // Parent pointers are kept acyclic; the bound only guards corrupted input
        if depth > self.decks.len() {
            return None;
        }
        Some(DeckTreeNode {
            id,
            name: deck.leaf_name().to_string(),
            full_name: deck.name.clone(),
            children: deck
                .children
                .iter()
                .filter_map(|child| self.tree_node(*child, depth + 1))
                .collect(),
        })
    }

    /// Verify that names, parent pointers, child lists and the tree agree
    pub fn check_deck_integrity(&self) -> std::result::Result<(), String> {
        for deck in self.decks.values() {
            match (deck.parent_name(), deck.parent_id) {
                (None, None) => {}
                (Some(parent_name), Some(parent_id)) => {
                    let parent = self
                        .decks
                        .get(&parent_id)
                        .ok_or_else(|| format!("deck {} points at missing parent {}", deck.id, parent_id))?;
                    if parent.name != parent_name {
                        return Err(format!(
                            "deck {:?} is under {:?}",
                            deck.name, parent.name
                        ));
                    }
                    if !parent.children.contains(&deck.id) {
                        return Err(format!("deck {} missing from parent's children", deck.id));
                    }
                }
                _ => return Err(format!("deck {:?} has inconsistent parent {:?}", deck.name, deck.parent_id)),
            }
        }
        let tree_ids: BTreeSet<DeckId> = self.tree.iter().flat_map(DeckTreeNode::ids).collect();
        let map_ids: BTreeSet<DeckId> = self.decks.keys().copied().collect();
        if tree_ids != map_ids {
            return Err("deck tree does not cover the deck map".to_string());
        }
        Ok(())
    }

    fn name_taken(&self, name: &str, except: Option<DeckId>) -> bool {
        let lower = name.to_lowercase();
        self.decks
            .values()
            .any(|d| Some(d.id) != except && d.name.to_lowercase() == lower)
    }

    /// Create a deck, optionally below `parent`
    ///
    /// Without a parent, `name` may be a full path; missing ancestors are
    /// created along the way.
    pub fn create_deck(&mut self, name: &str, parent: Option<DeckId>) -> MutResult<DeckId> {
        let full = match parent {
            Some(parent_id) => {
                let parent = self
                    .decks
                    .get(&parent_id)
                    .ok_or(MutationError::DeckNotFound(parent_id))?;
                DeckName::child_of(&parent.name, name)
            }
            None => DeckName::new(name),
        }
        .map_err(MutationError::InvalidDeckName)?;

        if self.name_taken(full.as_str(), None) {
            return Err(MutationError::DuplicateDeckName(full.into_string()));
        }

        // Ancestors first, so each new deck finds its parent
        let mut parent_id = None;
        let mut prefix = String::new();
        let segments: Vec<&str> = full.as_str().split(DECK_SEPARATOR).collect();
        for segment in &segments[..segments.len() - 1] {
            if !prefix.is_empty() {
                prefix.push_str(DECK_SEPARATOR);
            }
            prefix.push_str(segment);
            let existing = self.deck_by_name(&prefix).map(|d| d.id);
            let id = match existing {
                Some(id) => id,
                None => {
                    let id = self.next_deck_id();
                    let mut deck = Deck::new(id, prefix.clone());
                    deck.parent_id = parent_id;
                    self.decks.insert(id, deck);
                    debug!("Created ancestor deck {:?} ({})", prefix, id);
                    id
                }
            };
            parent_id = Some(id);
        }

        let id = self.next_deck_id();
        let mut deck = Deck::new(id, full.as_str());
        deck.parent_id = parent_id;
        self.decks.insert(id, deck);
        self.relink_children();
        debug!("Created deck {:?} ({})", full.as_str(), id);
        Ok(id)
    }

    /// Rename a deck's own segment; descendants follow
    pub fn rename_deck(&mut self, id: DeckId, new_leaf: &str) -> MutResult<()> {
        let deck = self.decks.get(&id).ok_or(MutationError::DeckNotFound(id))?;
        if new_leaf.contains(DECK_SEPARATOR) {
            return Err(MutationError::InvalidDeckName(format!(
                "{:?}: use move_deck to change the parent",
                new_leaf
            )));
        }
        let full = match deck.parent_name() {
            Some(parent) => DeckName::child_of(parent, new_leaf),
            None => DeckName::new(new_leaf),
        }
        .map_err(MutationError::InvalidDeckName)?;
        if self.name_taken(full.as_str(), Some(id)) {
            return Err(MutationError::DuplicateDeckName(full.into_string()));
        }
        self.rename_subtree(id, full.as_str());
        self.relink_children();
        Ok(())
    }

    /// Move a deck below `new_parent`, or to the top level
    pub fn move_deck(&mut self, id: DeckId, new_parent: Option<DeckId>) -> MutResult<()> {
        if id == DEFAULT_DECK_ID {
            return Err(MutationError::DefaultDeckProtected);
        }
        let deck = self.decks.get(&id).ok_or(MutationError::DeckNotFound(id))?;
        let leaf = deck.leaf_name().to_string();

        let full = match new_parent {
            Some(target) => {
                let parent = self
                    .decks
                    .get(&target)
                    .ok_or(MutationError::DeckNotFound(target))?;
                if self.deck_and_descendants(id).contains(&target) {
                    return Err(MutationError::CyclicMove { deck: id, target });
                }
                DeckName::child_of(&parent.name, &leaf)
            }
            None => DeckName::new(&leaf),
        }
        .map_err(MutationError::InvalidDeckName)?;
        if self.name_taken(full.as_str(), Some(id)) {
            return Err(MutationError::DuplicateDeckName(full.into_string()));
        }

        if let Some(deck) = self.decks.get_mut(&id) {
            deck.parent_id = new_parent;
        }
        self.rename_subtree(id, full.as_str());
        self.relink_children();
        Ok(())
    }

    /// Rewrite the names of a deck and its descendants
    fn rename_subtree(&mut self, id: DeckId, new_full: &str) {
        let Some(old_full) = self.decks.get(&id).map(|d| d.name.clone()) else {
            return;
        };
        for deck_id in self.deck_and_descendants(id) {
            if let Some(deck) = self.decks.get_mut(&deck_id) {
                let suffix = deck_suffix(&deck.name, &old_full);
                deck.name = format!("{}{}", new_full, suffix);
                deck.touch();
            }
        }
    }

    pub(crate) fn ensure_default_deck(&mut self) {
        if !self.decks.contains_key(&DEFAULT_DECK_ID) {
            let mut name = DEFAULT_DECK_NAME.to_string();
            while self.name_taken(&name, None) {
                name.push('_');
            }
            self.decks.insert(DEFAULT_DECK_ID, Deck::new(DEFAULT_DECK_ID, name));
        }
    }

    /// Delete a deck under the given card and subdeck policies
    ///
    /// Note types are never deleted. Under [`CardPolicy::Delete`] generated
    /// cards are removed, while imported cards stay in the collection flagged
    /// as deleted and move to the default deck. Removed decks leave
    /// tombstones.
    pub fn delete_deck(
        &mut self,
        id: DeckId,
        cards: CardPolicy,
        subdecks: SubdeckPolicy,
    ) -> MutResult<DeckDeletion> {
        self.remove_deck(id, cards, subdecks).map(|removal| removal.outcome)
    }

    pub(crate) fn remove_deck(
        &mut self,
        id: DeckId,
        cards: CardPolicy,
        subdecks: SubdeckPolicy,
    ) -> MutResult<DeckRemoval> {
        if id == DEFAULT_DECK_ID {
            return Err(MutationError::DefaultDeckProtected);
        }
        let deck = self.decks.get(&id).ok_or(MutationError::DeckNotFound(id))?;
        let parent_id = deck.parent_id;
        let parent_name = deck.parent_name().map(str::to_string);
        let children = deck.children.clone();

        let doomed: Vec<DeckId> = match subdecks {
            SubdeckPolicy::Delete => self.deck_and_descendants(id),
            SubdeckPolicy::Promote => vec![id],
        };
        if doomed.contains(&DEFAULT_DECK_ID) {
            return Err(MutationError::DefaultDeckProtected);
        }

        // Check promoted names before touching anything
        let mut promotions = Vec::new();
        if subdecks == SubdeckPolicy::Promote {
            for child in &children {
                let Some(child_deck) = self.decks.get(child) else { continue };
                let leaf = child_deck.leaf_name();
                let full = match &parent_name {
                    Some(parent) => DeckName::child_of(parent, leaf),
                    None => DeckName::new(leaf),
                }
                .map_err(MutationError::InvalidDeckName)?;
                if self.name_taken(full.as_str(), Some(*child)) {
                    return Err(MutationError::DuplicateDeckName(full.into_string()));
                }
                promotions.push((*child, full.into_string()));
            }
        }

        let mut removal = DeckRemoval {
            deck: id,
            cards,
            subdecks,
            outcome: DeckDeletion::default(),
            changed: Vec::new(),
            purged: Vec::new(),
            decks: Vec::new(),
            promoted: Vec::new(),
            graves_len: self.graves.len(),
            created_default: !self.decks.contains_key(&DEFAULT_DECK_ID),
        };
        self.ensure_default_deck();

        let affected: Vec<CardId> = self
            .cards
            .values()
            .filter(|c| doomed.contains(&c.deck_id))
            .map(|c| c.id)
            .collect();
        for card_id in affected {
            let hard_delete = cards == CardPolicy::Delete
                && self
                    .cards
                    .get(&card_id)
                    .is_some_and(|c| c.capabilities().can_hard_delete);
            if hard_delete {
                if let Some(purged) = self.purge_card(card_id) {
                    removal.purged.push(purged);
                    removal.outcome.removed_cards.push(card_id);
                }
                continue;
            }
            let Some(card) = self.cards.get_mut(&card_id) else { continue };
            removal.changed.push(card.clone());
            card.deck_id = DEFAULT_DECK_ID;
            card.mtime = super::now_secs();
            card.usn = -1;
            match cards {
                CardPolicy::MoveToDefault => removal.outcome.moved_cards.push(card_id),
                CardPolicy::Delete => {
                    card.is_deleted = true;
                    removal.outcome.soft_deleted_cards.push(card_id);
                }
            }
        }

        for (child, full) in promotions {
            if let Some(deck) = self.decks.get_mut(&child) {
                removal.promoted.push((child, deck.parent_id, deck.name.clone()));
                deck.parent_id = parent_id;
            }
            self.rename_subtree(child, &full);
        }
        for deck_id in &doomed {
            if let Some(deck) = self.decks.remove(deck_id) {
                self.graves.push(Grave {
                    oid: *deck_id,
                    kind: GraveKind::Deck,
                    usn: -1,
                });
                removal.decks.push(deck);
                removal.outcome.removed_decks.push(*deck_id);
            }
        }
        self.relink_children();
        debug!(
            "Deleted {} decks, removed {} cards, flagged {} cards, moved {} cards",
            removal.outcome.removed_decks.len(),
            removal.outcome.removed_cards.len(),
            removal.outcome.soft_deleted_cards.len(),
            removal.outcome.moved_cards.len()
        );
        Ok(removal)
    }

    /// Undo a [`DeckRemoval`]
    pub(crate) fn restore_deck_removal(&mut self, removal: &DeckRemoval) {
        for deck in &removal.decks {
            self.decks.insert(deck.id, deck.clone());
        }
        for (child, parent, _) in &removal.promoted {
            if let Some(deck) = self.decks.get_mut(child) {
                deck.parent_id = *parent;
            }
        }
        // Child lists must match the restored parents before names follow
        self.relink_children();
        for (child, _, name) in &removal.promoted {
            self.rename_subtree(*child, name);
        }
        for card in &removal.changed {
            self.cards.insert(card.id, card.clone());
        }
        for (card, note, history) in &removal.purged {
            if let Some(note) = note {
                self.notes.insert(note.id, note.clone());
            }
            self.put_revlog(card.id, history.clone());
            self.cards.insert(card.id, card.clone());
        }
        if removal.created_default {
            self.decks.remove(&DEFAULT_DECK_ID);
        }
        self.graves.truncate(removal.graves_len);
        self.relink_children();
        debug!("Restored {} decks", removal.decks.len());
    }

    /// Remove a card outright along with its history, and its note when no
    /// sibling remains
    pub(crate) fn purge_card(&mut self, card_id: CardId) -> Option<PurgedCard> {
        let card = self.cards.remove(&card_id)?;
        let history = self.take_revlog(card_id);
        let imported = card.origin == super::CardOrigin::Imported;
        if imported {
            self.graves.push(Grave {
                oid: card_id,
                kind: GraveKind::Card,
                usn: -1,
            });
        }
        let orphaned = !self.cards.values().any(|c| c.note_id == card.note_id);
        let note = if orphaned {
            let note = self.notes.remove(&card.note_id);
            if imported && note.is_some() {
                self.graves.push(Grave {
                    oid: card.note_id,
                    kind: GraveKind::Note,
                    usn: -1,
                });
            }
            note
        } else {
            None
        };
        Some((card, note, history))
    }
}

/// The part of `name` below its ancestor `ancestor`, separator included
///
/// Counts segments rather than bytes: names are matched case-insensitively
/// and the stored casing may differ in length.
fn deck_suffix<'a>(name: &'a str, ancestor: &str) -> &'a str {
    let depth = ancestor.split(DECK_SEPARATOR).count();
    match name.match_indices(DECK_SEPARATOR).nth(depth - 1) {
        Some((at, _)) => &name[at..],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CardOrigin, ModelKind};

    fn collection() -> Collection {
        Collection::with_id_source(IdSource::seeded(1_000))
    }

    fn with_cards() -> (Collection, DeckId, DeckId) {
        let mut col = collection();
        let parent = col.create_deck("Parent", None).unwrap();
        let child = col.create_deck("Child", Some(parent)).unwrap();
        col.add_model(Model::basic(10)).unwrap();
        for (i, deck) in [parent, child, child].iter().enumerate() {
            let nid = 100 + i as i64;
            col.add_note(Note::new(nid, format!("g{}", i), 10, vec!["q".into(), "a".into()]))
                .unwrap();
            let mut card = Card::new(200 + i as i64, nid, *deck, 0);
            card.origin = CardOrigin::Imported;
            col.add_card(card).unwrap();
        }
        (col, parent, child)
    }

    #[test]
    fn test_new_collection_has_default_deck() {
        let col = collection();
        assert_eq!(col.deck(DEFAULT_DECK_ID).unwrap().name, "Default");
        assert_eq!(col.deck_tree().len(), 1);
        assert!(col.check_deck_integrity().is_ok());
    }

    #[test]
    fn test_create_subdeck_and_ancestors() {
        let mut col = collection();
        let leaf = col.create_deck("A::B::C", None).unwrap();
        assert_eq!(col.deck(leaf).unwrap().name, "A::B::C");
        let a = col.deck_by_name("a").unwrap().id;
        assert_eq!(col.deck_ancestors(leaf).first(), Some(&a));
        assert!(col.check_deck_integrity().is_ok());

        let d = col.create_deck("D", Some(a)).unwrap();
        assert_eq!(col.deck(d).unwrap().name, "A::D");
        assert_eq!(col.deck(a).unwrap().children.len(), 2);
    }

    #[test]
    fn test_create_rejects_duplicates_and_missing_parent() {
        let mut col = collection();
        col.create_deck("Spanish", None).unwrap();
        assert_eq!(
            col.create_deck("spanish", None),
            Err(MutationError::DuplicateDeckName("spanish".into()))
        );
        assert_eq!(col.create_deck("X", Some(999)), Err(MutationError::DeckNotFound(999)));
        assert!(matches!(
            col.create_deck(" :: ", None),
            Err(MutationError::InvalidDeckName(_))
        ));
    }

    #[test]
    fn test_rename_propagates_to_descendants() {
        let mut col = collection();
        let parent = col.create_deck("Parent", None).unwrap();
        let child = col.create_deck("Child", Some(parent)).unwrap();
        let grandchild = col.create_deck("Leaf", Some(child)).unwrap();

        col.rename_deck(parent, "Parent2").unwrap();
        assert_eq!(col.deck(parent).unwrap().name, "Parent2");
        assert_eq!(col.deck(child).unwrap().name, "Parent2::Child");
        assert_eq!(col.deck(grandchild).unwrap().name, "Parent2::Child::Leaf");
        assert!(col.check_deck_integrity().is_ok());
    }

    #[test]
    fn test_move_deck() {
        let mut col = collection();
        let a = col.create_deck("A", None).unwrap();
        let b = col.create_deck("B", None).unwrap();
        let b1 = col.create_deck("B1", Some(b)).unwrap();

        col.move_deck(b, Some(a)).unwrap();
        assert_eq!(col.deck(b1).unwrap().name, "A::B::B1");
        assert_eq!(col.deck(b).unwrap().parent_id, Some(a));
        assert!(col.deck(a).unwrap().children.contains(&b));

        col.move_deck(b, None).unwrap();
        assert_eq!(col.deck(b1).unwrap().name, "B::B1");
        assert!(col.deck(a).unwrap().children.is_empty());
        assert!(col.check_deck_integrity().is_ok());
    }

    #[test]
    fn test_move_rejections() {
        let mut col = collection();
        let a = col.create_deck("A", None).unwrap();
        let a1 = col.create_deck("A1", Some(a)).unwrap();
        assert_eq!(
            col.move_deck(a, Some(a1)),
            Err(MutationError::CyclicMove { deck: a, target: a1 })
        );
        assert_eq!(
            col.move_deck(DEFAULT_DECK_ID, Some(a)),
            Err(MutationError::DefaultDeckProtected)
        );
        assert_eq!(col.deck(a1).unwrap().name, "A::A1");
    }

    #[test]
    fn test_delete_deck_moving_cards_and_promoting() {
        let (mut col, parent, child) = with_cards();
        let outcome = col
            .delete_deck(parent, CardPolicy::MoveToDefault, SubdeckPolicy::Promote)
            .unwrap();
        assert_eq!(outcome.removed_decks, vec![parent]);
        assert_eq!(outcome.moved_cards.len(), 1);
        assert_eq!(col.deck(child).unwrap().name, "Child");
        assert_eq!(col.deck(child).unwrap().parent_id, None);
        assert_eq!(col.card_count(DEFAULT_DECK_ID, false), 1);
        assert_eq!(col.card_count(child, false), 2);
        assert_eq!(col.models().len(), 1);
        assert!(col.check_deck_integrity().is_ok());
    }

    #[test]
    fn test_delete_deck_recursively_with_cards() {
        let (mut col, parent, child) = with_cards();
        let outcome = col
            .delete_deck(parent, CardPolicy::Delete, SubdeckPolicy::Delete)
            .unwrap();
        assert_eq!(outcome.removed_decks.len(), 2);
        assert!(outcome.removed_cards.is_empty());
        assert_eq!(outcome.soft_deleted_cards.len(), 3);
        assert!(col.deck(child).is_none());

        // Imported cards stay, flagged and parked in the default deck
        assert_eq!(col.cards().len(), 3);
        assert!(col.cards().values().all(|c| c.is_deleted && c.deck_id == DEFAULT_DECK_ID));
        assert_eq!(col.notes().len(), 3);
        assert_eq!(col.total_card_count(), 0);
        assert_eq!(col.models().len(), 1);
        assert!(col.graves.iter().any(|g| g.kind == GraveKind::Deck && g.oid == child));
        assert!(col.check_deck_integrity().is_ok());
    }

    #[test]
    fn test_delete_deck_purges_generated_cards() {
        let (mut col, parent, child) = with_cards();
        col.add_note(Note::new(300, "gen", 10, vec!["q".into(), "a".into()])).unwrap();
        col.add_card(Card::new(301, 300, child, 0)).unwrap();

        let outcome = col
            .delete_deck(parent, CardPolicy::Delete, SubdeckPolicy::Delete)
            .unwrap();
        assert_eq!(outcome.removed_cards, vec![301]);
        assert!(col.card(301).is_none());
        assert!(col.note(300).is_none());
        assert!(!col.graves.iter().any(|g| g.kind == GraveKind::Card && g.oid == 301));
    }

    #[test]
    fn test_restore_deck_removal() {
        let (mut col, parent, child) = with_cards();
        let before_names: Vec<String> = col.decks().values().map(|d| d.name.clone()).collect();
        let before_cards = col.cards().clone();

        let removal = col
            .remove_deck(parent, CardPolicy::Delete, SubdeckPolicy::Promote)
            .unwrap();
        assert_eq!(col.deck(child).unwrap().name, "Child");

        col.restore_deck_removal(&removal);
        let names: Vec<String> = col.decks().values().map(|d| d.name.clone()).collect();
        assert_eq!(names, before_names);
        assert_eq!(col.deck(child).unwrap().parent_id, Some(parent));
        assert_eq!(col.cards(), &before_cards);
        assert!(col.graves.is_empty());
        assert!(col.check_deck_integrity().is_ok());
    }

    #[test]
    fn test_rename_with_case_folded_parent() {
        // "ẞ" lowercases to "ß" but is one byte longer
        let mut col = Collection::empty(IdSource::seeded(5_000));
        col.put_deck(Deck::new(DEFAULT_DECK_ID, "Default"));
        col.put_deck(Deck::new(50, "Straße"));
        col.put_deck(Deck::new(51, "STRAẞE::Kapitel"));
        col.put_deck(Deck::new(52, "ß"));
        col.put_deck(Deck::new(53, "ẞ::Kind"));
        col.link_decks();
        assert_eq!(col.deck(53).unwrap().parent_id, Some(52));

        col.rename_deck(52, "Eszett").unwrap();
        assert_eq!(col.deck(53).unwrap().name, "Eszett::Kind");
        col.rename_deck(50, "Gasse").unwrap();
        assert_eq!(col.deck(51).unwrap().name, "Gasse::Kapitel");
        assert!(col.check_deck_integrity().is_ok());
    }

    #[test]
    fn test_default_deck_cannot_be_deleted() {
        let mut col = collection();
        assert_eq!(
            col.delete_deck(DEFAULT_DECK_ID, CardPolicy::Delete, SubdeckPolicy::Delete),
            Err(MutationError::DefaultDeckProtected)
        );
    }

    #[test]
    fn test_recursive_counts() {
        let (col, parent, child) = with_cards();
        assert_eq!(col.card_count(parent, false), 1);
        assert_eq!(col.card_count(parent, true), 3);
        assert_eq!(col.card_count(child, true), 2);
        assert_eq!(col.card_counts()[&DEFAULT_DECK_ID], 0);
        assert_eq!(col.total_card_count(), 3);
    }

    #[test]
    fn test_add_card_validates_references() {
        let mut col = collection();
        col.add_model(Model::basic(10)).unwrap();
        col.add_note(Note::new(1, "g", 10, vec!["q".into(), "a".into()])).unwrap();
        assert_eq!(
            col.add_card(Card::new(2, 1, DEFAULT_DECK_ID, 1)),
            Err(MutationError::InvalidOrdinal { model: 10, ordinal: 1 })
        );
        assert_eq!(
            col.add_card(Card::new(2, 1, 77, 0)),
            Err(MutationError::DeckNotFound(77))
        );
        assert_eq!(
            col.add_note(Note::new(3, "h", 10, vec!["only".into()])),
            Err(MutationError::FieldCountMismatch { expected: 2, actual: 1 })
        );

        let mut cloze = Model::cloze(11);
        cloze.kind = ModelKind::Cloze;
        col.add_model(cloze).unwrap();
        col.add_note(Note::new(4, "i", 11, vec!["{{c1::x}}".into(), String::new()])).unwrap();
        col.add_card(Card::new(5, 4, DEFAULT_DECK_ID, 2)).unwrap();
        assert_eq!(col.card(5).unwrap().kind(), CardKind::Cloze);
    }

    #[test]
    fn test_link_decks_creates_missing_parents() {
        let mut col = Collection::empty(IdSource::seeded(5_000));
        col.put_deck(Deck::new(DEFAULT_DECK_ID, "Default"));
        col.put_deck(Deck::new(50, "Lang::Japanese::Kanji"));
        col.link_decks();
        assert!(col.deck_by_name("Lang").is_some());
        assert!(col.deck_by_name("Lang::Japanese").is_some());
        assert!(col.check_deck_integrity().is_ok());
        assert_eq!(col.deck_tree().len(), 2);
    }

    #[test]
    fn test_media_keeps_insertion_order() {
        let mut col = collection();
        col.add_media(MediaFile::new("z.png", vec![1])).unwrap();
        col.add_media(MediaFile::new("a.png", vec![2])).unwrap();
        let names: Vec<&str> = col.media().map(|m| m.filename.as_str()).collect();
        assert_eq!(names, vec!["z.png", "a.png"]);
        assert!(matches!(
            col.add_media(MediaFile::new("../x", vec![])),
            Err(MutationError::InvalidMediaName(_))
        ));
    }
}
