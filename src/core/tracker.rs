//! Mutation and lifecycle tracking
//!
//! A [`Session`] owns the single active [`Collection`] and records what the
//! user did to it: field edits against the imported values, soft deletions of
//! imported cards, generated cards, and an undo/redo history of card
//! additions, card deletions and deck deletions.
//!
//! Edits are applied to the notes directly, so rendering and export see the
//! current values. Whether a note counts as edited is derived by comparing
//! against the snapshot taken at load time.

use crate::error::MutationError;
use crate::model::collection::DeckRemoval;
use crate::model::{
    Card, CardId, CardPolicy, CardQueue, Collection, DeckDeletion, DeckId, MediaFile, Model,
    ModelId, Note, NoteId, ReviewLogEntry, Scheduling, SubdeckPolicy,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

type MutResult<T> = std::result::Result<T, MutationError>;

/// Request for a generated card
#[derive(Debug, Clone)]
pub struct NewCard {
    pub model_id: ModelId,
    pub deck_id: DeckId,
    pub fields: Vec<String>,
    pub tags: Vec<String>,
    /// Template ordinal (cloze number minus one for cloze note types)
    pub ordinal: u32,
    /// Card whose scheduling and history the new card may inherit
    pub source_card: Option<CardId>,
    pub inherit_scheduling: bool,
}

impl NewCard {
    pub fn new(model_id: ModelId, deck_id: DeckId, fields: Vec<String>) -> Self {
        NewCard {
            model_id,
            deck_id,
            fields,
            tags: Vec::new(),
            ordinal: 0,
            source_card: None,
            inherit_scheduling: false,
        }
    }

    pub fn ordinal(mut self, ordinal: u32) -> Self {
        self.ordinal = ordinal;
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Copy scheduling and review history from `source`
    pub fn inherit_from(mut self, source: CardId) -> Self {
        self.source_card = Some(source);
        self.inherit_scheduling = true;
        self
    }
}

/// Everything a card removal takes out of the collection
#[derive(Debug, Clone)]
struct Detached {
    card: Card,
    note: Option<Note>,
    revlog: Vec<ReviewLogEntry>,
}

/// A reversible action
#[derive(Debug, Clone)]
enum Action {
    AddCard(Detached),
    SoftDelete(CardId),
    HardDelete(Detached),
    DeleteDeck(Box<DeckRemoval>),
}

/// An editing session over one collection
#[derive(Debug)]
pub struct Session {
    col: Collection,
    originals: BTreeMap<NoteId, Vec<String>>,
    edits: BTreeMap<NoteId, Vec<String>>,
    deleted: BTreeSet<CardId>,
    generated: BTreeSet<CardId>,
    undo: Vec<Action>,
    redo: Vec<Action>,
}

impl Session {
    pub fn new(col: Collection) -> Self {
        let originals = snapshot(&col);
        let deleted = col
            .cards()
            .values()
            .filter(|c| c.is_deleted)
            .map(|c| c.id)
            .collect();
        Session {
            col,
            originals,
            edits: BTreeMap::new(),
            deleted,
            generated: BTreeSet::new(),
            undo: Vec::new(),
            redo: Vec::new(),
        }
    }

    /// Replace the active collection, discarding all session state
    pub fn load(&mut self, col: Collection) {
        debug!(
            "Loading collection with {} notes; dropping {} edits and {} undo steps",
            col.notes().len(),
            self.edits.len(),
            self.undo.len()
        );
        *self = Session::new(col);
    }

    pub fn collection(&self) -> &Collection {
        &self.col
    }

    pub(crate) fn collection_mut(&mut self) -> &mut Collection {
        &mut self.col
    }

    pub fn into_collection(self) -> Collection {
        self.col
    }

    // ---- field edits ----

    /// Set a note's field values
    ///
    /// Returns whether the note now differs from its imported values.
    pub fn edit_fields(&mut self, note_id: NoteId, values: Vec<String>) -> MutResult<bool> {
        let note = self
            .col
            .note(note_id)
            .ok_or(MutationError::NoteNotFound(note_id))?;
        if note.fields.len() != values.len() {
            return Err(MutationError::FieldCountMismatch {
                expected: note.fields.len(),
                actual: values.len(),
            });
        }

        let edited = match self.originals.get(&note_id) {
            Some(original) if *original == values => {
                self.edits.remove(&note_id);
                false
            }
            Some(_) => {
                self.edits.insert(note_id, values.clone());
                true
            }
            // Generated notes have no imported values to compare against
            None => false,
        };
        if let Some(note) = self.col.note_mut(note_id) {
            if note.fields != values {
                note.fields = values;
                note.touch();
            }
        }
        debug!("Note {} fields set (edited: {})", note_id, edited);
        Ok(edited)
    }

    pub fn is_edited(&self, note_id: NoteId) -> bool {
        self.edits.contains_key(&note_id)
    }

    pub fn edited_notes(&self) -> impl Iterator<Item = NoteId> + '_ {
        self.edits.keys().copied()
    }

    /// Field values a note was imported with
    pub fn original_fields(&self, note_id: NoteId) -> Option<&[String]> {
        self.originals.get(&note_id).map(Vec::as_slice)
    }

    // ---- deletion ----

    /// Delete a card according to its origin
    ///
    /// Imported cards are flagged and stay in the collection; generated cards
    /// are removed together with their note when no sibling remains.
    pub fn delete_card(&mut self, card_id: CardId) -> MutResult<()> {
        let card = self
            .col
            .card(card_id)
            .ok_or(MutationError::CardNotFound(card_id))?;
        if card.capabilities().can_hard_delete {
            return self.hard_delete_card(card_id);
        }
        if card.is_deleted {
            return Err(MutationError::AlreadyDeleted(card_id));
        }
        self.mark_deleted(card_id, true);
        self.record(Action::SoftDelete(card_id));
        debug!("Soft-deleted card {}", card_id);
        Ok(())
    }

    /// Remove a generated card outright
    pub fn hard_delete_card(&mut self, card_id: CardId) -> MutResult<()> {
        let card = self
            .col
            .card(card_id)
            .ok_or(MutationError::CardNotFound(card_id))?;
        if !card.capabilities().can_hard_delete {
            return Err(MutationError::HardDeleteForbidden(card_id));
        }
        let detached = self.detach(card_id)?;
        debug!(
            "Hard-deleted card {} (note removed: {})",
            card_id,
            detached.note.is_some()
        );
        self.record(Action::HardDelete(detached));
        Ok(())
    }

    /// Bring back a soft-deleted imported card
    pub fn restore_card(&mut self, card_id: CardId) -> MutResult<()> {
        let card = self
            .col
            .card(card_id)
            .ok_or(MutationError::CardNotFound(card_id))?;
        if !card.capabilities().can_restore {
            return Err(MutationError::RestoreForbidden(card_id));
        }
        self.mark_deleted(card_id, false);
        Ok(())
    }

    /// Imported cards to leave out of an export
    pub fn excluded_card_ids(&self) -> BTreeSet<CardId> {
        self.deleted.clone()
    }

    pub fn generated_card_ids(&self) -> &BTreeSet<CardId> {
        &self.generated
    }

    // ---- collection structure ----

    pub fn add_model(&mut self, model: Model) -> MutResult<ModelId> {
        self.col.add_model(model)
    }

    pub fn add_media(&mut self, file: MediaFile) -> MutResult<()> {
        self.col.add_media(file)
    }

    pub fn create_deck(&mut self, name: &str, parent: Option<DeckId>) -> MutResult<DeckId> {
        self.col.create_deck(name, parent)
    }

    pub fn rename_deck(&mut self, id: DeckId, new_leaf: &str) -> MutResult<()> {
        self.col.rename_deck(id, new_leaf)
    }

    pub fn move_deck(&mut self, id: DeckId, new_parent: Option<DeckId>) -> MutResult<()> {
        self.col.move_deck(id, new_parent)
    }

    /// Delete a deck, applying the origin rules to its cards
    ///
    /// Under [`CardPolicy::Delete`] imported cards are soft-deleted and
    /// generated cards removed, exactly as [`Session::delete_card`] would.
    /// The whole deletion is one undo step.
    pub fn delete_deck(
        &mut self,
        id: DeckId,
        cards: CardPolicy,
        subdecks: SubdeckPolicy,
    ) -> MutResult<DeckDeletion> {
        let removal = self.col.remove_deck(id, cards, subdecks)?;
        self.track_removal(&removal);
        let outcome = removal.outcome.clone();
        self.record(Action::DeleteDeck(Box::new(removal)));
        Ok(outcome)
    }

    fn track_removal(&mut self, removal: &DeckRemoval) {
        for (card, note, _) in &removal.purged {
            self.generated.remove(&card.id);
            if let Some(note) = note {
                self.edits.remove(&note.id);
            }
        }
        self.deleted
            .extend(removal.outcome.soft_deleted_cards.iter().copied());
    }

    fn untrack_removal(&mut self, removal: &DeckRemoval) {
        for (card, _, _) in &removal.purged {
            self.generated.insert(card.id);
        }
        for card in &removal.changed {
            if card.is_deleted {
                self.deleted.insert(card.id);
            } else {
                self.deleted.remove(&card.id);
            }
        }
    }

    // ---- generation ----

    /// Create a note and a generated card for it
    pub fn generate_card(&mut self, request: NewCard) -> MutResult<CardId> {
        let model = self
            .col
            .model(request.model_id)
            .ok_or(MutationError::ModelNotFound(request.model_id))?;
        if self.col.deck(request.deck_id).is_none() {
            return Err(MutationError::DeckNotFound(request.deck_id));
        }
        if !model.accepts_ordinal(request.ordinal) {
            return Err(MutationError::InvalidOrdinal {
                model: model.id,
                ordinal: request.ordinal,
            });
        }
        if request.fields.len() != model.fields.len() {
            return Err(MutationError::FieldCountMismatch {
                expected: model.fields.len(),
                actual: request.fields.len(),
            });
        }
        let source = match request.source_card {
            Some(id) => Some(
                self.col
                    .card(id)
                    .ok_or(MutationError::CardNotFound(id))?
                    .clone(),
            ),
            None => None,
        };

        let note_id = self.col.next_note_id();
        let mut note = Note::new(note_id, self.col.next_guid(), request.model_id, request.fields);
        note.tags = request.tags;
        self.col.add_note(note.clone())?;

        let card_id = self.col.next_card_id();
        let mut card = Card::new(card_id, note_id, request.deck_id, request.ordinal);
        let mut revlog = Vec::new();
        match source.filter(|_| request.inherit_scheduling) {
            Some(source) => {
                card.scheduling = source.scheduling;
                for entry in self.col.revlog(source.id).to_vec() {
                    let copy = entry.rekeyed(self.col.next_revlog_id(), card_id);
                    self.col.push_revlog(copy.clone());
                    revlog.push(copy);
                }
            }
            None => card.scheduling = Scheduling::fresh(self.next_new_position()),
        }
        if let Err(e) = self.col.add_card(card) {
            self.col.take_note(note_id);
            self.col.take_revlog(card_id);
            return Err(e);
        }
        self.generated.insert(card_id);

        let card = self
            .col
            .card(card_id)
            .cloned()
            .ok_or(MutationError::CardNotFound(card_id))?;
        self.record(Action::AddCard(Detached {
            card,
            note: Some(note),
            revlog,
        }));
        debug!("Generated card {} on note {}", card_id, note_id);
        Ok(card_id)
    }

    /// Due position after every new card in the collection
    fn next_new_position(&self) -> i64 {
        self.col
            .cards()
            .values()
            .filter(|c| c.scheduling.queue == CardQueue::New)
            .map(|c| c.scheduling.due)
            .max()
            .map_or(1, |due| due + 1)
    }

    // ---- history ----

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// Revert the latest action
    ///
    /// A failed undo leaves the action where it was.
    pub fn undo(&mut self) -> MutResult<()> {
        let action = self.undo.pop().ok_or(MutationError::NothingToUndo)?;
        match self.revert(&action) {
            Ok(inverse) => {
                self.redo.push(inverse);
                Ok(())
            }
            Err(e) => {
                self.undo.push(action);
                Err(e)
            }
        }
    }

    /// Apply the latest undone action again
    pub fn redo(&mut self) -> MutResult<()> {
        let action = self.redo.pop().ok_or(MutationError::NothingToRedo)?;
        match self.replay(&action) {
            Ok(again) => {
                self.undo.push(again);
                Ok(())
            }
            Err(e) => {
                self.redo.push(action);
                Err(e)
            }
        }
    }

    fn revert(&mut self, action: &Action) -> MutResult<Action> {
        Ok(match action {
            Action::AddCard(added) => Action::AddCard(self.detach(added.card.id)?),
            Action::SoftDelete(card_id) => {
                self.mark_deleted(*card_id, false);
                Action::SoftDelete(*card_id)
            }
            Action::HardDelete(removed) => {
                self.attach(removed.clone());
                Action::HardDelete(removed.clone())
            }
            Action::DeleteDeck(removal) => {
                self.col.restore_deck_removal(removal);
                self.untrack_removal(removal);
                Action::DeleteDeck(removal.clone())
            }
        })
    }

    fn replay(&mut self, action: &Action) -> MutResult<Action> {
        Ok(match action {
            Action::AddCard(added) => {
                self.attach(added.clone());
                Action::AddCard(added.clone())
            }
            Action::SoftDelete(card_id) => {
                self.mark_deleted(*card_id, true);
                Action::SoftDelete(*card_id)
            }
            Action::HardDelete(removed) => Action::HardDelete(self.detach(removed.card.id)?),
            Action::DeleteDeck(removal) => {
                let again = self
                    .col
                    .remove_deck(removal.deck, removal.cards, removal.subdecks)?;
                self.track_removal(&again);
                Action::DeleteDeck(Box::new(again))
            }
        })
    }

    /// Push a new action; a fresh action invalidates the redo history
    fn record(&mut self, action: Action) {
        self.undo.push(action);
        self.redo.clear();
    }

    fn mark_deleted(&mut self, card_id: CardId, deleted: bool) {
        if let Some(card) = self.col.card_mut(card_id) {
            card.is_deleted = deleted;
        }
        if deleted {
            self.deleted.insert(card_id);
        } else {
            self.deleted.remove(&card_id);
        }
    }

    /// Take a generated card, its history and its orphaned note out
    fn detach(&mut self, card_id: CardId) -> MutResult<Detached> {
        let (card, note, revlog) = self
            .col
            .purge_card(card_id)
            .ok_or(MutationError::CardNotFound(card_id))?;
        self.generated.remove(&card_id);
        if let Some(note) = &note {
            self.edits.remove(&note.id);
        }
        Ok(Detached { card, note, revlog })
    }

    /// Put a detached card back exactly as it was
    fn attach(&mut self, detached: Detached) {
        let Detached { card, note, revlog } = detached;
        if let Some(note) = note {
            self.col.put_note(note);
        }
        self.generated.insert(card.id);
        self.col.put_revlog(card.id, revlog);
        self.col.put_card(card);
    }
}

/// Field values of every note, as loaded
fn snapshot(col: &Collection) -> BTreeMap<NoteId, Vec<String>> {
    col.notes()
        .values()
        .map(|n| (n.id, n.fields.clone()))
        .collect()
}
