//! Export assembler
//!
//! Selects the rows of a collection to emit, writes them into a fresh
//! database of the target generation and bundles the package. The
//! collection is only read; a failed export leaves it as it was.

use crate::container::{write_package, ZipCodec};
use crate::error::{ApkgError, Result};
use crate::meta::PackageVersion;
use crate::model::{
    CardId, Collection, Deck, DeckId, Grave, GraveKind, NoteId, ReviewLogEntry, DEFAULT_DECK_ID,
};
use crate::render::media::{model_references, referenced_files};
use crate::schema::{write_rows, RowSet, SchemaGeneration};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// A deck and the part of its subtree to export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subtree {
    pub root: DeckId,
    /// Descendants to include; `None` takes all of them
    pub descendants: Option<BTreeSet<DeckId>>,
}

impl Subtree {
    pub fn whole(root: DeckId) -> Self {
        Subtree {
            root,
            descendants: None,
        }
    }
}

/// What to export and how
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Target version; falls back to the collection's source version
    pub version: Option<PackageVersion>,
    /// Cards left out; they and their orphaned notes get tombstones
    pub excluded_card_ids: BTreeSet<CardId>,
    pub subtree: Option<Subtree>,
    pub include_media: bool,
    pub zstd_level: i32,
}

impl Default for ExportOptions {
    fn default() -> Self {
        ExportOptions {
            version: None,
            excluded_card_ids: BTreeSet::new(),
            subtree: None,
            include_media: true,
            zstd_level: 0,
        }
    }
}

impl ExportOptions {
    pub fn version(mut self, version: PackageVersion) -> Self {
        self.version = Some(version);
        self
    }

    pub fn exclude(mut self, card_ids: impl IntoIterator<Item = CardId>) -> Self {
        self.excluded_card_ids.extend(card_ids);
        self
    }

    pub fn subtree(mut self, subtree: Subtree) -> Self {
        self.subtree = Some(subtree);
        self
    }

    pub fn without_media(mut self) -> Self {
        self.include_media = false;
        self
    }
}

/// Version an export will be written as
pub fn target_version(col: &Collection, options: &ExportOptions, fallback: PackageVersion) -> PackageVersion {
    options
        .version
        .or(col.source_version)
        .filter(|v| *v != PackageVersion::Unknown)
        .unwrap_or(fallback)
}

/// Export a collection as package bytes
pub fn export(col: &Collection, options: &ExportOptions, fallback: PackageVersion) -> Result<Vec<u8>> {
    let version = target_version(col, options, fallback);
    let generation = if version.is_compressed() {
        SchemaGeneration::Modern
    } else {
        SchemaGeneration::Legacy
    };
    info!("Exporting {:?} package ({:?} schema)", version, generation);

    let rows = select_rows(col, options)?;
    let media = select_media(col, &rows, options);
    let database = write_rows(&rows, generation)?;
    let bytes = write_package(&ZipCodec, version, &database, &media, options.zstd_level)?;

    info!(
        "Exported {} notes, {} cards, {} media files ({} bytes)",
        rows.notes.len(),
        rows.cards.len(),
        media.len(),
        bytes.len()
    );
    Ok(bytes)
}

/// Decks a subtree export covers
fn selected_decks(col: &Collection, subtree: &Subtree) -> Result<BTreeSet<DeckId>> {
    if col.deck(subtree.root).is_none() {
        return Err(ApkgError::Referential {
            kind: "deck",
            id: subtree.root,
            referenced_by: "subtree export".to_string(),
        });
    }
    let all = col.deck_and_descendants(subtree.root);
    let mut selected = BTreeSet::from([subtree.root]);
    match &subtree.descendants {
        None => selected.extend(all),
        Some(wanted) => {
            for id in wanted {
                if all.contains(id) {
                    selected.insert(*id);
                } else {
                    warn!("Deck {} is not below deck {}, ignoring", id, subtree.root);
                }
            }
        }
    }
    Ok(selected)
}

/// Choose the rows to emit
///
/// Excluded cards and soft-deleted cards are left out and tombstoned, as
/// are notes all of whose cards are left out. A subtree export keeps only
/// cards in the selected decks; its deck section still holds their
/// ancestors and the default deck.
pub fn select_rows<'a>(col: &'a Collection, options: &ExportOptions) -> Result<RowSet<'a>> {
    let scope = options
        .subtree
        .as_ref()
        .map(|s| selected_decks(col, s))
        .transpose()?;
    let in_scope = |deck: DeckId| scope.as_ref().map_or(true, |s| s.contains(&deck));

    let excluded = |id: CardId| {
        options.excluded_card_ids.contains(&id) || col.card(id).is_some_and(|c| c.is_deleted)
    };
    for id in &options.excluded_card_ids {
        if col.card(*id).is_none() {
            debug!("Excluded card {} is not in the collection", id);
        }
    }

    let decks: Vec<&Deck> = match &scope {
        None => col.decks().values().collect(),
        Some(selected) => {
            let mut ids: BTreeSet<DeckId> = selected.clone();
            for id in selected {
                ids.extend(col.deck_ancestors(*id));
            }
            ids.insert(DEFAULT_DECK_ID);
            ids.iter().filter_map(|id| col.deck(*id)).collect()
        }
    };

    // Per note: (cards in scope, cards kept)
    let mut tally: BTreeMap<NoteId, (usize, usize)> = BTreeMap::new();
    let mut cards = Vec::new();
    let mut graves: Vec<Grave> = col.graves.clone();
    let mut outside = BTreeSet::new();
    for card in col.cards().values() {
        if !in_scope(card.deck_id) {
            outside.insert(card.note_id);
            continue;
        }
        let entry = tally.entry(card.note_id).or_default();
        entry.0 += 1;
        if excluded(card.id) {
            graves.push(Grave {
                oid: card.id,
                kind: GraveKind::Card,
                usn: -1,
            });
        } else {
            entry.1 += 1;
            cards.push(card);
        }
    }

    let mut notes = Vec::new();
    for note in col.notes().values() {
        match tally.get(&note.id) {
            Some((_, 0)) => graves.push(Grave {
                oid: note.id,
                kind: GraveKind::Note,
                usn: -1,
            }),
            Some(_) => {
                if scope.is_some() && outside.contains(&note.id) {
                    warn!("Note {} has cards outside the exported decks, skipping those", note.id);
                }
                notes.push(note);
            }
            // Notes without cards only travel with a full export
            None if scope.is_none() => notes.push(note),
            None => {}
        }
    }

    let kept: BTreeSet<CardId> = cards.iter().map(|c| c.id).collect();
    let revlog: Vec<&ReviewLogEntry> = col
        .revlog_entries()
        .filter(|e| {
            if kept.contains(&e.card_id) {
                return true;
            }
            // History of cards missing from the collection rides along with
            // a full export
            scope.is_none() && col.card(e.card_id).is_none()
        })
        .collect();

    graves.sort();
    graves.dedup_by_key(|g| (g.oid, g.kind));

    debug!(
        "Selected {} decks, {} notes, {} cards, {} graves",
        decks.len(),
        notes.len(),
        cards.len(),
        graves.len()
    );
    Ok(RowSet {
        col,
        decks,
        notes,
        cards,
        revlog,
        graves,
    })
}

/// Media files to bundle, in collection order
fn select_media(col: &Collection, rows: &RowSet<'_>, options: &ExportOptions) -> Vec<(String, Vec<u8>)> {
    if !options.include_media {
        return Vec::new();
    }
    if options.subtree.is_none() {
        return col
            .media()
            .map(|m| (m.filename.clone(), m.data.clone()))
            .collect();
    }
    let mut referenced: BTreeSet<String> = rows
        .notes
        .iter()
        .flat_map(|n| n.fields.iter())
        .flat_map(|f| referenced_files(f))
        .collect();
    let models: BTreeSet<_> = rows.notes.iter().map(|n| n.model_id).collect();
    for model in models.into_iter().filter_map(|id| col.model(id)) {
        referenced.extend(model_references(model, col));
    }
    col.media()
        .filter(|m| referenced.contains(&m.filename))
        .map(|m| (m.filename.clone(), m.data.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::read_package;
    use crate::compression::DEFAULT_MAX_DECOMPRESSED;
    use crate::ids::IdSource;
    use crate::model::{Card, CardOrigin, MediaFile, Model, Note};

    fn collection() -> Collection {
        let mut col = Collection::with_id_source(IdSource::seeded(7_000));
        col.add_model(Model::basic(1)).unwrap();
        let lang = col.create_deck("Languages", None).unwrap();
        let spanish = col.create_deck("Spanish", Some(lang)).unwrap();
        let french = col.create_deck("French", Some(lang)).unwrap();
        let math = col.create_deck("Math", None).unwrap();
        for (i, deck) in [spanish, french, math].into_iter().enumerate() {
            let nid = 10 + i as i64;
            let front = format!("q{} <img src=\"m{}.png\">", i, i);
            col.add_note(Note::new(nid, format!("g{}", i), 1, vec![front, "a".into()]))
                .unwrap();
            let mut card = Card::new(20 + i as i64, nid, deck, 0);
            card.origin = CardOrigin::Imported;
            col.add_card(card).unwrap();
            col.add_media(MediaFile::new(format!("m{}.png", i), vec![i as u8])).unwrap();
        }
        col
    }

    #[test]
    fn test_exclusions_become_graves() -> Result<()> {
        let col = collection();
        let options = ExportOptions::default().exclude([20]);
        let rows = select_rows(&col, &options)?;
        assert_eq!(rows.cards.len(), 2);
        assert!(rows.notes.iter().all(|n| n.id != 10));
        assert!(rows.graves.contains(&Grave { oid: 20, kind: GraveKind::Card, usn: -1 }));
        assert!(rows.graves.contains(&Grave { oid: 10, kind: GraveKind::Note, usn: -1 }));
        Ok(())
    }

    #[test]
    fn test_soft_deleted_cards_are_left_out() -> Result<()> {
        let mut col = collection();
        col.card_mut(21).unwrap().is_deleted = true;
        let rows = select_rows(&col, &ExportOptions::default())?;
        assert!(rows.cards.iter().all(|c| c.id != 21));
        assert!(rows.graves.iter().any(|g| g.oid == 21));
        Ok(())
    }

    #[test]
    fn test_subtree_selection() -> Result<()> {
        let col = collection();
        let lang = col.deck_by_name("Languages").unwrap().id;
        let spanish = col.deck_by_name("Languages::Spanish").unwrap().id;
        let subtree = Subtree {
            root: lang,
            descendants: Some(BTreeSet::from([spanish])),
        };
        let options = ExportOptions::default().subtree(subtree);
        let rows = select_rows(&col, &options)?;
        let deck_ids: Vec<DeckId> = rows.decks.iter().map(|d| d.id).collect();
        assert!(deck_ids.contains(&lang));
        assert!(deck_ids.contains(&spanish));
        assert!(deck_ids.contains(&DEFAULT_DECK_ID));
        assert_eq!(deck_ids.len(), 3);
        assert_eq!(rows.cards.len(), 1);
        assert_eq!(rows.notes.len(), 1);
        assert!(rows.graves.is_empty());

        let media = select_media(&col, &rows, &options);
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].0, "m0.png");
        Ok(())
    }

    #[test]
    fn test_subtree_root_must_exist() {
        let col = collection();
        let options = ExportOptions::default().subtree(Subtree::whole(9_999));
        assert!(matches!(
            select_rows(&col, &options),
            Err(ApkgError::Referential { kind: "deck", id: 9_999, .. })
        ));
    }

    #[test]
    fn test_version_fallback() -> Result<()> {
        let mut col = collection();
        let options = ExportOptions::default();
        assert_eq!(target_version(&col, &options, PackageVersion::Legacy2), PackageVersion::Legacy2);
        col.source_version = Some(PackageVersion::Latest);
        assert_eq!(target_version(&col, &options, PackageVersion::Legacy2), PackageVersion::Latest);
        let forced = options.version(PackageVersion::Legacy1);
        assert_eq!(target_version(&col, &forced, PackageVersion::Legacy2), PackageVersion::Legacy1);

        let bytes = export(&col, &forced, PackageVersion::Legacy2)?;
        let contents = read_package(&ZipCodec, &bytes, DEFAULT_MAX_DECOMPRESSED)?;
        assert_eq!(contents.version, PackageVersion::Legacy1);
        assert_eq!(contents.media.len(), 3);
        Ok(())
    }

    #[test]
    fn test_export_is_deterministic() -> Result<()> {
        let col = collection();
        let options = ExportOptions::default().version(PackageVersion::Latest);
        let a = export(&col, &options, PackageVersion::Legacy2)?;
        let b = export(&col, &options, PackageVersion::Legacy2)?;
        assert_eq!(a, b);
        Ok(())
    }
}
