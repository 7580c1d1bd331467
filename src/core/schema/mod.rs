//! Collection schema adapter
//!
//! Maps SQLite rows to the domain model and back, for both schema
//! generations. Notes, cards and the review log share one layout across
//! generations and are handled here; configuration lives in [`legacy`] or
//! [`modern`].

pub mod legacy;
pub mod modern;
pub mod proto;
pub mod sql;

use crate::database::DatabaseImage;
use crate::error::{ApkgError, Result};
use crate::ids::IdSource;
use crate::model::{
    join_fields, join_tags, split_fields, split_tags, Card, CardKind, CardOrigin, CardQueue,
    CardType, Collection, Deck, Grave, GraveKind, Note, ReviewLogEntry, Scheduling,
    DEFAULT_DECK_ID, FIELD_SEPARATOR,
};
use rusqlite::{params, Connection, Transaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Schema generation of an embedded collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaGeneration {
    /// Version 11: configuration as JSON in the `col` row
    Legacy,
    /// Version 18: dedicated configuration tables
    Modern,
}

impl SchemaGeneration {
    pub fn schema_version(self) -> i64 {
        match self {
            SchemaGeneration::Legacy => sql::LEGACY_VERSION,
            SchemaGeneration::Modern => sql::MODERN_VERSION,
        }
    }
}

/// Detect the generation from the tables present
pub fn detect(db: &DatabaseImage) -> Result<SchemaGeneration> {
    if !db.has_table("col")? {
        return Err(ApkgError::Schema("no col table".to_string()));
    }
    let modern = sql::MODERN_ONLY_TABLES
        .iter()
        .filter(|t| db.has_table(t).unwrap_or(false))
        .count();
    match modern {
        0 => Ok(SchemaGeneration::Legacy),
        n if n == sql::MODERN_ONLY_TABLES.len() => Ok(SchemaGeneration::Modern),
        _ => Err(ApkgError::Schema(
            "collection has only part of the modern tables".to_string(),
        )),
    }
}

/// Read a whole collection from a database image
///
/// Any failure aborts the read; no partial collection is returned.
pub fn parse_rows(db: &DatabaseImage, ids: IdSource) -> Result<Collection> {
    let generation = detect(db)?;
    debug!("Detected {:?} schema", generation);

    let mut col = Collection::empty(ids);
    let conn = db.conn();
    match generation {
        SchemaGeneration::Legacy => legacy::read_config(conn, &mut col)?,
        SchemaGeneration::Modern => modern::read_config(conn, &mut col)?,
    }
    if col.deck(DEFAULT_DECK_ID).is_none() {
        warn!("Collection has no default deck, adding one");
        col.ensure_default_deck();
    }
    col.link_decks();

    read_notes(conn, &mut col)?;
    read_cards(conn, &mut col)?;
    read_revlog(conn, &mut col)?;
    read_graves(conn, &mut col, generation)?;

    info!(
        "Read {:?} collection: {} decks, {} note types, {} notes, {} cards",
        generation,
        col.decks().len(),
        col.models().len(),
        col.notes().len(),
        col.cards().len()
    );
    Ok(col)
}

fn read_notes(conn: &Connection, col: &mut Collection) -> Result<()> {
    let mut stmt =
        conn.prepare("SELECT id, guid, mid, mod, usn, tags, flds, flags, data FROM notes ORDER BY id")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, i32>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, i64>(7)?,
            row.get::<_, String>(8)?,
        ))
    })?;
    for row in rows {
        let (id, guid, mid, mtime, usn, tags, flds, flags, data) = row?;
        let model = col.model(mid).ok_or_else(|| ApkgError::Referential {
            kind: "note type",
            id: mid,
            referenced_by: format!("note {}", id),
        })?;
        let fields = fit_fields(split_fields(&flds), model.fields.len(), id);
        let note = Note {
            id,
            guid,
            model_id: mid,
            fields,
            tags: split_tags(&tags),
            mtime,
            usn,
            flags,
            data,
        };
        col.put_note(note);
    }
    Ok(())
}

/// Pad or merge field values to the note type's field count
fn fit_fields(mut fields: Vec<String>, expected: usize, note_id: i64) -> Vec<String> {
    if fields.len() < expected {
        warn!(
            "Note {} has {} fields, note type expects {}; padding",
            note_id,
            fields.len(),
            expected
        );
        fields.resize(expected, String::new());
    } else if fields.len() > expected && expected > 0 {
        warn!(
            "Note {} has {} fields, note type expects {}; merging the extras",
            note_id,
            fields.len(),
            expected
        );
        let extra = fields.split_off(expected);
        if let Some(last) = fields.last_mut() {
            for value in extra {
                last.push(FIELD_SEPARATOR);
                last.push_str(&value);
            }
        }
    }
    fields
}

fn read_cards(conn: &Connection, col: &mut Collection) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT id, nid, did, ord, mod, usn, type, queue, due, ivl, factor, reps, lapses, \
         left, odue, odid, flags, data FROM cards ORDER BY id",
    )?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let note_id: i64 = row.get(1)?;
        let deck_id: i64 = row.get(2)?;
        let ordinal: u32 = row.get(3)?;
        let raw_type: i64 = row.get(6)?;
        let raw_queue: i64 = row.get(7)?;

        let note = col.note(note_id).ok_or_else(|| ApkgError::Referential {
            kind: "note",
            id: note_id,
            referenced_by: format!("card {}", id),
        })?;
        if col.deck(deck_id).is_none() {
            return Err(ApkgError::Referential {
                kind: "deck",
                id: deck_id,
                referenced_by: format!("card {}", id),
            });
        }
        let model = col.model(note.model_id).ok_or_else(|| ApkgError::Referential {
            kind: "note type",
            id: note.model_id,
            referenced_by: format!("note {}", note_id),
        })?;
        if !model.accepts_ordinal(ordinal) {
            return Err(ApkgError::Referential {
                kind: "template",
                id: i64::from(ordinal),
                referenced_by: format!("card {}", id),
            });
        }
        let card_type = CardType::from_i64(raw_type)
            .ok_or_else(|| ApkgError::Schema(format!("card {} has unknown type {}", id, raw_type)))?;
        let queue = CardQueue::from_i64(raw_queue)
            .ok_or_else(|| ApkgError::Schema(format!("card {} has unknown queue {}", id, raw_queue)))?;

        let card = Card {
            id,
            note_id,
            deck_id,
            ordinal,
            kind: CardKind::derive(model.kind, ordinal),
            scheduling: Scheduling {
                card_type,
                queue,
                due: row.get(8)?,
                interval: row.get(9)?,
                ease_factor: row.get(10)?,
                reps: row.get(11)?,
                lapses: row.get(12)?,
                left: row.get(13)?,
                original_due: row.get(14)?,
                original_deck_id: row.get(15)?,
                flags: row.get(16)?,
            },
            mtime: row.get(4)?,
            usn: row.get(5)?,
            data: row.get(17)?,
            origin: CardOrigin::Imported,
            is_deleted: false,
        };
        col.put_card(card);
    }
    Ok(())
}

fn read_revlog(conn: &Connection, col: &mut Collection) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT id, cid, usn, ease, ivl, lastIvl, factor, time, type FROM revlog ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(ReviewLogEntry {
            id: row.get(0)?,
            card_id: row.get(1)?,
            usn: row.get(2)?,
            ease: row.get(3)?,
            interval: row.get(4)?,
            last_interval: row.get(5)?,
            ease_factor: row.get(6)?,
            time_ms: row.get(7)?,
            review_kind: row.get(8)?,
        })
    })?;
    let mut orphans = 0;
    for entry in rows {
        let entry = entry?;
        if col.card(entry.card_id).is_none() {
            orphans += 1;
        }
        col.push_revlog(entry);
    }
    if orphans > 0 {
        debug!("Kept {} review log entries of missing cards", orphans);
    }
    Ok(())
}

fn read_graves(conn: &Connection, col: &mut Collection, generation: SchemaGeneration) -> Result<()> {
    let mut stmt = conn.prepare("SELECT oid, type, usn FROM graves")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i32>(2)?))
    })?;
    for row in rows {
        let (oid, kind, usn) = row?;
        let kind = GraveKind::from_i64(kind)
            .ok_or_else(|| ApkgError::Schema(format!("grave {} has unknown type {}", oid, kind)))?;
        col.graves.push(Grave { oid, kind, usn });
    }
    // Legacy graves have no key; keep a stable order for comparison
    if generation == SchemaGeneration::Legacy {
        col.graves.sort();
    }
    Ok(())
}

/// The rows an export emits
///
/// Note types, deck options, config and tags always come from the whole
/// collection; decks, notes, cards and review entries are the selection.
pub struct RowSet<'a> {
    pub col: &'a Collection,
    pub decks: Vec<&'a Deck>,
    pub notes: Vec<&'a Note>,
    pub cards: Vec<&'a Card>,
    pub revlog: Vec<&'a ReviewLogEntry>,
    pub graves: Vec<Grave>,
}

impl<'a> RowSet<'a> {
    /// Every row of the collection
    pub fn full(col: &'a Collection) -> Self {
        RowSet {
            col,
            decks: col.decks().values().collect(),
            notes: col.notes().values().collect(),
            cards: col.cards().values().collect(),
            revlog: col.revlog_entries().collect(),
            graves: col.graves.clone(),
        }
    }
}

/// Write a row set into a fresh database image of the given generation
pub fn write_rows(rows: &RowSet<'_>, generation: SchemaGeneration) -> Result<Vec<u8>> {
    let mut db = DatabaseImage::create()?;
    let ddl = match generation {
        SchemaGeneration::Legacy => sql::legacy_schema(),
        SchemaGeneration::Modern => sql::modern_schema(),
    };
    db.conn().execute_batch(&ddl)?;

    let tx = db.conn_mut().transaction()?;
    match generation {
        SchemaGeneration::Legacy => legacy::write_config(&tx, rows)?,
        SchemaGeneration::Modern => modern::write_config(&tx, rows)?,
    }
    write_notes(&tx, rows)?;
    write_cards(&tx, rows)?;
    write_revlog(&tx, rows)?;
    write_graves(&tx, rows, generation)?;
    tx.commit()?;

    debug!(
        "Wrote {:?} rows: {} decks, {} notes, {} cards, {} reviews, {} graves",
        generation,
        rows.decks.len(),
        rows.notes.len(),
        rows.cards.len(),
        rows.revlog.len(),
        rows.graves.len()
    );
    db.into_bytes()
}

fn write_notes(tx: &Transaction<'_>, rows: &RowSet<'_>) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO notes (id, guid, mid, mod, usn, tags, flds, sfld, csum, flags, data) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )?;
    for note in &rows.notes {
        let sort_index = rows.col.model(note.model_id).map_or(0, |m| m.sort_field);
        stmt.execute(params![
            note.id,
            note.guid,
            note.model_id,
            note.mtime,
            note.usn,
            join_tags(&note.tags),
            join_fields(&note.fields),
            note.sort_field(sort_index),
            note.checksum(),
            note.flags,
            note.data,
        ])?;
    }
    Ok(())
}

fn write_cards(tx: &Transaction<'_>, rows: &RowSet<'_>) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO cards (id, nid, did, ord, mod, usn, type, queue, due, ivl, factor, reps, \
         lapses, left, odue, odid, flags, data) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
    )?;
    for card in &rows.cards {
        let s = &card.scheduling;
        stmt.execute(params![
            card.id,
            card.note_id,
            card.deck_id,
            card.ordinal,
            card.mtime,
            card.usn,
            s.card_type.as_i64(),
            s.queue.as_i64(),
            s.due,
            s.interval,
            s.ease_factor,
            s.reps,
            s.lapses,
            s.left,
            s.original_due,
            s.original_deck_id,
            s.flags,
            card.data,
        ])?;
    }
    Ok(())
}

fn write_revlog(tx: &Transaction<'_>, rows: &RowSet<'_>) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO revlog (id, cid, usn, ease, ivl, lastIvl, factor, time, type) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    for entry in &rows.revlog {
        stmt.execute(params![
            entry.id,
            entry.card_id,
            entry.usn,
            entry.ease,
            entry.interval,
            entry.last_interval,
            entry.ease_factor,
            entry.time_ms,
            entry.review_kind,
        ])?;
    }
    Ok(())
}

fn write_graves(tx: &Transaction<'_>, rows: &RowSet<'_>, generation: SchemaGeneration) -> Result<()> {
    let sql = match generation {
        SchemaGeneration::Legacy => "INSERT INTO graves (oid, type, usn) VALUES (?1, ?2, ?3)",
        // Keyed by (oid, type): a repeated tombstone collapses into one
        SchemaGeneration::Modern => "INSERT OR REPLACE INTO graves (oid, type, usn) VALUES (?1, ?2, ?3)",
    };
    let mut stmt = tx.prepare(sql)?;
    for grave in &rows.graves {
        stmt.execute(params![grave.oid, grave.kind as i64, grave.usn])?;
    }
    Ok(())
}

/// Write the `col` row
pub(crate) fn write_col_row(
    tx: &Transaction<'_>,
    col: &Collection,
    generation: SchemaGeneration,
    json: [&str; 5],
) -> Result<()> {
    let meta = &col.meta;
    tx.execute(
        "INSERT INTO col (id, crt, mod, scm, ver, dty, usn, ls, conf, models, decks, dconf, tags) \
         VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            meta.created,
            meta.mtime,
            meta.schema_mtime,
            generation.schema_version(),
            meta.dirty,
            meta.usn,
            meta.last_sync,
            json[0],
            json[1],
            json[2],
            json[3],
            json[4],
        ],
    )?;
    Ok(())
}

/// Read the scalar columns of the `col` row
pub(crate) fn read_col_row(conn: &Connection, col: &mut Collection) -> Result<[String; 5]> {
    conn.query_row(
        "SELECT crt, mod, scm, ver, dty, usn, ls, conf, models, decks, dconf, tags FROM col LIMIT 1",
        [],
        |row| {
            col.meta.created = row.get(0)?;
            col.meta.mtime = row.get(1)?;
            col.meta.schema_mtime = row.get(2)?;
            col.meta.schema_version = row.get(3)?;
            col.meta.dirty = row.get(4)?;
            col.meta.usn = row.get(5)?;
            col.meta.last_sync = row.get(6)?;
            Ok([row.get(7)?, row.get(8)?, row.get(9)?, row.get(10)?, row.get(11)?])
        },
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => ApkgError::Schema("col table is empty".to_string()),
        other => other.into(),
    })
}
