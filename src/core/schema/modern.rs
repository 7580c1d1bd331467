//! Modern (version 18) configuration: dedicated tables with protobuf configs
//!
//! The stored blob of every row is kept in [`Opaque::blobs`] and re-encoded
//! on write through [`proto::reencode`].

use super::proto::{
    self, DeckCommon, DeckConfigProto, DeckKind, DeckKindContainer, FieldConfig, NotetypeConfig,
    NotetypeKind, TemplateConfig,
};
use super::{read_col_row, write_col_row, RowSet, SchemaGeneration};
use crate::error::{ApkgError, Result};
use crate::model::{
    Collection, ConfigEntry, Deck, DeckOptions, FieldDef, Model, ModelKind, Opaque, TagEntry,
    TemplateDef, DEFAULT_OPTIONS_ID,
};
use crate::validation::{deck_name_from_db, deck_name_to_db};
use prost::Message;
use rusqlite::{params, Connection, Transaction};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Column holding a row's protobuf config
const CONFIG: &str = "config";

/// Read note types, decks, options, config rows and tags
pub fn read_config(conn: &Connection, col: &mut Collection) -> Result<()> {
    let [conf, ..] = read_col_row(conn, col)?;
    col.meta.conf = match serde_json::from_str::<Value>(&conf) {
        Ok(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };

    read_notetypes(conn, col)?;
    read_decks(conn, col)?;
    read_deck_config(conn, col)?;

    let mut stmt = conn.prepare("SELECT KEY, usn, mtime_secs, val FROM config ORDER BY KEY")?;
    let rows = stmt.query_map([], |row| {
        Ok(ConfigEntry {
            key: row.get(0)?,
            usn: row.get(1)?,
            mtime: row.get(2)?,
            value: row.get(3)?,
        })
    })?;
    for entry in rows {
        col.config.push(entry?);
    }

    let mut stmt = conn.prepare("SELECT tag, usn, collapsed, config FROM tags ORDER BY tag")?;
    let rows = stmt.query_map([], |row| {
        Ok(TagEntry {
            name: row.get(0)?,
            usn: row.get(1)?,
            collapsed: row.get(2)?,
            config: row.get(3)?,
        })
    })?;
    for tag in rows {
        col.tags.push(tag?);
    }

    debug!(
        "Modern config: {} note types, {} decks, {} option groups, {} config rows, {} tags",
        col.models().len(),
        col.decks().len(),
        col.deck_options.len(),
        col.config.len(),
        col.tags.len()
    );
    Ok(())
}

fn read_notetypes(conn: &Connection, col: &mut Collection) -> Result<()> {
    let mut models: BTreeMap<i64, Model> = BTreeMap::new();

    let mut stmt = conn.prepare("SELECT id, name, mtime_secs, usn, config FROM notetypes ORDER BY id")?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let blob: Vec<u8> = row.get(4)?;
        let config = NotetypeConfig::decode(blob.as_slice())?;
        let kind = ModelKind::from_i64(i64::from(config.kind)).ok_or_else(|| {
            ApkgError::Schema(format!("note type {} has unknown kind {}", id, config.kind))
        })?;
        models.insert(
            id,
            Model {
                id,
                name: row.get(1)?,
                kind,
                fields: Vec::new(),
                templates: Vec::new(),
                css: config.css,
                latex_pre: config.latex_pre,
                latex_post: config.latex_post,
                sort_field: config.sort_field_idx,
                mtime: row.get(2)?,
                usn: row.get(3)?,
                raw: Opaque::default().with_blob(CONFIG, blob),
            },
        );
    }

    let mut stmt = conn.prepare("SELECT ntid, ord, name, config FROM fields ORDER BY ntid, ord")?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let ntid: i64 = row.get(0)?;
        let ord: u32 = row.get(1)?;
        let blob: Vec<u8> = row.get(3)?;
        let config = FieldConfig::decode(blob.as_slice())?;
        let model = models.get_mut(&ntid).ok_or_else(|| ApkgError::Referential {
            kind: "note type",
            id: ntid,
            referenced_by: format!("field {}", ord),
        })?;
        model.fields.push(FieldDef {
            name: row.get(2)?,
            ord,
            sticky: config.sticky,
            raw: Opaque::default().with_blob(CONFIG, blob),
        });
    }

    let mut stmt = conn.prepare(
        "SELECT ntid, ord, name, mtime_secs, usn, config FROM templates ORDER BY ntid, ord",
    )?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let ntid: i64 = row.get(0)?;
        let ord: u32 = row.get(1)?;
        let blob: Vec<u8> = row.get(5)?;
        let config = TemplateConfig::decode(blob.as_slice())?;
        let model = models.get_mut(&ntid).ok_or_else(|| ApkgError::Referential {
            kind: "note type",
            id: ntid,
            referenced_by: format!("template {}", ord),
        })?;
        model.templates.push(TemplateDef {
            name: row.get(2)?,
            ord,
            question_format: config.q_format,
            answer_format: config.a_format,
            mtime: row.get(3)?,
            usn: row.get(4)?,
            raw: Opaque::default().with_blob(CONFIG, blob),
        });
    }

    for model in models.into_values() {
        model.validate().map_err(ApkgError::Schema)?;
        col.put_model(model);
    }
    Ok(())
}

fn read_decks(conn: &Connection, col: &mut Collection) -> Result<()> {
    let mut stmt =
        conn.prepare("SELECT id, name, mtime_secs, usn, common, kind FROM decks ORDER BY id")?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let name: String = row.get(1)?;
        let common: Vec<u8> = row.get(4)?;
        let kind: Vec<u8> = row.get(5)?;

        let mut deck = Deck::new(id, deck_name_from_db(&name));
        match DeckKindContainer::decode(kind.as_slice())?.kind {
            Some(DeckKind::Normal(normal)) => {
                deck.options_id = Some(normal.config_id);
                deck.description = normal.description;
            }
            Some(DeckKind::Filtered(_)) => {
                deck.filtered = true;
                deck.options_id = None;
            }
            None => return Err(ApkgError::Schema(format!("deck {} has no kind", id))),
        }
        // Validates the stored blob; its values are not modeled
        DeckCommon::decode(common.as_slice())?;
        deck.mtime = row.get(2)?;
        deck.usn = row.get(3)?;
        deck.raw = Opaque::default()
            .with_blob("common", common)
            .with_blob("kind", kind);
        col.put_deck(deck);
    }
    Ok(())
}

fn read_deck_config(conn: &Connection, col: &mut Collection) -> Result<()> {
    let mut stmt =
        conn.prepare("SELECT id, name, mtime_secs, usn, config FROM deck_config ORDER BY id")?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let blob: Vec<u8> = row.get(4)?;
        let config = DeckConfigProto::decode(blob.as_slice())?;
        col.deck_options.insert(
            id,
            DeckOptions {
                id,
                name: row.get(1)?,
                mtime: row.get(2)?,
                usn: row.get(3)?,
                new_per_day: config.new_per_day,
                reviews_per_day: config.reviews_per_day,
                learn_steps: config.learn_steps,
                relearn_steps: config.relearn_steps,
                initial_ease: config.initial_ease,
                max_interval: config.maximum_review_interval,
                leech_threshold: config.leech_threshold,
                raw: Opaque::default().with_blob(CONFIG, blob),
            },
        );
    }
    Ok(())
}

/// Write every configuration table and the `col` row
pub fn write_config(tx: &Transaction<'_>, rows: &RowSet<'_>) -> Result<()> {
    let col = rows.col;
    for model in col.models().values() {
        write_notetype(tx, model)?;
    }

    let mut stmt = tx.prepare(
        "INSERT INTO decks (id, name, mtime_secs, usn, common, kind) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for deck in &rows.decks {
        let legacy = &deck.raw.json;
        let common = proto::reencode::<DeckCommon>(deck.raw.blob("common"), |c| {
            if let Some(collapsed) = legacy.get("collapsed").and_then(Value::as_bool) {
                c.study_collapsed = collapsed;
            }
            if let Some(collapsed) = legacy.get("browserCollapsed").and_then(Value::as_bool) {
                c.browser_collapsed = collapsed;
            }
        })?;
        let kind = if deck.filtered {
            proto::encode_filtered_deck(deck.raw.blob("kind"))?
        } else {
            proto::reencode_normal_deck(deck.raw.blob("kind"), |n| {
                n.config_id = deck.options_id.unwrap_or(DEFAULT_OPTIONS_ID);
                n.description = deck.description.clone();
            })?
        };
        stmt.execute(params![
            deck.id,
            deck_name_to_db(&deck.name),
            deck.mtime,
            deck.usn,
            common,
            kind
        ])?;
    }

    let mut stmt = tx.prepare(
        "INSERT INTO deck_config (id, name, mtime_secs, usn, config) VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for options in col.deck_options.values() {
        let fresh = options.raw.blob(CONFIG).is_none();
        let config = proto::reencode::<DeckConfigProto>(options.raw.blob(CONFIG), |c| {
            c.learn_steps = options.learn_steps.clone();
            c.relearn_steps = options.relearn_steps.clone();
            c.new_per_day = options.new_per_day;
            c.reviews_per_day = options.reviews_per_day;
            c.initial_ease = options.initial_ease;
            c.maximum_review_interval = options.max_interval;
            c.leech_threshold = options.leech_threshold;
            if fresh {
                c.easy_multiplier = 1.3;
                c.hard_multiplier = 1.2;
                c.interval_multiplier = 1.0;
                c.minimum_lapse_interval = 1;
                c.graduating_interval_good = 1;
                c.graduating_interval_easy = 4;
            }
        })?;
        stmt.execute(params![options.id, options.name, options.mtime, options.usn, config])?;
    }

    let mut stmt =
        tx.prepare("INSERT INTO config (KEY, usn, mtime_secs, val) VALUES (?1, ?2, ?3, ?4)")?;
    for entry in config_entries(col)? {
        stmt.execute(params![entry.key, entry.usn, entry.mtime, entry.value])?;
    }

    let mut stmt =
        tx.prepare("INSERT INTO tags (tag, usn, collapsed, config) VALUES (?1, ?2, ?3, ?4)")?;
    for tag in &col.tags {
        stmt.execute(params![tag.name, tag.usn, tag.collapsed, tag.config])?;
    }

    write_col_row(tx, col, SchemaGeneration::Modern, ["", "", "", "", ""])
}

fn write_notetype(tx: &Transaction<'_>, model: &Model) -> Result<()> {
    let legacy = &model.raw.json;
    let config = proto::reencode::<NotetypeConfig>(model.raw.blob(CONFIG), |c| {
        c.kind = match model.kind {
            ModelKind::Standard => NotetypeKind::Normal as i32,
            ModelKind::Cloze => NotetypeKind::Cloze as i32,
        };
        c.sort_field_idx = model.sort_field;
        c.css = model.css.clone();
        c.latex_pre = model.latex_pre.clone();
        c.latex_post = model.latex_post.clone();
        if let Some(svg) = legacy.get("latexsvg").and_then(Value::as_bool) {
            c.latex_svg = svg;
        }
    })?;
    tx.execute(
        "INSERT INTO notetypes (id, name, mtime_secs, usn, config) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![model.id, model.name, model.mtime, model.usn, config],
    )?;

    let mut stmt =
        tx.prepare("INSERT INTO fields (ntid, ord, name, config) VALUES (?1, ?2, ?3, ?4)")?;
    for field in &model.fields {
        let fresh = field.raw.blob(CONFIG).is_none();
        let json = &field.raw.json;
        let config = proto::reencode::<FieldConfig>(field.raw.blob(CONFIG), |f| {
            f.sticky = field.sticky;
            if fresh {
                f.rtl = json.get("rtl").and_then(Value::as_bool).unwrap_or(false);
                f.font_name = json
                    .get("font")
                    .and_then(Value::as_str)
                    .unwrap_or("Arial")
                    .to_string();
                f.font_size = json.get("size").and_then(Value::as_u64).unwrap_or(20) as u32;
            }
        })?;
        stmt.execute(params![model.id, field.ord, field.name, config])?;
    }

    let mut stmt = tx.prepare(
        "INSERT INTO templates (ntid, ord, name, mtime_secs, usn, config) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for template in &model.templates {
        let fresh = template.raw.blob(CONFIG).is_none();
        let json = &template.raw.json;
        let config = proto::reencode::<TemplateConfig>(template.raw.blob(CONFIG), |t| {
            t.q_format = template.question_format.clone();
            t.a_format = template.answer_format.clone();
            if fresh {
                let text = |key: &str| json.get(key).and_then(Value::as_str).unwrap_or("").to_string();
                t.q_format_browser = text("bqfmt");
                t.a_format_browser = text("bafmt");
                t.browser_font_name = text("bfont");
                t.target_deck_id = json.get("did").and_then(Value::as_i64).unwrap_or(0);
            }
        })?;
        stmt.execute(params![
            model.id,
            template.ord,
            template.name,
            template.mtime,
            template.usn,
            config
        ])?;
    }
    Ok(())
}

/// Config rows to write: the stored rows, or rows derived from `col.conf`
fn config_entries(col: &Collection) -> Result<Vec<ConfigEntry>> {
    if !col.config.is_empty() {
        return Ok(col.config.clone());
    }
    let mtime = col.meta.mtime / 1000;
    col.meta
        .conf
        .iter()
        .map(|(key, value)| {
            Ok(ConfigEntry {
                key: key.clone(),
                usn: 0,
                mtime,
                value: serde_json::to_vec(value)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseImage;
    use crate::ids::IdSource;
    use crate::schema::{parse_rows, write_rows};

    fn reparse(col: &Collection) -> Result<Collection> {
        let bytes = write_rows(&RowSet::full(col), SchemaGeneration::Modern)?;
        let db = DatabaseImage::open(&bytes)?;
        parse_rows(&db, IdSource::seeded(1))
    }

    #[test]
    fn test_blobs_survive_unchanged() -> Result<()> {
        let col = reparse(&super::super::tests::sample_collection())?;
        let again = reparse(&col)?;
        for (id, model) in col.models() {
            let other = again.model(*id).unwrap();
            assert_eq!(other.raw, model.raw);
            for (a, b) in model.fields.iter().zip(&other.fields) {
                assert_eq!(a.raw, b.raw);
            }
        }
        for (id, deck) in col.decks() {
            assert_eq!(again.deck(*id).unwrap().raw, deck.raw);
        }
        assert_eq!(again.config, col.config);
        Ok(())
    }

    #[test]
    fn test_nested_deck_names_use_unit_separator() -> Result<()> {
        let col = super::super::tests::sample_collection();
        let bytes = write_rows(&RowSet::full(&col), SchemaGeneration::Modern)?;
        let db = DatabaseImage::open(&bytes)?;
        let stored: String = db.conn().query_row(
            "SELECT name FROM decks WHERE name LIKE 'Science_Biology'",
            [],
            |r| r.get(0),
        )?;
        assert_eq!(stored, "Science\x1fBiology");
        Ok(())
    }

    #[test]
    fn test_conf_becomes_config_rows() -> Result<()> {
        let col = super::super::tests::sample_collection();
        let back = reparse(&col)?;
        let cur = back.config.iter().find(|e| e.key == "curDeck").unwrap();
        assert_eq!(serde_json::from_slice::<Value>(&cur.value)?, serde_json::json!(1));
        Ok(())
    }

    #[test]
    fn test_edited_description_rewrites_kind() -> Result<()> {
        let mut col = reparse(&super::super::tests::sample_collection())?;
        let deck = col.deck_by_name("Science").unwrap().id;
        let before = col.deck(deck).unwrap().raw.blob("kind").unwrap().to_vec();
        col.decks.get_mut(&deck).unwrap().description = "Cells and more".into();
        let back = reparse(&col)?;
        let after = back.deck(deck).unwrap();
        assert_eq!(after.description, "Cells and more");
        assert_ne!(after.raw.blob("kind").unwrap(), before.as_slice());
        Ok(())
    }

    #[test]
    fn test_legacy_to_modern_keeps_options() -> Result<()> {
        let mut col = super::super::tests::sample_collection();
        if let Some(options) = col.deck_options.get_mut(&DEFAULT_OPTIONS_ID) {
            options.new_per_day = 35;
            options.learn_steps = vec![2.0, 15.0, 60.0];
        }
        let back = reparse(&col)?;
        let options = &back.deck_options[&DEFAULT_OPTIONS_ID];
        assert_eq!(options.new_per_day, 35);
        assert_eq!(options.learn_steps, vec![2.0, 15.0, 60.0]);
        assert_eq!(options.initial_ease, 2.5);
        Ok(())
    }
}
