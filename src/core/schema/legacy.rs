//! Legacy (version 11) configuration: JSON blobs in the `col` row
//!
//! Every object is kept whole in [`Opaque::json`]. Writing starts from that
//! object and overwrites the modeled keys in place, so unmodeled keys and
//! key order come back out unchanged.

use super::{read_col_row, write_col_row, RowSet, SchemaGeneration};
use crate::error::{ApkgError, Result};
use crate::model::{
    Collection, Deck, DeckOptions, FieldDef, Model, ModelKind, Opaque, TagEntry, TemplateDef,
    DEFAULT_OPTIONS_ID,
};
use rusqlite::{Connection, Transaction};
use serde_json::{json, Map, Value};
use tracing::debug;

type JsonObject = Map<String, Value>;

fn parse_object(text: &str, what: &str) -> Result<JsonObject> {
    if text.trim().is_empty() {
        return Ok(JsonObject::new());
    }
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(map),
        _ => Err(ApkgError::Schema(format!("col.{} is not a JSON object", what))),
    }
}

/// Integer that older clients sometimes stored as a string
fn int(obj: &JsonObject, key: &str) -> Option<i64> {
    match obj.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn text(obj: &JsonObject, key: &str) -> String {
    obj.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn flag(obj: &JsonObject, key: &str) -> bool {
    match obj.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
        _ => false,
    }
}

fn floats(value: Option<&Value>) -> Vec<f32> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_f64).map(|f| f as f32).collect())
        .unwrap_or_default()
}

/// Step lists as Anki writes them: whole minutes stay integers
fn steps_json(steps: &[f32]) -> Value {
    Value::Array(
        steps
            .iter()
            .map(|&step| {
                if step.is_finite() && step.fract() == 0.0 {
                    json!(step as i64)
                } else {
                    json!(f64::from(step))
                }
            })
            .collect(),
    )
}

fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a JsonObject> {
    value
        .as_object()
        .ok_or_else(|| ApkgError::Schema(format!("{} is not a JSON object", what)))
}

/// Nested object under `key`, created when absent
fn child<'a>(obj: &'a mut JsonObject, key: &str) -> Option<&'a mut JsonObject> {
    if !matches!(obj.get(key), Some(Value::Object(_))) {
        obj.insert(key.to_string(), Value::Object(JsonObject::new()));
    }
    obj.get_mut(key).and_then(Value::as_object_mut)
}

/// Read models, decks, options, tags and collection config from `col`
pub fn read_config(conn: &Connection, col: &mut Collection) -> Result<()> {
    let [conf, models, decks, dconf, tags] = read_col_row(conn, col)?;
    col.meta.conf = parse_object(&conf, "conf")?;

    for (key, value) in parse_object(&models, "models")? {
        let model = parse_model(&key, &value)?;
        col.put_model(model);
    }
    for (key, value) in parse_object(&decks, "decks")? {
        col.put_deck(parse_deck(&key, &value)?);
    }
    for (key, value) in parse_object(&dconf, "dconf")? {
        let options = parse_options(&key, &value)?;
        col.deck_options.insert(options.id, options);
    }
    for (name, usn) in parse_object(&tags, "tags")? {
        col.tags.push(TagEntry {
            name,
            usn: usn.as_i64().unwrap_or(0) as i32,
            collapsed: false,
            config: None,
        });
    }
    debug!(
        "Legacy config: {} note types, {} decks, {} option groups, {} tags",
        col.models().len(),
        col.decks().len(),
        col.deck_options.len(),
        col.tags.len()
    );
    Ok(())
}

fn parse_model(key: &str, value: &Value) -> Result<Model> {
    let obj = as_object(value, "note type")?;
    let id = int(obj, "id")
        .or_else(|| key.parse().ok())
        .ok_or_else(|| ApkgError::Schema(format!("note type {:?} has no id", key)))?;
    let kind_value = int(obj, "type").unwrap_or(0);
    let kind = ModelKind::from_i64(kind_value)
        .ok_or_else(|| ApkgError::Schema(format!("note type {} has unknown kind {}", id, kind_value)))?;
    let mtime = int(obj, "mod").unwrap_or(0);
    let usn = int(obj, "usn").unwrap_or(0) as i32;

    let mut fields = Vec::new();
    for (i, field) in obj.get("flds").and_then(Value::as_array).into_iter().flatten().enumerate() {
        let f = as_object(field, "field")?;
        fields.push(FieldDef {
            name: text(f, "name"),
            ord: int(f, "ord").unwrap_or(i as i64) as u32,
            sticky: flag(f, "sticky"),
            raw: Opaque::from_json(f.clone()),
        });
    }
    fields.sort_by_key(|f| f.ord);

    let mut templates = Vec::new();
    for (i, template) in obj.get("tmpls").and_then(Value::as_array).into_iter().flatten().enumerate() {
        let t = as_object(template, "template")?;
        templates.push(TemplateDef {
            name: text(t, "name"),
            ord: int(t, "ord").unwrap_or(i as i64) as u32,
            question_format: text(t, "qfmt"),
            answer_format: text(t, "afmt"),
            mtime,
            usn,
            raw: Opaque::from_json(t.clone()),
        });
    }
    templates.sort_by_key(|t| t.ord);

    let model = Model {
        id,
        name: text(obj, "name"),
        kind,
        fields,
        templates,
        css: text(obj, "css"),
        latex_pre: text(obj, "latexPre"),
        latex_post: text(obj, "latexPost"),
        sort_field: int(obj, "sortf").unwrap_or(0) as u32,
        mtime,
        usn,
        raw: Opaque::from_json(obj.clone()),
    };
    model.validate().map_err(ApkgError::Schema)?;
    Ok(model)
}

fn parse_deck(key: &str, value: &Value) -> Result<Deck> {
    let obj = as_object(value, "deck")?;
    let id = int(obj, "id")
        .or_else(|| key.parse().ok())
        .ok_or_else(|| ApkgError::Schema(format!("deck {:?} has no id", key)))?;
    let filtered = flag(obj, "dyn");
    Ok(Deck {
        id,
        name: text(obj, "name"),
        description: text(obj, "desc"),
        parent_id: None,
        children: Vec::new(),
        filtered,
        options_id: if filtered {
            None
        } else {
            Some(int(obj, "conf").unwrap_or(DEFAULT_OPTIONS_ID))
        },
        mtime: int(obj, "mod").unwrap_or(0),
        usn: int(obj, "usn").unwrap_or(0) as i32,
        raw: Opaque::from_json(obj.clone()),
    })
}

fn parse_options(key: &str, value: &Value) -> Result<DeckOptions> {
    let obj = as_object(value, "deck options")?;
    let id = int(obj, "id")
        .or_else(|| key.parse().ok())
        .ok_or_else(|| ApkgError::Schema(format!("deck options {:?} has no id", key)))?;
    let empty = JsonObject::new();
    let new = obj.get("new").and_then(Value::as_object).unwrap_or(&empty);
    let rev = obj.get("rev").and_then(Value::as_object).unwrap_or(&empty);
    let lapse = obj.get("lapse").and_then(Value::as_object).unwrap_or(&empty);
    let defaults = DeckOptions::new(id, "");
    Ok(DeckOptions {
        id,
        name: text(obj, "name"),
        mtime: int(obj, "mod").unwrap_or(0),
        usn: int(obj, "usn").unwrap_or(0) as i32,
        new_per_day: int(new, "perDay").map_or(defaults.new_per_day, |v| v as u32),
        reviews_per_day: int(rev, "perDay").map_or(defaults.reviews_per_day, |v| v as u32),
        learn_steps: floats(new.get("delays")),
        relearn_steps: floats(lapse.get("delays")),
        initial_ease: int(new, "initialFactor").map_or(defaults.initial_ease, |v| v as f32 / 1000.0),
        max_interval: int(rev, "maxIvl").map_or(defaults.max_interval, |v| v as u32),
        leech_threshold: int(lapse, "leechFails").map_or(defaults.leech_threshold, |v| v as u32),
        raw: Opaque::from_json(obj.clone()),
    })
}

/// Write the `col` row with every JSON blob
pub fn write_config(tx: &Transaction<'_>, rows: &RowSet<'_>) -> Result<()> {
    let col = rows.col;

    let conf = if !col.meta.conf.is_empty() {
        col.meta.conf.clone()
    } else {
        conf_from_entries(col)
    };
    let models: JsonObject = col
        .models()
        .values()
        .map(|m| (m.id.to_string(), model_json(m)))
        .collect();
    let decks: JsonObject = rows
        .decks
        .iter()
        .map(|d| (d.id.to_string(), deck_json(d)))
        .collect();
    let dconf: JsonObject = col
        .deck_options
        .values()
        .map(|o| (o.id.to_string(), options_json(o)))
        .collect();
    let tags: JsonObject = col
        .tags
        .iter()
        .map(|t| (t.name.clone(), json!(t.usn)))
        .collect();

    if col.tags.iter().any(|t| t.config.is_some()) {
        debug!("Dropping modern tag configs from legacy output");
    }

    let blobs = [
        serde_json::to_string(&conf)?,
        serde_json::to_string(&models)?,
        serde_json::to_string(&decks)?,
        serde_json::to_string(&dconf)?,
        serde_json::to_string(&tags)?,
    ];
    write_col_row(
        tx,
        col,
        SchemaGeneration::Legacy,
        [&blobs[0], &blobs[1], &blobs[2], &blobs[3], &blobs[4]],
    )
}

/// Collection config rebuilt from modern `config` rows (JSON values)
fn conf_from_entries(col: &Collection) -> JsonObject {
    col.config
        .iter()
        .map(|entry| {
            let value = serde_json::from_slice(&entry.value)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&entry.value).into_owned()));
            (entry.key.clone(), value)
        })
        .collect()
}

pub(crate) fn model_json(model: &Model) -> Value {
    let mut obj = model.raw.json.clone();
    if obj.is_empty() {
        obj.insert("did".into(), Value::Null);
        obj.insert("latexsvg".into(), json!(false));
        obj.insert("req".into(), json!([]));
        obj.insert("tags".into(), json!([]));
        obj.insert("vers".into(), json!([]));
    }
    obj.insert("id".into(), json!(model.id));
    obj.insert("name".into(), json!(model.name));
    obj.insert("type".into(), json!(model.kind as i32));
    obj.insert("mod".into(), json!(model.mtime));
    obj.insert("usn".into(), json!(model.usn));
    obj.insert("sortf".into(), json!(model.sort_field));
    obj.insert("css".into(), json!(model.css));
    obj.insert("latexPre".into(), json!(model.latex_pre));
    obj.insert("latexPost".into(), json!(model.latex_post));
    obj.insert(
        "flds".into(),
        Value::Array(model.fields.iter().map(field_json).collect()),
    );
    obj.insert(
        "tmpls".into(),
        Value::Array(model.templates.iter().map(template_json).collect()),
    );
    Value::Object(obj)
}

fn field_json(field: &FieldDef) -> Value {
    let mut obj = field.raw.json.clone();
    if obj.is_empty() {
        obj.insert("rtl".into(), json!(false));
        obj.insert("font".into(), json!("Arial"));
        obj.insert("size".into(), json!(20));
        obj.insert("media".into(), json!([]));
    }
    obj.insert("name".into(), json!(field.name));
    obj.insert("ord".into(), json!(field.ord));
    obj.insert("sticky".into(), json!(field.sticky));
    Value::Object(obj)
}

fn template_json(template: &TemplateDef) -> Value {
    let mut obj = template.raw.json.clone();
    if obj.is_empty() {
        obj.insert("did".into(), Value::Null);
        obj.insert("bqfmt".into(), json!(""));
        obj.insert("bafmt".into(), json!(""));
        obj.insert("bfont".into(), json!(""));
        obj.insert("bsize".into(), json!(0));
    }
    obj.insert("name".into(), json!(template.name));
    obj.insert("ord".into(), json!(template.ord));
    obj.insert("qfmt".into(), json!(template.question_format));
    obj.insert("afmt".into(), json!(template.answer_format));
    Value::Object(obj)
}

fn deck_json(deck: &Deck) -> Value {
    let mut obj = deck.raw.json.clone();
    if obj.is_empty() {
        obj.insert("collapsed".into(), json!(false));
        obj.insert("browserCollapsed".into(), json!(false));
        obj.insert("newToday".into(), json!([0, 0]));
        obj.insert("revToday".into(), json!([0, 0]));
        obj.insert("lrnToday".into(), json!([0, 0]));
        obj.insert("timeToday".into(), json!([0, 0]));
        if deck.filtered {
            obj.insert("terms".into(), json!([["", 100, 0]]));
            obj.insert("resched".into(), json!(true));
        } else {
            obj.insert("extendNew".into(), json!(0));
            obj.insert("extendRev".into(), json!(0));
        }
    }
    obj.insert("id".into(), json!(deck.id));
    obj.insert("name".into(), json!(deck.name));
    obj.insert("desc".into(), json!(deck.description));
    obj.insert("dyn".into(), json!(i32::from(deck.filtered)));
    obj.insert("mod".into(), json!(deck.mtime));
    obj.insert("usn".into(), json!(deck.usn));
    if let Some(options) = deck.options_id {
        obj.insert("conf".into(), json!(options));
    }
    Value::Object(obj)
}

fn options_json(options: &DeckOptions) -> Value {
    let mut obj = options.raw.json.clone();
    if obj.is_empty() {
        if let Value::Object(defaults) = json!({
            "maxTaken": 60,
            "autoplay": true,
            "timer": 0,
            "replayq": true,
            "dyn": false,
            "new": {"bury": false, "ints": [1, 4, 0], "order": 1},
            "rev": {"bury": false, "ease4": 1.3, "ivlFct": 1.0, "hardFactor": 1.2},
            "lapse": {"leechAction": 1, "minInt": 1, "mult": 0.0}
        }) {
            obj = defaults;
        }
    }
    obj.insert("id".into(), json!(options.id));
    obj.insert("name".into(), json!(options.name));
    obj.insert("mod".into(), json!(options.mtime));
    obj.insert("usn".into(), json!(options.usn));
    if let Some(new) = child(&mut obj, "new") {
        new.insert("perDay".into(), json!(options.new_per_day));
        new.insert("delays".into(), steps_json(&options.learn_steps));
        new.insert(
            "initialFactor".into(),
            json!((f64::from(options.initial_ease) * 1000.0).round() as i64),
        );
    }
    if let Some(rev) = child(&mut obj, "rev") {
        rev.insert("perDay".into(), json!(options.reviews_per_day));
        rev.insert("maxIvl".into(), json!(options.max_interval));
    }
    if let Some(lapse) = child(&mut obj, "lapse") {
        lapse.insert("delays".into(), steps_json(&options.relearn_steps));
        lapse.insert("leechFails".into(), json!(options.leech_threshold));
    }
    Value::Object(obj)
}
