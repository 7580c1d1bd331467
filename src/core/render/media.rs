//! Inline media references as data URIs

use crate::model::{Collection, Model};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::{Captures, Regex};
use std::collections::BTreeSet;
use std::sync::OnceLock;

fn src_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"(?i)\bsrc=("([^"]*)"|'([^']*)')"#).unwrap())
}

fn sound_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[sound:([^\]]+)\]").unwrap())
}

fn css_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)\burl\(\s*(?:"([^"]*)"|'([^']*)'|([^)'"\s]+))\s*\)"#).unwrap()
    })
}

/// MIME type guessed from a filename extension
pub fn mime_type(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "mp3" => "audio/mpeg",
        "ogg" | "oga" => "audio/ogg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        "flac" => "audio/flac",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

fn data_uri(filename: &str, data: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type(filename), STANDARD.encode(data))
}

/// Filenames referenced by `src` attributes and sound tags
pub fn referenced_files(html: &str) -> Vec<String> {
    let mut names = Vec::new();
    for caps in src_pattern().captures_iter(html) {
        if let Some(name) = caps.get(2).or_else(|| caps.get(3)) {
            names.push(name.as_str().to_string());
        }
    }
    for caps in sound_pattern().captures_iter(html) {
        names.push(caps[1].to_string());
    }
    names
}

/// Files a note type's templates and stylesheet need
///
/// Covers `src` attributes, sound tags and CSS `url()` references, plus any
/// underscore-prefixed media file named in the text: Anki keeps such files
/// for note types even when no note mentions them.
pub fn model_references(model: &Model, col: &Collection) -> BTreeSet<String> {
    let texts: Vec<&str> = model
        .templates
        .iter()
        .flat_map(|t| [t.question_format.as_str(), t.answer_format.as_str()])
        .chain(std::iter::once(model.css.as_str()))
        .collect();

    let mut names = BTreeSet::new();
    for text in &texts {
        names.extend(referenced_files(text));
        for caps in css_url_pattern().captures_iter(text) {
            if let Some(name) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) {
                names.insert(name.as_str().to_string());
            }
        }
    }
    for file in col.media() {
        if file.filename.starts_with('_') && texts.iter().any(|t| t.contains(file.filename.as_str())) {
            names.insert(file.filename.clone());
        }
    }
    names
}

/// Replace references to files in the collection's media with data URIs
///
/// References to unknown files are left alone.
pub fn resolve(html: &str, col: &Collection) -> String {
    let with_src = src_pattern().replace_all(html, |caps: &Captures| {
        let name = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
        match col.media_file(name) {
            Some(file) => format!("src=\"{}\"", data_uri(name, &file.data)),
            None => caps[0].to_string(),
        }
    });
    sound_pattern()
        .replace_all(&with_src, |caps: &Captures| {
            let name = &caps[1];
            match col.media_file(name) {
                Some(file) => format!(
                    "<audio controls src=\"{}\"></audio>",
                    data_uri(name, &file.data)
                ),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
