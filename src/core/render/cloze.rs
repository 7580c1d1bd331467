//! Cloze deletions
//!
//! `{{cN::answer}}` or `{{cN::answer::hint}}` hides `answer` on card N.
//! Deletions belonging to other cards are shown as plain text.

use regex::{Captures, Regex};
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Placeholder shown on the front when no hint is given
pub const DEFAULT_PLACEHOLDER: &str = "[...]";

fn cloze_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)\{\{c(\d+)::(.*?)(?:::(.*?))?\}\}").unwrap())
}

/// Distinct cloze numbers in the text, ascending
pub fn ordinals(text: &str) -> Vec<u32> {
    cloze_pattern()
        .captures_iter(text)
        .filter_map(|c| c[1].parse::<u32>().ok())
        .filter(|n| *n > 0)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Plain-text rendering for cloze number `ordinal`
///
/// The front shows the hint in brackets (or `[...]`) in place of the active
/// deletions; the back shows the answers.
pub fn reveal(text: &str, ordinal: u32, show_answer: bool) -> String {
    transform(text, ordinal, show_answer, false)
}

/// Card rendering: like [`reveal`], with active deletions wrapped in
/// `<span class="cloze">`
pub fn render(text: &str, ordinal: u32, show_answer: bool) -> String {
    transform(text, ordinal, show_answer, true)
}

fn transform(text: &str, ordinal: u32, show_answer: bool, markup: bool) -> String {
    cloze_pattern()
        .replace_all(text, |caps: &Captures| {
            let answer = caps.get(2).map_or("", |m| m.as_str());
            let active = caps[1].parse::<u32>().ok() == Some(ordinal);
            if !active {
                return answer.to_string();
            }
            let shown = if show_answer {
                answer.to_string()
            } else {
                match caps.get(3).map(|m| m.as_str().trim()) {
                    Some(hint) if !hint.is_empty() => format!("[{}]", hint),
                    _ => DEFAULT_PLACEHOLDER.to_string(),
                }
            };
            if markup {
                format!("<span class=\"cloze\">{}</span>", shown)
            } else {
                shown
            }
        })
        .into_owned()
}
