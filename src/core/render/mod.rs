//! Card rendering
//!
//! [`template`] expands question/answer formats, [`cloze`] rewrites cloze
//! markup and [`media`] inlines referenced media as data URIs. Rendering is
//! read-only over the collection.

pub mod cloze;
pub mod media;
pub mod template;

use crate::model::{Card, Collection, Model};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

pub use template::{RenderContext, Side, Template};

/// Rendered front and back of a card
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCard {
    pub question: String,
    pub answer: String,
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>|<[^>]+>").unwrap())
}

/// Strip HTML tags and decode the common entities
pub fn strip_html(html: &str) -> String {
    let text = tag_pattern().replace_all(html, "");
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Render a card with the note's stored field values
pub fn render_card(col: &Collection, card: &Card) -> RenderedCard {
    let fields = col
        .note(card.note_id)
        .map(|n| n.fields.clone())
        .unwrap_or_default();
    render_with_fields(col, card, &fields)
}

/// Render a card with explicit field values (for example pending edits)
pub fn render_with_fields(col: &Collection, card: &Card, fields: &[String]) -> RenderedCard {
    let model = col.note(card.note_id).and_then(|n| col.model(n.model_id));
    let rendered = match model {
        Some(model) => render_model(model, card.ordinal, fields).unwrap_or_else(|| {
            debug!("Card {} has no template {}, using fallback", card.id, card.ordinal);
            fallback(fields)
        }),
        None => {
            debug!("Card {} has no note type, using fallback", card.id);
            fallback(fields)
        }
    };
    RenderedCard {
        question: media::resolve(&rendered.question, col),
        answer: media::resolve(&rendered.answer, col),
    }
}

/// Expand a note type's template for one card ordinal
pub fn render_model(model: &Model, ordinal: u32, fields: &[String]) -> Option<RenderedCard> {
    let template = model.template(ordinal)?;
    let names = model.field_names();
    let ctx = RenderContext::new(&names, fields, model.kind, ordinal);

    let question_format = Template::parse(&template.question_format);
    let answer_format = Template::parse(&template.answer_format);
    let question = question_format.render(&ctx, Side::Question, None);
    let answer = answer_format.render(&ctx, Side::Answer, Some(&question));
    Some(RenderedCard { question, answer })
}

/// First field on the front, second (or the first again) on the back
fn fallback(fields: &[String]) -> RenderedCard {
    let question = fields.first().cloned().unwrap_or_default();
    let answer = fields.get(1).cloned().unwrap_or_else(|| question.clone());
    RenderedCard { question, answer }
}
