//! Question/answer format expansion
//!
//! Formats use mustache-style markup:
//!
//! - `{{Field}}` substitutes a field value (field names match case-insensitively)
//! - `{{filter:Field}}` applies filters, innermost (rightmost) first
//! - `{{#Field}}...{{/Field}}` renders its body when the field is non-empty
//! - `{{^Field}}...{{/Field}}` renders its body when the field is empty
//! - `{{FrontSide}}` is the rendered question on the answer side
//!
//! Unresolved placeholders render as nothing.

use super::{cloze, strip_html};
use crate::model::ModelKind;

/// Which side of the card is being rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Question,
    Answer,
}

const FRONT_SIDE: &str = "FrontSide";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    Text(&'a str),
    Replacement(&'a str),
    Open(&'a str),
    OpenNegated(&'a str),
    Close(&'a str),
}

fn tokenize(format: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut rest = format;
    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        if start > 0 {
            tokens.push(Token::Text(&rest[..start]));
        }
        let inner = rest[start + 2..start + 2 + len].trim();
        tokens.push(match inner.chars().next() {
            Some('#') => Token::Open(inner[1..].trim()),
            Some('^') => Token::OpenNegated(inner[1..].trim()),
            Some('/') => Token::Close(inner[1..].trim()),
            _ => Token::Replacement(inner),
        });
        rest = &rest[start + 2 + len + 2..];
    }
    if !rest.is_empty() {
        tokens.push(Token::Text(rest));
    }
    tokens
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Text(String),
    Replacement { field: String, filters: Vec<String> },
    Section { field: String, negated: bool, children: Vec<Node> },
}

/// A parsed format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    /// Parse a format; never fails
    ///
    /// A stray closing tag is dropped and an unclosed section runs to the end
    /// of the format.
    pub fn parse(format: &str) -> Self {
        let mut tokens = tokenize(format).into_iter();
        let (nodes, _) = parse_nodes(&mut tokens, None);
        Template { nodes }
    }

    /// Field names the format refers to, in order of appearance
    pub fn referenced_fields(&self) -> Vec<String> {
        fn walk(nodes: &[Node], out: &mut Vec<String>) {
            for node in nodes {
                match node {
                    Node::Text(_) => {}
                    Node::Replacement { field, .. } => {
                        if field != FRONT_SIDE && !out.contains(field) {
                            out.push(field.clone());
                        }
                    }
                    Node::Section { field, children, .. } => {
                        if !out.contains(field) {
                            out.push(field.clone());
                        }
                        walk(children, out);
                    }
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.nodes, &mut out);
        out
    }

    /// Render one side; `front` is the rendered question, used on the answer side
    pub fn render(&self, ctx: &RenderContext<'_>, side: Side, front: Option<&str>) -> String {
        let mut out = String::new();
        render_nodes(&self.nodes, ctx, side, front, &mut out);
        out
    }
}

fn parse_nodes<'a>(
    tokens: &mut impl Iterator<Item = Token<'a>>,
    closing: Option<&str>,
) -> (Vec<Node>, bool) {
    let mut nodes = Vec::new();
    while let Some(token) = tokens.next() {
        match token {
            Token::Text(text) => nodes.push(Node::Text(text.to_string())),
            Token::Replacement(inner) => {
                let mut parts: Vec<&str> = inner.split(':').map(str::trim).collect();
                let field = parts.pop().unwrap_or_default().to_string();
                nodes.push(Node::Replacement {
                    field,
                    filters: parts.into_iter().map(str::to_string).collect(),
                });
            }
            Token::Open(field) | Token::OpenNegated(field) => {
                let negated = matches!(token, Token::OpenNegated(_));
                let (children, _) = parse_nodes(tokens, Some(field));
                nodes.push(Node::Section {
                    field: field.to_string(),
                    negated,
                    children,
                });
            }
            Token::Close(field) => {
                if closing.is_some_and(|c| c.eq_ignore_ascii_case(field)) {
                    return (nodes, true);
                }
            }
        }
    }
    (nodes, false)
}

/// Field values and card identity for one render
pub struct RenderContext<'a> {
    names: &'a [&'a str],
    values: &'a [String],
    kind: ModelKind,
    /// 1-based active cloze number
    cloze_ordinal: u32,
}

impl<'a> RenderContext<'a> {
    pub fn new(names: &'a [&'a str], values: &'a [String], kind: ModelKind, card_ordinal: u32) -> Self {
        RenderContext {
            names,
            values,
            kind,
            cloze_ordinal: card_ordinal + 1,
        }
    }

    fn index(&self, name: &str) -> Option<usize> {
        let lower = name.to_lowercase();
        self.names.iter().position(|n| n.to_lowercase() == lower)
    }

    fn value(&self, name: &str) -> Option<&str> {
        self.index(name)
            .map(|i| self.values.get(i).map(String::as_str).unwrap_or_default())
    }

    fn is_nonempty(&self, name: &str) -> bool {
        self.value(name).is_some_and(|v| !v.trim().is_empty())
    }
}

fn render_nodes(
    nodes: &[Node],
    ctx: &RenderContext<'_>,
    side: Side,
    front: Option<&str>,
    out: &mut String,
) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Replacement { field, filters } => {
                out.push_str(&replacement(field, filters, ctx, side, front));
            }
            Node::Section {
                field,
                negated,
                children,
            } => {
                if ctx.is_nonempty(field) != *negated {
                    render_nodes(children, ctx, side, front, out);
                }
            }
        }
    }
}

fn replacement(
    field: &str,
    filters: &[String],
    ctx: &RenderContext<'_>,
    side: Side,
    front: Option<&str>,
) -> String {
    if field.eq_ignore_ascii_case(FRONT_SIDE) && filters.is_empty() {
        return match side {
            Side::Question => String::new(),
            Side::Answer => front.unwrap_or_default().to_string(),
        };
    }
    let Some(value) = ctx.value(field) else {
        return String::new();
    };
    let show_answer = side == Side::Answer;

    let mut text = value.to_string();
    let mut clozed = false;
    for filter in filters.iter().rev() {
        match filter.to_ascii_lowercase().as_str() {
            "cloze" => {
                text = cloze::render(&text, ctx.cloze_ordinal, show_answer);
                clozed = true;
            }
            "text" => text = strip_html(&text),
            // hint and type inputs show the plain value
            _ => {}
        }
    }
    // The primary field of a cloze note type always gets cloze treatment
    if !clozed && ctx.kind == ModelKind::Cloze && ctx.index(field) == Some(0) {
        text = cloze::render(&text, ctx.cloze_ordinal, show_answer);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(format: &str, names: &[&str], values: &[&str], side: Side) -> String {
        let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        let ctx = RenderContext::new(names, &values, ModelKind::Standard, 0);
        Template::parse(format).render(&ctx, side, Some("FRONT"))
    }

    #[test]
    fn test_substitution_is_case_insensitive() {
        assert_eq!(
            render("Q: {{front}} / {{BACK}}", &["Front", "Back"], &["a", "b"], Side::Question),
            "Q: a / b"
        );
    }

    #[test]
    fn test_unresolved_placeholders_dropped() {
        assert_eq!(render("x{{Missing}}y", &["Front"], &["a"], Side::Question), "xy");
    }

    #[test]
    fn test_conditional_sections() {
        let format = "{{#Back}}has {{Back}}{{/Back}}{{^Back}}no back{{/Back}}";
        assert_eq!(render(format, &["Back"], &["b"], Side::Question), "has b");
        assert_eq!(render(format, &["Back"], &["   "], Side::Question), "no back");
        assert_eq!(render(format, &["Other"], &["x"], Side::Question), "no back");
    }

    #[test]
    fn test_nested_sections() {
        let format = "{{#A}}a{{#B}}b{{/B}}{{/A}}";
        assert_eq!(render(format, &["A", "B"], &["1", "1"], Side::Question), "ab");
        assert_eq!(render(format, &["A", "B"], &["1", ""], Side::Question), "a");
        assert_eq!(render(format, &["A", "B"], &["", "1"], Side::Question), "");
    }

    #[test]
    fn test_front_side() {
        let format = "{{FrontSide}}<hr>{{Back}}";
        assert_eq!(render(format, &["Back"], &["b"], Side::Question), "<hr>b");
        assert_eq!(render(format, &["Back"], &["b"], Side::Answer), "FRONT<hr>b");
    }

    #[test]
    fn test_filters() {
        assert_eq!(
            render("{{text:Front}}", &["Front"], &["<b>bold</b>"], Side::Question),
            "bold"
        );
        assert_eq!(render("{{hint:Front}}", &["Front"], &["h"], Side::Question), "h");
        assert_eq!(render("{{type:Front}}", &["Front"], &["t"], Side::Question), "t");
    }

    #[test]
    fn test_malformed_markup() {
        assert_eq!(render("{{/Stray}}ok", &["A"], &["1"], Side::Question), "ok");
        assert_eq!(render("{{#A}}open", &["A"], &["1"], Side::Question), "open");
        assert_eq!(render("tail {{A", &["A"], &["1"], Side::Question), "tail {{A");
    }

    #[test]
    fn test_referenced_fields() {
        let template = Template::parse("{{#A}}{{cloze:B}}{{/A}}{{FrontSide}}{{A}}");
        assert_eq!(template.referenced_fields(), vec!["A".to_string(), "B".to_string()]);
    }
}
