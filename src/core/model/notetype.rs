//! Note types (models): field and template definitions

use super::{ModelId, Opaque};
use serde::{Deserialize, Serialize};

/// Standard or cloze note type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum ModelKind {
    Standard = 0,
    Cloze = 1,
}

impl ModelKind {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(ModelKind::Standard),
            1 => Some(ModelKind::Cloze),
            _ => None,
        }
    }
}

/// A field definition
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub ord: u32,
    pub sticky: bool,
    pub raw: Opaque,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ord: u32) -> Self {
        FieldDef {
            name: name.into(),
            ord,
            sticky: false,
            raw: Opaque::default(),
        }
    }
}

/// A card template
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateDef {
    pub name: String,
    pub ord: u32,
    pub question_format: String,
    pub answer_format: String,
    /// Modification time in seconds (modern schema keeps one per template)
    pub mtime: i64,
    pub usn: i32,
    pub raw: Opaque,
}

impl TemplateDef {
    pub fn new(
        name: impl Into<String>,
        ord: u32,
        question_format: impl Into<String>,
        answer_format: impl Into<String>,
    ) -> Self {
        TemplateDef {
            name: name.into(),
            ord,
            question_format: question_format.into(),
            answer_format: answer_format.into(),
            mtime: 0,
            usn: 0,
            raw: Opaque::default(),
        }
    }
}

/// A note type
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub id: ModelId,
    pub name: String,
    pub kind: ModelKind,
    pub fields: Vec<FieldDef>,
    pub templates: Vec<TemplateDef>,
    pub css: String,
    pub latex_pre: String,
    pub latex_post: String,
    /// Index of the field used for sorting and the `sfld` cache
    pub sort_field: u32,
    pub mtime: i64,
    pub usn: i32,
    pub raw: Opaque,
}

pub const DEFAULT_CSS: &str = ".card {\n    font-family: arial;\n    font-size: 20px;\n    text-align: center;\n    color: black;\n    background-color: white;\n}\n";

pub const DEFAULT_LATEX_PRE: &str = "\\documentclass[12pt]{article}\n\\special{papersize=3in,5in}\n\\usepackage[utf8]{inputenc}\n\\usepackage{amssymb,amsmath}\n\\pagestyle{empty}\n\\setlength{\\parindent}{0in}\n\\begin{document}\n";

pub const DEFAULT_LATEX_POST: &str = "\\end{document}";

impl Model {
    /// Empty note type with default styling
    pub fn new(id: ModelId, name: impl Into<String>, kind: ModelKind) -> Self {
        Model {
            id,
            name: name.into(),
            kind,
            fields: Vec::new(),
            templates: Vec::new(),
            css: DEFAULT_CSS.to_string(),
            latex_pre: DEFAULT_LATEX_PRE.to_string(),
            latex_post: DEFAULT_LATEX_POST.to_string(),
            sort_field: 0,
            mtime: super::now_secs(),
            usn: -1,
            raw: Opaque::default(),
        }
    }

    /// The stock "Basic" note type
    pub fn basic(id: ModelId) -> Self {
        let mut model = Model::new(id, "Basic", ModelKind::Standard);
        model.fields = vec![FieldDef::new("Front", 0), FieldDef::new("Back", 1)];
        model.templates = vec![TemplateDef::new(
            "Card 1",
            0,
            "{{Front}}",
            "{{FrontSide}}\n\n<hr id=answer>\n\n{{Back}}",
        )];
        model
    }

    /// The stock "Basic (and reversed card)" note type
    pub fn basic_and_reversed(id: ModelId) -> Self {
        let mut model = Model::basic(id);
        model.name = "Basic (and reversed card)".to_string();
        model.templates.push(TemplateDef::new(
            "Card 2",
            1,
            "{{Back}}",
            "{{FrontSide}}\n\n<hr id=answer>\n\n{{Front}}",
        ));
        model
    }

    /// The stock "Cloze" note type
    pub fn cloze(id: ModelId) -> Self {
        let mut model = Model::new(id, "Cloze", ModelKind::Cloze);
        model.fields = vec![FieldDef::new("Text", 0), FieldDef::new("Back Extra", 1)];
        model.templates = vec![TemplateDef::new(
            "Cloze",
            0,
            "{{cloze:Text}}",
            "{{cloze:Text}}<br>\n{{Back Extra}}",
        )];
        model.css.push_str(".cloze {\n    font-weight: bold;\n    color: blue;\n}\n");
        model
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Case-insensitive field lookup
    pub fn field_index(&self, name: &str) -> Option<usize> {
        let wanted = name.to_lowercase();
        self.fields.iter().position(|f| f.name.to_lowercase() == wanted)
    }

    pub fn template(&self, ord: u32) -> Option<&TemplateDef> {
        match self.kind {
            // Every cloze card shares the single template
            ModelKind::Cloze => self.templates.first(),
            ModelKind::Standard => self.templates.iter().find(|t| t.ord == ord),
        }
    }

    /// Whether a card ordinal is valid for this note type
    pub fn accepts_ordinal(&self, ord: u32) -> bool {
        self.template(ord).is_some()
    }

    /// Check the ordinal and template-count invariants
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (i, field) in self.fields.iter().enumerate() {
            if field.ord as usize != i {
                return Err(format!(
                    "note type {}: field {:?} has ordinal {} at position {}",
                    self.id, field.name, field.ord, i
                ));
            }
        }
        for (i, template) in self.templates.iter().enumerate() {
            if template.ord as usize != i {
                return Err(format!(
                    "note type {}: template {:?} has ordinal {} at position {}",
                    self.id, template.name, template.ord, i
                ));
            }
        }
        if self.fields.is_empty() {
            return Err(format!("note type {} has no fields", self.id));
        }
        if self.templates.is_empty() {
            return Err(format!("note type {} has no templates", self.id));
        }
        if self.kind == ModelKind::Cloze && self.templates.len() != 1 {
            return Err(format!(
                "cloze note type {} has {} templates",
                self.id,
                self.templates.len()
            ));
        }
        Ok(())
    }

    pub(crate) fn touch(&mut self) {
        self.mtime = super::now_secs();
        self.usn = -1;
    }
}
