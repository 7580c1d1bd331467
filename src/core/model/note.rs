//! Notes

use super::{ModelId, NoteId};
use crate::render::strip_html;
use sha1::{Digest, Sha1};

/// A note: field values shared by one or more cards
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub id: NoteId,
    pub guid: String,
    pub model_id: ModelId,
    /// One value per field of the note type, in ordinal order
    pub fields: Vec<String>,
    pub tags: Vec<String>,
    pub mtime: i64,
    pub usn: i32,
    pub flags: i64,
    /// Opaque `data` column
    pub data: String,
}

impl Note {
    pub fn new(id: NoteId, guid: impl Into<String>, model_id: ModelId, fields: Vec<String>) -> Self {
        Note {
            id,
            guid: guid.into(),
            model_id,
            fields,
            tags: Vec::new(),
            mtime: super::now_secs(),
            usn: -1,
            flags: 0,
            data: String::new(),
        }
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    /// Sort field cache (`sfld`)
    pub fn sort_field(&self, sort_index: u32) -> String {
        strip_html(self.field(sort_index as usize).unwrap_or_default())
    }

    /// First-field checksum (`csum`): leading 32 bits of the SHA-1 of the
    /// stripped first field
    pub fn checksum(&self) -> i64 {
        field_checksum(self.field(0).unwrap_or_default())
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    pub(crate) fn touch(&mut self) {
        self.mtime = super::now_secs();
        self.usn = -1;
    }
}

pub fn field_checksum(text: &str) -> i64 {
    let digest = Sha1::digest(strip_html(text).as_bytes());
    i64::from(u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_matches_sha1_prefix() {
        let digest = Sha1::digest("What is 2+2?".as_bytes());
        let hex: String = digest.iter().take(4).map(|b| format!("{:02x}", b)).collect();
        let expected = i64::from_str_radix(&hex, 16).unwrap();
        assert_eq!(field_checksum("What is 2+2?"), expected);
        assert_eq!(field_checksum("<b>What is 2+2?</b>"), expected);
    }

    #[test]
    fn test_sort_field_strips_markup() {
        let note = Note::new(1, "g", 2, vec!["<i>front</i>".into(), "back".into()]);
        assert_eq!(note.sort_field(0), "front");
        assert_eq!(note.sort_field(1), "back");
        assert_eq!(note.sort_field(9), "");
    }
}
