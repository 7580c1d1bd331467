//! Protobuf configs stored in the modern schema
//!
//! Only the fields the engine reads or writes are declared. Blobs are
//! re-encoded through [`reencode`], which keeps the stored bytes when the
//! modeled values did not change and otherwise carries unknown top-level
//! fields over into the new encoding.

use crate::error::{ApkgError, Result};
use prost::bytes::Buf;
use prost::encoding::{decode_key, decode_varint, encode_key, encode_varint, skip_field, DecodeContext, WireType};
use prost::Message;

/// Tag numbers a message declares
pub trait KnownTags {
    const TAGS: &'static [u32];
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum NotetypeKind {
    Normal = 0,
    Cloze = 1,
}

#[derive(Clone, PartialEq, Message)]
pub struct NotetypeConfig {
    #[prost(enumeration = "NotetypeKind", tag = "1")]
    pub kind: i32,
    #[prost(uint32, tag = "2")]
    pub sort_field_idx: u32,
    #[prost(string, tag = "3")]
    pub css: String,
    #[prost(int64, tag = "4")]
    pub target_deck_id_unused: i64,
    #[prost(string, tag = "5")]
    pub latex_pre: String,
    #[prost(string, tag = "6")]
    pub latex_post: String,
    #[prost(bool, tag = "7")]
    pub latex_svg: bool,
    #[prost(bytes = "vec", tag = "255")]
    pub other: Vec<u8>,
}

impl KnownTags for NotetypeConfig {
    const TAGS: &'static [u32] = &[1, 2, 3, 4, 5, 6, 7, 255];
}

#[derive(Clone, PartialEq, Message)]
pub struct FieldConfig {
    #[prost(bool, tag = "1")]
    pub sticky: bool,
    #[prost(bool, tag = "2")]
    pub rtl: bool,
    #[prost(string, tag = "3")]
    pub font_name: String,
    #[prost(uint32, tag = "4")]
    pub font_size: u32,
    #[prost(string, tag = "5")]
    pub description: String,
    #[prost(bool, tag = "6")]
    pub plain_text: bool,
    #[prost(bool, tag = "7")]
    pub collapsed: bool,
    #[prost(bool, tag = "8")]
    pub exclude_from_search: bool,
    #[prost(int64, optional, tag = "9")]
    pub id: Option<i64>,
    #[prost(uint32, optional, tag = "10")]
    pub tag: Option<u32>,
    #[prost(bool, tag = "11")]
    pub prevent_deletion: bool,
    #[prost(bytes = "vec", tag = "255")]
    pub other: Vec<u8>,
}

impl KnownTags for FieldConfig {
    const TAGS: &'static [u32] = &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 255];
}

#[derive(Clone, PartialEq, Message)]
pub struct TemplateConfig {
    #[prost(string, tag = "1")]
    pub q_format: String,
    #[prost(string, tag = "2")]
    pub a_format: String,
    #[prost(string, tag = "3")]
    pub q_format_browser: String,
    #[prost(string, tag = "4")]
    pub a_format_browser: String,
    #[prost(int64, tag = "5")]
    pub target_deck_id: i64,
    #[prost(string, tag = "6")]
    pub browser_font_name: String,
    #[prost(uint32, tag = "7")]
    pub browser_font_size: u32,
    #[prost(int64, optional, tag = "8")]
    pub id: Option<i64>,
    #[prost(bytes = "vec", tag = "255")]
    pub other: Vec<u8>,
}

impl KnownTags for TemplateConfig {
    const TAGS: &'static [u32] = &[1, 2, 3, 4, 5, 6, 7, 8, 255];
}

#[derive(Clone, PartialEq, Message)]
pub struct DeckCommon {
    #[prost(bool, tag = "1")]
    pub study_collapsed: bool,
    #[prost(bool, tag = "2")]
    pub browser_collapsed: bool,
    #[prost(uint32, tag = "3")]
    pub last_day_studied: u32,
    #[prost(int32, tag = "4")]
    pub new_studied: i32,
    #[prost(int32, tag = "5")]
    pub review_studied: i32,
    #[prost(int32, tag = "6")]
    pub learning_studied: i32,
    #[prost(int32, tag = "7")]
    pub milliseconds_studied: i32,
    #[prost(bytes = "vec", tag = "255")]
    pub other: Vec<u8>,
}

impl KnownTags for DeckCommon {
    const TAGS: &'static [u32] = &[1, 2, 3, 4, 5, 6, 7, 255];
}

#[derive(Clone, PartialEq, Message)]
pub struct DeckNormal {
    #[prost(int64, tag = "1")]
    pub config_id: i64,
    #[prost(uint32, tag = "2")]
    pub extend_new: u32,
    #[prost(uint32, tag = "3")]
    pub extend_review: u32,
    #[prost(string, tag = "4")]
    pub description: String,
    #[prost(bool, tag = "5")]
    pub markdown_description: bool,
}

impl KnownTags for DeckNormal {
    const TAGS: &'static [u32] = &[1, 2, 3, 4, 5];
}

#[derive(Clone, PartialEq, Message)]
pub struct DeckFiltered {
    #[prost(bool, tag = "1")]
    pub reschedule: bool,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum DeckKind {
    #[prost(message, tag = "1")]
    Normal(DeckNormal),
    #[prost(message, tag = "2")]
    Filtered(DeckFiltered),
}

#[derive(Clone, PartialEq, Message)]
pub struct DeckKindContainer {
    #[prost(oneof = "DeckKind", tags = "1, 2")]
    pub kind: Option<DeckKind>,
}

#[derive(Clone, PartialEq, Message)]
pub struct DeckConfigProto {
    #[prost(float, repeated, tag = "1")]
    pub learn_steps: Vec<f32>,
    #[prost(float, repeated, tag = "2")]
    pub relearn_steps: Vec<f32>,
    #[prost(uint32, tag = "9")]
    pub new_per_day: u32,
    #[prost(uint32, tag = "10")]
    pub reviews_per_day: u32,
    #[prost(float, tag = "11")]
    pub initial_ease: f32,
    #[prost(float, tag = "12")]
    pub easy_multiplier: f32,
    #[prost(float, tag = "13")]
    pub hard_multiplier: f32,
    #[prost(float, tag = "14")]
    pub lapse_multiplier: f32,
    #[prost(float, tag = "15")]
    pub interval_multiplier: f32,
    #[prost(uint32, tag = "16")]
    pub maximum_review_interval: u32,
    #[prost(uint32, tag = "17")]
    pub minimum_lapse_interval: u32,
    #[prost(uint32, tag = "18")]
    pub graduating_interval_good: u32,
    #[prost(uint32, tag = "19")]
    pub graduating_interval_easy: u32,
    #[prost(uint32, tag = "22")]
    pub leech_threshold: u32,
}

impl KnownTags for DeckConfigProto {
    const TAGS: &'static [u32] = &[1, 2, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 22];
}

/// Decode a stored blob, or the default when none is stored
pub fn decode_or_default<M: Message + Default>(blob: Option<&[u8]>) -> Result<M> {
    match blob {
        Some(bytes) => Ok(M::decode(bytes)?),
        None => Ok(M::default()),
    }
}

/// Top-level fields of `bytes` whose tags are not in `known`, verbatim
pub fn unknown_fields(bytes: &[u8], known: &[u32]) -> Result<Vec<u8>> {
    let mut buf = bytes;
    let mut out = Vec::new();
    while buf.has_remaining() {
        let start = bytes.len() - buf.remaining();
        let (tag, wire_type) = decode_key(&mut buf)?;
        skip_field(wire_type, tag, &mut buf, DecodeContext::default())?;
        let end = bytes.len() - buf.remaining();
        if !known.contains(&tag) {
            out.extend_from_slice(&bytes[start..end]);
        }
    }
    Ok(out)
}

/// Payload of the last length-delimited field with the given tag
pub fn nested_field(bytes: &[u8], wanted: u32) -> Result<Option<Vec<u8>>> {
    let mut buf = bytes;
    let mut found = None;
    while buf.has_remaining() {
        let (tag, wire_type) = decode_key(&mut buf)?;
        if tag == wanted && wire_type == WireType::LengthDelimited {
            let len = decode_varint(&mut buf)? as usize;
            if len > buf.remaining() {
                return Err(ApkgError::Encoding(format!("field {} overruns its message", tag)));
            }
            found = Some(buf[..len].to_vec());
            buf.advance(len);
        } else {
            skip_field(wire_type, tag, &mut buf, DecodeContext::default())?;
        }
    }
    Ok(found)
}

fn encode_nested(tag: u32, payload: &[u8], out: &mut Vec<u8>) {
    encode_key(tag, WireType::LengthDelimited, out);
    encode_varint(payload.len() as u64, out);
    out.extend_from_slice(payload);
}

/// Apply modeled values to a stored blob
///
/// Unchanged values return the stored bytes as they were. Changed values are
/// encoded fresh, followed by whatever fields of the stored blob this message
/// does not declare.
pub fn reencode<M>(original: Option<&[u8]>, apply: impl FnOnce(&mut M)) -> Result<Vec<u8>>
where
    M: Message + Default + Clone + PartialEq + KnownTags,
{
    let Some(bytes) = original else {
        let mut msg = M::default();
        apply(&mut msg);
        return Ok(msg.encode_to_vec());
    };
    let before = M::decode(bytes)?;
    let mut after = before.clone();
    apply(&mut after);
    if after == before {
        return Ok(bytes.to_vec());
    }
    let mut out = after.encode_to_vec();
    out.extend(unknown_fields(bytes, M::TAGS)?);
    Ok(out)
}

/// Encode the deck kind blob for a normal deck
///
/// The normal-deck message is nested, so its own unknown fields are carried
/// over separately from the container's.
pub fn reencode_normal_deck(
    original: Option<&[u8]>,
    apply: impl FnOnce(&mut DeckNormal),
) -> Result<Vec<u8>> {
    let original_normal = match original {
        Some(bytes) => match DeckKindContainer::decode(bytes)?.kind {
            Some(DeckKind::Normal(_)) => nested_field(bytes, 1)?,
            _ => None,
        },
        None => None,
    };
    let normal = reencode::<DeckNormal>(original_normal.as_deref(), apply)?;
    if let (Some(bytes), Some(before)) = (original, &original_normal) {
        if &normal == before {
            return Ok(bytes.to_vec());
        }
    }
    let mut out = Vec::new();
    encode_nested(1, &normal, &mut out);
    if let (Some(bytes), Some(_)) = (original, &original_normal) {
        out.extend(unknown_fields(bytes, &[1, 2])?);
    }
    Ok(out)
}

/// Encode the deck kind blob for a filtered deck
pub fn encode_filtered_deck(original: Option<&[u8]>) -> Result<Vec<u8>> {
    if let Some(bytes) = original {
        if let Some(DeckKind::Filtered(_)) = DeckKindContainer::decode(bytes)?.kind {
            return Ok(bytes.to_vec());
        }
    }
    let container = DeckKindContainer {
        kind: Some(DeckKind::Filtered(DeckFiltered { reschedule: true })),
    };
    Ok(container.encode_to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A field config followed by a field this engine does not know (tag 12)
    fn field_blob_with_extra() -> Vec<u8> {
        let mut bytes = FieldConfig {
            sticky: true,
            font_name: "Arial".into(),
            font_size: 20,
            ..Default::default()
        }
        .encode_to_vec();
        bytes.extend([0x60, 0x01]);
        bytes
    }

    #[test]
    fn test_unchanged_blob_is_verbatim() -> Result<()> {
        let original = field_blob_with_extra();
        let out = reencode::<FieldConfig>(Some(&original), |f| f.sticky = true)?;
        assert_eq!(out, original);
        Ok(())
    }

    #[test]
    fn test_changed_blob_keeps_unknown_fields() -> Result<()> {
        let original = field_blob_with_extra();
        let out = reencode::<FieldConfig>(Some(&original), |f| f.sticky = false)?;
        assert_ne!(out, original);
        assert!(out.ends_with(&[0x60, 0x01]));
        let decoded = FieldConfig::decode(out.as_slice())?;
        assert!(!decoded.sticky);
        assert_eq!(decoded.font_name, "Arial");
        Ok(())
    }

    #[test]
    fn test_unknown_fields_extraction() -> Result<()> {
        let bytes = field_blob_with_extra();
        assert_eq!(unknown_fields(&bytes, FieldConfig::TAGS)?, vec![0x60, 0x01]);
        assert!(unknown_fields(&[], FieldConfig::TAGS)?.is_empty());
        assert!(unknown_fields(&[0x0a, 0x05, 0x01], &[]).is_err());
        Ok(())
    }

    #[test]
    fn test_fresh_blob() -> Result<()> {
        let out = reencode::<NotetypeConfig>(None, |c| {
            c.kind = NotetypeKind::Cloze as i32;
            c.css = ".card {}".into();
        })?;
        let decoded = NotetypeConfig::decode(out.as_slice())?;
        assert_eq!(decoded.kind, NotetypeKind::Cloze as i32);
        assert_eq!(decoded.css, ".card {}");
        Ok(())
    }

    #[test]
    fn test_normal_deck_nested_unknowns() -> Result<()> {
        // Normal deck with an unknown nested field (tag 6, varint 7)
        let mut normal = DeckNormal {
            config_id: 1,
            description: "old".into(),
            ..Default::default()
        }
        .encode_to_vec();
        normal.extend([0x30, 0x07]);
        let mut original = Vec::new();
        encode_nested(1, &normal, &mut original);

        let same = reencode_normal_deck(Some(&original), |n| n.config_id = 1)?;
        assert_eq!(same, original);

        let changed = reencode_normal_deck(Some(&original), |n| n.description = "new".into())?;
        let nested = nested_field(&changed, 1)?.unwrap();
        assert!(nested.ends_with(&[0x30, 0x07]));
        match DeckKindContainer::decode(changed.as_slice())?.kind {
            Some(DeckKind::Normal(n)) => assert_eq!(n.description, "new"),
            other => panic!("unexpected kind {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_filtered_deck_blob() -> Result<()> {
        let fresh = encode_filtered_deck(None)?;
        assert!(matches!(
            DeckKindContainer::decode(fresh.as_slice())?.kind,
            Some(DeckKind::Filtered(_))
        ));
        assert_eq!(encode_filtered_deck(Some(&fresh))?, fresh);
        Ok(())
    }
}
