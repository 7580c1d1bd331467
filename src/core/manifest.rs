//! Media manifest codec
//!
//! The `media` entry maps the numbered blobs of a package back to their
//! filenames. Two wire formats exist:
//! - **Legacy**: a JSON object `{"0": "a.png", "1": "b.mp3"}`
//! - **Modern**: a protobuf `MediaEntries` list, one entry per blob in index
//!   order, carrying name, size and SHA-1
//!
//! Both forms round-trip index and filename; the modern form also
//! round-trips size and hash.

use crate::error::{ApkgError, Result};
use prost::Message;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use std::fmt;

/// Entry name of the media manifest
pub const MEDIA_ENTRY: &str = "media";

/// Manifest wire format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Legacy,
    Modern,
}

/// One media file as listed in the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Numbered entry name of the blob inside the container
    pub index: u32,
    pub filename: String,
    /// Uncompressed size (modern format only)
    pub size: Option<u32>,
    /// SHA-1 of the uncompressed bytes (modern format only)
    pub sha1: Option<Vec<u8>>,
}

impl ManifestEntry {
    pub fn new(index: u32, filename: impl Into<String>) -> Self {
        ManifestEntry {
            index,
            filename: filename.into(),
            size: None,
            sha1: None,
        }
    }

    /// Entry with size and hash computed from the blob
    pub fn for_blob(index: u32, filename: impl Into<String>, data: &[u8]) -> Self {
        ManifestEntry {
            index,
            filename: filename.into(),
            size: Some(data.len() as u32),
            sha1: Some(sha1_digest(data)),
        }
    }

    /// Container entry name holding this blob
    pub fn entry_name(&self) -> String {
        self.index.to_string()
    }
}

/// SHA-1 digest of a byte slice
pub fn sha1_digest(data: &[u8]) -> Vec<u8> {
    Sha1::digest(data).to_vec()
}

/// Encode manifest entries in the requested format
pub fn encode(entries: &[ManifestEntry], format: ManifestFormat) -> Result<Vec<u8>> {
    match format {
        ManifestFormat::Legacy => Ok(serde_json::to_vec(&LegacyManifest(entries.to_vec()))?),
        ManifestFormat::Modern => {
            let mut sorted = entries.to_vec();
            sorted.sort_by_key(|e| e.index);
            let message = MediaEntries {
                entries: sorted
                    .into_iter()
                    .map(|e| MediaEntry {
                        name: e.filename,
                        size: e.size,
                        sha1: e.sha1.unwrap_or_default(),
                        legacy_zip_filename: Some(e.index),
                    })
                    .collect(),
            };
            Ok(message.encode_to_vec())
        }
    }
}

/// Decode manifest bytes in the given format, sorted by index
pub fn decode(bytes: &[u8], format: ManifestFormat) -> Result<Vec<ManifestEntry>> {
    let mut entries = match format {
        ManifestFormat::Legacy => {
            // Exporters write an empty entry as "{}", some as nothing at all
            if bytes.iter().all(|b| b.is_ascii_whitespace()) {
                return Ok(Vec::new());
            }
            let manifest: LegacyManifest = serde_json::from_slice(bytes)?;
            manifest.0
        }
        ManifestFormat::Modern => MediaEntries::decode(bytes)?
            .entries
            .into_iter()
            .enumerate()
            .map(|(position, e)| ManifestEntry {
                index: e.legacy_zip_filename.unwrap_or(position as u32),
                filename: e.name,
                size: e.size,
                sha1: if e.sha1.is_empty() { None } else { Some(e.sha1) },
            })
            .collect(),
    };
    entries.sort_by_key(|e| e.index);
    for pair in entries.windows(2) {
        if pair[0].index == pair[1].index {
            return Err(ApkgError::Encoding(format!(
                "duplicate media index {}",
                pair[0].index
            )));
        }
    }
    Ok(entries)
}

/// Protobuf media manifest
#[derive(Clone, PartialEq, prost::Message)]
pub struct MediaEntries {
    #[prost(message, repeated, tag = "1")]
    pub entries: Vec<MediaEntry>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MediaEntry {
    #[prost(string, tag = "1")]
    pub name: String,
    /// Absent when the writer left it out
    #[prost(uint32, optional, tag = "2")]
    pub size: Option<u32>,
    #[prost(bytes = "vec", tag = "3")]
    pub sha1: Vec<u8>,
    #[prost(uint32, optional, tag = "255")]
    pub legacy_zip_filename: Option<u32>,
}

/// JSON manifest, serialized in index order
struct LegacyManifest(Vec<ManifestEntry>);

impl Serialize for LegacyManifest {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut sorted: Vec<&ManifestEntry> = self.0.iter().collect();
        sorted.sort_by_key(|e| e.index);
        let mut map = serializer.serialize_map(Some(sorted.len()))?;
        for entry in sorted {
            map.serialize_entry(&entry.index.to_string(), &entry.filename)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for LegacyManifest {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ManifestVisitor;

        impl<'de> Visitor<'de> for ManifestVisitor {
            type Value = LegacyManifest;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of numeric strings to filenames")
            }

            fn visit_map<A>(self, mut access: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::new();
                while let Some((key, filename)) = access.next_entry::<String, String>()? {
                    let index = key.parse::<u32>().map_err(|_| {
                        serde::de::Error::custom(format!("media index {:?} is not a number", key))
                    })?;
                    entries.push(ManifestEntry::new(index, filename));
                }
                Ok(LegacyManifest(entries))
            }
        }

        deserializer.deserialize_map(ManifestVisitor)
    }
}
