//! Package metadata entry
//!
//! The `meta` entry is a protobuf message carrying a single version enum.
//! The version decides which database entry, manifest format and media
//! compression the rest of the package uses.

use crate::error::{ApkgError, Result};
use prost::Message;
use serde::{Deserialize, Serialize};

/// Entry name of the package metadata
pub const META_ENTRY: &str = "meta";

/// Package format version
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
    prost::Enumeration,
)]
#[repr(i32)]
#[serde(rename_all = "kebab-case")]
pub enum PackageVersion {
    Unknown = 0,
    /// `collection.anki2`, legacy schema, JSON manifest
    Legacy1 = 1,
    /// `collection.anki21`, legacy schema, JSON manifest
    Legacy2 = 2,
    /// `collection.anki21b`, zstd modern schema, protobuf manifest
    Latest = 3,
}

impl PackageVersion {
    /// Database entry name written for this version
    pub fn database_entry(self) -> &'static str {
        match self {
            PackageVersion::Legacy1 => "collection.anki2",
            PackageVersion::Unknown | PackageVersion::Legacy2 => "collection.anki21",
            PackageVersion::Latest => "collection.anki21b",
        }
    }

    /// Version implied by a database entry name
    pub fn from_database_entry(name: &str) -> Option<Self> {
        match name {
            "collection.anki2" => Some(PackageVersion::Legacy1),
            "collection.anki21" => Some(PackageVersion::Legacy2),
            "collection.anki21b" => Some(PackageVersion::Latest),
            _ => None,
        }
    }

    /// Whether the database, manifest and media are zstd compressed
    pub fn is_compressed(self) -> bool {
        matches!(self, PackageVersion::Latest)
    }

    /// Whether the media manifest uses the protobuf form
    pub fn uses_protobuf_manifest(self) -> bool {
        matches!(self, PackageVersion::Latest)
    }

    /// Parse a CLI / config spelling
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "legacy1" | "legacy-1" | "anki2" => Some(PackageVersion::Legacy1),
            "legacy2" | "legacy-2" | "anki21" => Some(PackageVersion::Legacy2),
            "latest" | "anki21b" => Some(PackageVersion::Latest),
            _ => None,
        }
    }
}

/// Wire form of the `meta` entry
#[derive(Clone, PartialEq, prost::Message)]
pub struct PackageMetadata {
    #[prost(enumeration = "PackageVersion", tag = "1")]
    pub version: i32,
}

impl PackageMetadata {
    pub fn new(version: PackageVersion) -> Self {
        PackageMetadata {
            version: version as i32,
        }
    }

    /// Decode the `meta` entry
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(PackageMetadata::decode(bytes)?)
    }

    pub fn encode_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Declared version, rejecting values outside the enum
    pub fn package_version(&self) -> Result<PackageVersion> {
        PackageVersion::try_from(self.version)
            .map_err(|_| ApkgError::Encoding(format!("unknown package version {}", self.version)))
    }
}
