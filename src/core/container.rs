//! Package container codec
//!
//! A package is a zip bundle:
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │ meta                 PackageMetadata (pb)  │
//! │ collection.anki21b   zstd(SQLite, v18)     │  one database entry
//! │   | collection.anki21 / collection.anki2   │  SQLite, v11
//! │ media                manifest (pb or JSON) │
//! │ 0, 1, 2, ...         media blobs           │
//! └────────────────────────────────────────────┘
//! ```
//!
//! [`NamedEntries`] is the raw entry map. [`PackageContents`] is the decoded
//! view: version resolved, database and media decompressed, manifest applied.

use crate::compression::{compress, decompress, CompressionMethod};
use crate::error::{ApkgError, Result};
use crate::manifest::{self, ManifestEntry, ManifestFormat, MEDIA_ENTRY};
use crate::meta::{PackageMetadata, PackageVersion, META_ENTRY};
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod as ZipMethod, ZipArchive, ZipWriter};

/// Database entry names, most preferred first
const DATABASE_ENTRIES: [&str; 3] = ["collection.anki21b", "collection.anki21", "collection.anki2"];

/// Raw container entries keyed by name
///
/// Entry order inside the zip is not significant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamedEntries {
    entries: BTreeMap<String, Vec<u8>>,
}

impl NamedEntries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, data: Vec<u8>) {
        self.entries.insert(name.into(), data);
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reads and writes the container bundle
pub trait ContainerCodec {
    /// Split a package into its named entries, checking mandatory entries
    ///
    /// An entry larger than `max_entry_size` once extracted is a container
    /// error.
    fn open(&self, bytes: &[u8], max_entry_size: usize) -> Result<NamedEntries>;

    /// Bundle named entries into a package
    fn write(&self, entries: &NamedEntries) -> Result<Vec<u8>>;
}

/// Zip-backed container codec
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipCodec;

impl ContainerCodec for ZipCodec {
    fn open(&self, bytes: &[u8], max_entry_size: usize) -> Result<NamedEntries> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| ApkgError::Container(format!("not a zip bundle: {}", e)))?;

        let mut entries = NamedEntries::new();
        for i in 0..archive.len() {
            let mut file = archive
                .by_index(i)
                .map_err(|e| ApkgError::Container(format!("unreadable entry {}: {}", i, e)))?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let declared = file.size();
            if declared > max_entry_size as u64 {
                return Err(ApkgError::Container(format!(
                    "entry {} declares {} bytes, limit is {}",
                    name, declared, max_entry_size
                )));
            }
            // The header may lie; read no more than the limit allows
            let mut data = Vec::with_capacity(declared.min(bytes.len() as u64) as usize);
            (&mut file)
                .take(max_entry_size as u64 + 1)
                .read_to_end(&mut data)
                .map_err(|e| ApkgError::Container(format!("corrupt entry {}: {}", name, e)))?;
            if data.len() > max_entry_size {
                return Err(ApkgError::Container(format!(
                    "entry {} exceeds {} bytes",
                    name, max_entry_size
                )));
            }
            entries.insert(name, data);
        }
        debug!("Opened container with {} entries", entries.len());

        if !DATABASE_ENTRIES.iter().any(|name| entries.contains(name)) {
            return Err(ApkgError::Container("no collection database entry".to_string()));
        }
        if !entries.contains(MEDIA_ENTRY) {
            return Err(ApkgError::Container("no media manifest entry".to_string()));
        }
        if entries.contains("collection.anki21b") && !entries.contains(META_ENTRY) {
            return Err(ApkgError::Container(
                "compressed collection without meta entry".to_string(),
            ));
        }

        Ok(entries)
    }

    fn write(&self, entries: &NamedEntries) -> Result<Vec<u8>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in &entries.entries {
            // Stored with a fixed timestamp: equal entries give equal bytes
            let options = SimpleFileOptions::default()
                .compression_method(ZipMethod::Stored)
                .last_modified_time(zip::DateTime::default());
            zip.start_file(name.as_str(), options)?;
            zip.write_all(data)?;
        }
        let cursor = zip.finish()?;
        Ok(cursor.into_inner())
    }
}

/// One media file carried by a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedMedia {
    pub entry: ManifestEntry,
    pub data: Vec<u8>,
}

/// Decoded package: version, raw database bytes and media
#[derive(Debug, Clone)]
pub struct PackageContents {
    pub version: PackageVersion,
    /// Uncompressed SQLite image
    pub database: Vec<u8>,
    pub media: Vec<PackagedMedia>,
}

/// Resolve the version and database entry of an opened package
fn resolve_version(entries: &NamedEntries) -> Result<PackageVersion> {
    if let Some(meta) = entries.get(META_ENTRY) {
        let version = PackageMetadata::decode_bytes(meta)?.package_version()?;
        if version != PackageVersion::Unknown {
            if !entries.contains(version.database_entry()) {
                return Err(ApkgError::Container(format!(
                    "meta declares {:?} but {} is missing",
                    version,
                    version.database_entry()
                )));
            }
            return Ok(version);
        }
    } else {
        warn!("Package has no meta entry, inferring version from database entry");
    }

    DATABASE_ENTRIES
        .iter()
        .find(|name| entries.contains(name))
        .and_then(|name| PackageVersion::from_database_entry(name))
        .ok_or_else(|| ApkgError::Container("no collection database entry".to_string()))
}

/// Decode a package into its database image and media
pub fn read_package(
    codec: &dyn ContainerCodec,
    bytes: &[u8],
    max_decompressed: usize,
) -> Result<PackageContents> {
    let entries = codec.open(bytes, max_decompressed)?;
    let version = resolve_version(&entries)?;
    let method = if version.is_compressed() {
        CompressionMethod::Zstd
    } else {
        CompressionMethod::None
    };
    debug!("Package version {:?}", version);

    let raw_db = entries
        .get(version.database_entry())
        .ok_or_else(|| ApkgError::Container("no collection database entry".to_string()))?;
    let database = decompress(raw_db, method, max_decompressed)?;

    let raw_manifest = entries
        .get(MEDIA_ENTRY)
        .ok_or_else(|| ApkgError::Container("no media manifest entry".to_string()))?;
    let manifest_bytes = decompress(raw_manifest, method, max_decompressed)?;
    let format = if version.uses_protobuf_manifest() {
        ManifestFormat::Modern
    } else {
        ManifestFormat::Legacy
    };
    let listed = manifest::decode(&manifest_bytes, format)?;

    let mut media = Vec::with_capacity(listed.len());
    for entry in listed {
        let Some(blob) = entries.get(&entry.entry_name()) else {
            warn!(
                "Media {} listed at index {} has no blob, skipping",
                entry.filename, entry.index
            );
            continue;
        };
        let data = decompress(blob, method, max_decompressed)?;
        media.push(PackagedMedia { entry, data });
    }
    debug!("Read {} media files", media.len());

    Ok(PackageContents {
        version,
        database,
        media,
    })
}

/// Bundle a database image and media into a package of the given version
///
/// Media entries are renumbered sequentially in the given order.
pub fn write_package(
    codec: &dyn ContainerCodec,
    version: PackageVersion,
    database: &[u8],
    media: &[(String, Vec<u8>)],
    level: i32,
) -> Result<Vec<u8>> {
    let method = if version.is_compressed() {
        CompressionMethod::Zstd
    } else {
        CompressionMethod::None
    };

    let mut entries = NamedEntries::new();
    entries.insert(META_ENTRY, PackageMetadata::new(version).encode_bytes());
    entries.insert(version.database_entry(), compress(database, method, level)?);

    let mut listed = Vec::with_capacity(media.len());
    for (index, (filename, data)) in media.iter().enumerate() {
        let entry = ManifestEntry::for_blob(index as u32, filename.clone(), data);
        entries.insert(entry.entry_name(), compress(data, method, level)?);
        listed.push(entry);
    }
    let format = if version.uses_protobuf_manifest() {
        ManifestFormat::Modern
    } else {
        ManifestFormat::Legacy
    };
    let manifest_bytes = manifest::encode(&listed, format)?;
    entries.insert(MEDIA_ENTRY, compress(&manifest_bytes, method, level)?);

    codec.write(&entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::DEFAULT_MAX_DECOMPRESSED;

    fn media() -> Vec<(String, Vec<u8>)> {
        vec![
            ("a.png".to_string(), b"png bytes".to_vec()),
            ("b.mp3".to_string(), b"mp3 bytes".to_vec()),
        ]
    }

    #[test]
    fn test_write_and_read_each_version() -> Result<()> {
        for version in [
            PackageVersion::Legacy1,
            PackageVersion::Legacy2,
            PackageVersion::Latest,
        ] {
            let bytes = write_package(&ZipCodec, version, b"SQLite format 3\0", &media(), 0)?;
            let contents = read_package(&ZipCodec, &bytes, DEFAULT_MAX_DECOMPRESSED)?;
            assert_eq!(contents.version, version);
            assert_eq!(contents.database, b"SQLite format 3\0");
            assert_eq!(contents.media.len(), 2);
            assert_eq!(contents.media[1].entry.filename, "b.mp3");
            assert_eq!(contents.media[1].data, b"mp3 bytes");
        }
        Ok(())
    }

    #[test]
    fn test_latest_entries_are_zstd() -> Result<()> {
        let bytes = write_package(&ZipCodec, PackageVersion::Latest, b"db", &media(), 0)?;
        let entries = ZipCodec.open(&bytes, DEFAULT_MAX_DECOMPRESSED)?;
        assert!(crate::compression::is_zstd_frame(entries.get("collection.anki21b").unwrap()));
        assert!(crate::compression::is_zstd_frame(entries.get("media").unwrap()));
        assert!(crate::compression::is_zstd_frame(entries.get("0").unwrap()));
        assert_eq!(entries.len(), 5);
        Ok(())
    }

    #[test]
    fn test_writes_are_deterministic() -> Result<()> {
        let a = write_package(&ZipCodec, PackageVersion::Legacy2, b"db", &media(), 0)?;
        let b = write_package(&ZipCodec, PackageVersion::Legacy2, b"db", &media(), 0)?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn test_not_a_zip() {
        let result = ZipCodec.open(b"definitely not a zip file", DEFAULT_MAX_DECOMPRESSED);
        assert!(matches!(result, Err(ApkgError::Container(_))));
    }

    #[test]
    fn test_missing_mandatory_entries() -> Result<()> {
        let mut entries = NamedEntries::new();
        entries.insert("media", b"{}".to_vec());
        let bytes = ZipCodec.write(&entries)?;
        assert!(matches!(ZipCodec.open(&bytes, DEFAULT_MAX_DECOMPRESSED), Err(ApkgError::Container(_))));

        let mut entries = NamedEntries::new();
        entries.insert("collection.anki2", b"db".to_vec());
        let bytes = ZipCodec.write(&entries)?;
        assert!(matches!(ZipCodec.open(&bytes, DEFAULT_MAX_DECOMPRESSED), Err(ApkgError::Container(_))));

        let mut entries = NamedEntries::new();
        entries.insert("collection.anki21b", b"db".to_vec());
        entries.insert("media", Vec::new());
        let bytes = ZipCodec.write(&entries)?;
        assert!(matches!(ZipCodec.open(&bytes, DEFAULT_MAX_DECOMPRESSED), Err(ApkgError::Container(_))));
        Ok(())
    }

    #[test]
    fn test_legacy_without_meta_is_inferred() -> Result<()> {
        let mut entries = NamedEntries::new();
        entries.insert("collection.anki2", b"db".to_vec());
        entries.insert("media", b"{}".to_vec());
        let bytes = ZipCodec.write(&entries)?;
        let contents = read_package(&ZipCodec, &bytes, DEFAULT_MAX_DECOMPRESSED)?;
        assert_eq!(contents.version, PackageVersion::Legacy1);
        Ok(())
    }

    #[test]
    fn test_meta_prefers_declared_database() -> Result<()> {
        // Newer clients ship a placeholder anki2 next to the real anki21b
        let mut entries = NamedEntries::new();
        entries.insert("meta", PackageMetadata::new(PackageVersion::Latest).encode_bytes());
        entries.insert("collection.anki2", b"placeholder".to_vec());
        entries.insert("collection.anki21b", compress(b"real", CompressionMethod::Zstd, 0)?);
        entries.insert("media", compress(&[], CompressionMethod::Zstd, 0)?);
        let bytes = ZipCodec.write(&entries)?;
        let contents = read_package(&ZipCodec, &bytes, DEFAULT_MAX_DECOMPRESSED)?;
        assert_eq!(contents.database, b"real");
        Ok(())
    }

    #[test]
    fn test_corrupt_database_frame() -> Result<()> {
        let mut entries = NamedEntries::new();
        entries.insert("meta", PackageMetadata::new(PackageVersion::Latest).encode_bytes());
        entries.insert("collection.anki21b", b"not zstd".to_vec());
        entries.insert("media", compress(&[], CompressionMethod::Zstd, 0)?);
        let bytes = ZipCodec.write(&entries)?;
        let result = read_package(&ZipCodec, &bytes, DEFAULT_MAX_DECOMPRESSED);
        assert!(matches!(result, Err(ApkgError::Decompression(_))));
        Ok(())
    }

    #[test]
    fn test_entry_over_limit_is_rejected() -> Result<()> {
        let bytes = write_package(&ZipCodec, PackageVersion::Legacy2, &[0u8; 4096], &media(), 0)?;
        assert!(matches!(
            ZipCodec.open(&bytes, 1024),
            Err(ApkgError::Container(_))
        ));
        assert!(matches!(
            read_package(&ZipCodec, &bytes, 1024),
            Err(ApkgError::Container(_))
        ));
        assert!(read_package(&ZipCodec, &bytes, 4096).is_ok());
        Ok(())
    }

    /// Rewrite every uncompressed-size field of a single-entry zip
    fn forge_uncompressed_size(bytes: &mut [u8], size: u32) {
        let patch = |bytes: &mut [u8], signature: &[u8; 4], offset: usize| {
            let at = bytes
                .windows(4)
                .position(|w| w == signature)
                .expect("zip record");
            bytes[at + offset..at + offset + 4].copy_from_slice(&size.to_le_bytes());
        };
        patch(bytes, b"PK\x03\x04", 22);
        patch(bytes, b"PK\x01\x02", 24);
    }

    fn deflated_zeros(len: usize) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(ZipMethod::Deflated);
        zip.start_file("collection.anki2", options).unwrap();
        zip.write_all(&vec![0u8; len]).unwrap();
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn test_forged_sizes_cannot_force_allocation() {
        // Header claims about 4 GiB for a tiny entry
        let mut bytes = deflated_zeros(16);
        forge_uncompressed_size(&mut bytes, 0xFFFF_FFF0);
        assert!(matches!(
            ZipCodec.open(&bytes, DEFAULT_MAX_DECOMPRESSED),
            Err(ApkgError::Container(_))
        ));
    }

    #[test]
    fn test_understated_size_stops_at_limit() {
        // 1 MiB of zeros inflates past the limit despite a 100 byte claim
        let mut bytes = deflated_zeros(1024 * 1024);
        forge_uncompressed_size(&mut bytes, 100);
        assert!(matches!(
            ZipCodec.open(&bytes, 64 * 1024),
            Err(ApkgError::Container(_))
        ));
    }
}
