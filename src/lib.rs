//! # apkg-rs - Flashcard Package Engine
//!
//! `apkg-rs` reads Anki `.apkg` packages into an editable in-memory
//! collection and writes them back out so that Anki re-imports them without
//! data loss.
//!
//! - **Both schema generations**: legacy (JSON in the `col` row) and modern
//!   (dedicated tables with protobuf configs), read and written
//! - **All package versions**: `collection.anki2`, `collection.anki21` and
//!   zstd-compressed `collection.anki21b`, with JSON or protobuf manifests
//! - **Lossless passthrough** of everything the model does not interpret
//! - **Rendering** of card templates, cloze deletions and inline media
//! - **Session tracking**: field edits, origin-based deletion, undo/redo
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use apkg_rs::{parse_archive, export_collection, Result};
//!
//! # fn main() -> Result<()> {
//! let bytes = std::fs::read("deck.apkg")?;
//! let col = parse_archive(&bytes)?;
//! for deck in col.decks().values() {
//!     println!("{} ({} cards)", deck.name, col.card_count(deck.id, true));
//! }
//!
//! // Re-emit the package unchanged
//! let out = export_collection(&col, None)?;
//! std::fs::write("deck-copy.apkg", out)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Editing
//!
//! ```rust,no_run
//! use apkg_rs::{ExportOptions, NewCard, Package, PackageVersion, Result};
//!
//! # fn main() -> Result<()> {
//! let mut package = Package::open("deck.apkg")?;
//! let card_id = *package.collection().cards().keys().next().unwrap();
//! let note_id = package.collection().card(card_id).unwrap().note_id;
//!
//! package.session_mut().edit_fields(note_id, vec!["Front".into(), "Back".into()])?;
//! package.session_mut().delete_card(card_id)?;
//! package.session_mut().undo()?;
//!
//! package.save("edited", ExportOptions::default().version(PackageVersion::Latest))?;
//! # Ok(())
//! # }
//! ```

// Core implementation
pub mod core;

// Re-export core modules internally so crate:: paths in core still work
#[allow(unused_imports)]
pub(crate) use core::{
    compression, config, container, database, error, export, ids, manifest, meta, model, render,
    schema, tracker, validation,
};

// Re-export core types that users need
pub use crate::core::{
    config::EngineConfig,
    error::{ApkgError, MutationError, Result},
    export::{ExportOptions, Subtree},
    manifest::{ManifestEntry, ManifestFormat},
    meta::PackageVersion,
    model::{
        Card, CardId, CardKind, CardOrigin, CardPolicy, CardQueue, CardType, Collection, Deck,
        DeckDeletion, DeckId, DeckOptions, DeckTreeNode, FieldDef, Grave, GraveKind, MediaFile,
        Model, ModelKind, Note, NoteId, ReviewLogEntry, Scheduling, SubdeckPolicy, TemplateDef,
        DEFAULT_DECK_ID,
    },
    render::RenderedCard,
    schema::SchemaGeneration,
    tracker::{NewCard, Session},
    validation::DeckName,
};

use crate::container::{read_package, ZipCodec};
use crate::database::DatabaseImage;
use crate::ids::IdSource;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Parse package bytes into a collection with the default settings
///
/// Any malformed input fails the whole parse; no partial collection is
/// returned.
pub fn parse_archive(bytes: &[u8]) -> Result<Collection> {
    parse_archive_with(bytes, &EngineConfig::default())
}

/// Parse package bytes into a collection
pub fn parse_archive_with(bytes: &[u8], config: &EngineConfig) -> Result<Collection> {
    info!("Parsing {} byte package", bytes.len());
    let contents = read_package(&ZipCodec, bytes, config.max_decompressed_size)?;
    let db = DatabaseImage::open(&contents.database)?;
    let ids = match config.id_seed {
        Some(seed) => IdSource::seeded(seed),
        None => IdSource::Global,
    };
    let mut col = schema::parse_rows(&db, ids)?;
    col.source_version = Some(contents.version);

    for media in contents.media {
        let mut file = MediaFile::new(media.entry.filename, media.data);
        file.size = media.entry.size;
        file.sha1 = media.entry.sha1;
        let name = file.filename.clone();
        if let Err(e) = col.add_media(file) {
            warn!("Skipping media {:?}: {}", name, e);
            col.skipped_media.push(name);
        }
    }

    info!(
        "Parsed {:?} package: {} decks, {} notes, {} cards, {} media files",
        contents.version,
        col.decks().len(),
        col.notes().len(),
        col.cards().len(),
        col.media().count()
    );
    Ok(col)
}

/// Export a collection, leaving out the given cards
///
/// The package keeps the version the collection was read from; new
/// collections are written as `collection.anki21`.
pub fn export_collection(col: &Collection, excluded: Option<&BTreeSet<CardId>>) -> Result<Vec<u8>> {
    let mut options = ExportOptions::default();
    if let Some(excluded) = excluded {
        options.excluded_card_ids = excluded.clone();
    }
    export_with(col, &options, &EngineConfig::default())
}

/// Export a collection with explicit options
pub fn export_with(col: &Collection, options: &ExportOptions, config: &EngineConfig) -> Result<Vec<u8>> {
    let mut options = options.clone();
    if options.zstd_level == 0 {
        options.zstd_level = config.zstd_level;
    }
    export::export(col, &options, config.default_version)
}

/// Parse on the blocking pool
#[cfg(feature = "async")]
pub async fn parse_archive_async(bytes: Vec<u8>) -> Result<Collection> {
    tokio::task::spawn_blocking(move || parse_archive(&bytes))
        .await
        .map_err(|e| ApkgError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

/// Export on the blocking pool; the collection is handed back untouched
#[cfg(feature = "async")]
pub async fn export_collection_async(
    col: Collection,
    options: ExportOptions,
) -> Result<(Collection, Vec<u8>)> {
    tokio::task::spawn_blocking(move || {
        let bytes = export_with(&col, &options, &EngineConfig::default())?;
        Ok((col, bytes))
    })
    .await
    .map_err(|e| ApkgError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

/// High-level package API
///
/// Holds the engine settings and a [`Session`] over the active collection.
/// Loading another package replaces the collection and all session state.
///
/// # Examples
///
/// ```rust,no_run
/// use apkg_rs::{Package, Result};
///
/// # fn main() -> Result<()> {
/// let package = Package::open("deck.apkg")?;
/// let card = package.collection().cards().values().next().unwrap();
/// let rendered = package.render(card.id).unwrap();
/// println!("{}", rendered.question);
/// # Ok(())
/// # }
/// ```
pub struct Package {
    config: EngineConfig,
    session: Session,
}

impl Package {
    /// An empty collection with the default settings
    pub fn new() -> Self {
        Package {
            config: EngineConfig::default(),
            session: Session::new(Collection::new()),
        }
    }

    /// Read a package file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        PackageBuilder::new().open(path)
    }

    /// Parse package bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        PackageBuilder::new().parse(bytes)
    }

    /// Replace the active collection with another package
    ///
    /// On failure the current collection and session stay as they were.
    pub fn load(&mut self, bytes: &[u8]) -> Result<()> {
        let col = parse_archive_with(bytes, &self.config)?;
        self.session.load(col);
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn collection(&self) -> &Collection {
        self.session.collection()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Render a card with the current field values
    pub fn render(&self, card_id: CardId) -> Option<RenderedCard> {
        let col = self.collection();
        col.card(card_id).map(|card| render::render_card(col, card))
    }

    /// Export; soft-deleted cards of the session are always left out
    pub fn export(&self, options: ExportOptions) -> Result<Vec<u8>> {
        let options = options.exclude(self.session.excluded_card_ids());
        export_with(self.collection(), &options, &self.config)
    }

    /// Export to a file
    ///
    /// A path without an extension gets `.apkg`.
    pub fn save<P: AsRef<Path>>(&self, path: P, options: ExportOptions) -> Result<PathBuf> {
        let path = validation::normalize_package_path(path.as_ref())?;
        let bytes = self.export(options)?;
        std::fs::write(&path, &bytes)?;
        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(path)
    }
}

impl Default for Package {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a [`Package`] with custom settings
///
/// # Examples
///
/// ```rust,no_run
/// use apkg_rs::{PackageBuilder, PackageVersion};
///
/// # fn main() -> apkg_rs::Result<()> {
/// let package = PackageBuilder::new()
///     .default_version(PackageVersion::Latest)
///     .zstd_level(9)
///     .open("deck.apkg")?;
/// # Ok(())
/// # }
/// ```
pub struct PackageBuilder {
    config: EngineConfig,
}

impl PackageBuilder {
    pub fn new() -> Self {
        PackageBuilder {
            config: EngineConfig::default(),
        }
    }

    /// Start from a loaded configuration
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn zstd_level(mut self, level: i32) -> Self {
        self.config.zstd_level = level;
        self
    }

    pub fn max_decompressed_size(mut self, bytes: usize) -> Self {
        self.config.max_decompressed_size = bytes;
        self
    }

    pub fn default_version(mut self, version: PackageVersion) -> Self {
        self.config.default_version = version;
        self
    }

    pub fn default_deck_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.default_deck_name = name.into();
        self
    }

    /// Reproducible ids, for tests
    pub fn id_seed(mut self, seed: i64) -> Self {
        self.config.id_seed = Some(seed);
        self
    }

    /// A package holding an empty collection
    pub fn build(self) -> Result<Package> {
        self.config.validate()?;
        let ids = match self.config.id_seed {
            Some(seed) => IdSource::seeded(seed),
            None => IdSource::Global,
        };
        let mut col = Collection::with_id_source(ids);
        if let Some(default) = col.deck(DEFAULT_DECK_ID) {
            if default.name != self.config.default_deck_name {
                col.rename_deck(DEFAULT_DECK_ID, &self.config.default_deck_name)?;
            }
        }
        info!("Built empty package (default version {:?})", self.config.default_version);
        Ok(Package {
            config: self.config,
            session: Session::new(col),
        })
    }

    /// Parse package bytes
    pub fn parse(self, bytes: &[u8]) -> Result<Package> {
        self.config.validate()?;
        let col = parse_archive_with(bytes, &self.config)?;
        Ok(Package {
            config: self.config,
            session: Session::new(col),
        })
    }

    /// Read a package file
    pub fn open<P: AsRef<Path>>(self, path: P) -> Result<Package> {
        let bytes = std::fs::read(path.as_ref())?;
        debug!("Read {} bytes from {}", bytes.len(), path.as_ref().display());
        self.parse(&bytes)
    }
}

impl Default for PackageBuilder {
    fn default() -> Self {
        Self::new()
    }
}
