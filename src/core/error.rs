use thiserror::Error;

/// Errors raised while loading or exporting a package
///
/// Parse and export are atomic: any of these aborts the whole operation and
/// no partial collection or byte stream is produced.
#[derive(Error, Debug)]
pub enum ApkgError {
    #[error("Malformed container: {0}")]
    Container(String),

    #[error("Decompression failed: {0}")]
    Decompression(String),

    #[error("Unrecognized collection schema: {0}")]
    Schema(String),

    #[error("{kind} {id} referenced by {referenced_by} does not exist")]
    Referential {
        kind: &'static str,
        id: i64,
        referenced_by: String,
    },

    #[error("Protobuf encoding error: {0}")]
    Encoding(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Mutation(#[from] MutationError),
}

impl From<rusqlite::Error> for ApkgError {
    fn from(err: rusqlite::Error) -> Self {
        // A missing table or column means the database is not the layout we
        // expected, not a transport failure.
        match &err {
            rusqlite::Error::SqliteFailure(_, Some(msg))
                if msg.starts_with("no such table") || msg.starts_with("no such column") =>
            {
                ApkgError::Schema(msg.clone())
            }
            rusqlite::Error::InvalidColumnName(name) => {
                ApkgError::Schema(format!("missing column {}", name))
            }
            _ => ApkgError::Sqlite(err),
        }
    }
}

impl From<prost::DecodeError> for ApkgError {
    fn from(err: prost::DecodeError) -> Self {
        ApkgError::Encoding(err.to_string())
    }
}

impl From<prost::EncodeError> for ApkgError {
    fn from(err: prost::EncodeError) -> Self {
        ApkgError::Encoding(err.to_string())
    }
}

impl From<toml::de::Error> for ApkgError {
    fn from(err: toml::de::Error) -> Self {
        ApkgError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ApkgError>;

/// Rejections from the mutation layer
///
/// These are expected caller errors. The collection is left untouched when
/// one is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    #[error("Deck not found: {0}")]
    DeckNotFound(i64),

    #[error("Card not found: {0}")]
    CardNotFound(i64),

    #[error("Note not found: {0}")]
    NoteNotFound(i64),

    #[error("Note type not found: {0}")]
    ModelNotFound(i64),

    #[error("The default deck cannot be moved or deleted")]
    DefaultDeckProtected,

    #[error("Invalid deck name: {0}")]
    InvalidDeckName(String),

    #[error("Invalid note type: {0}")]
    InvalidModel(String),

    #[error("Invalid media filename: {0}")]
    InvalidMediaName(String),

    #[error("A deck named {0} already exists")]
    DuplicateDeckName(String),

    #[error("Cannot move deck {deck} under its own descendant {target}")]
    CyclicMove { deck: i64, target: i64 },

    #[error("Expected {expected} field values, got {actual}")]
    FieldCountMismatch { expected: usize, actual: usize },

    #[error("Template ordinal {ordinal} does not exist on note type {model}")]
    InvalidOrdinal { model: i64, ordinal: u32 },

    #[error("Card {0} cannot be hard-deleted")]
    HardDeleteForbidden(i64),

    #[error("Card {0} cannot be restored")]
    RestoreForbidden(i64),

    #[error("Card {0} is already deleted")]
    AlreadyDeleted(i64),

    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("Nothing to redo")]
    NothingToRedo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_table_maps_to_schema() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err: ApkgError = conn
            .query_row("SELECT id FROM notetypes", [], |row| row.get::<_, i64>(0))
            .unwrap_err()
            .into();
        assert!(matches!(err, ApkgError::Schema(_)));
    }

    #[test]
    fn test_referential_message() {
        let err = ApkgError::Referential {
            kind: "note type",
            id: 42,
            referenced_by: "note 7".to_string(),
        };
        assert_eq!(err.to_string(), "note type 42 referenced by note 7 does not exist");
    }
}
