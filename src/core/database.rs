//! Embedded collection database
//!
//! Packages carry the collection as a raw SQLite image. SQLite needs a file
//! to open, so the image is staged in a scratch file that lives exactly as
//! long as the [`DatabaseImage`].

use crate::error::{ApkgError, Result};
use rusqlite::{Connection, OpenFlags};
use std::io::Write;
use tempfile::NamedTempFile;
use tracing::debug;

/// SQLite file header
pub const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Modern collections declare names `COLLATE unicase`
fn register_collations(conn: &Connection) -> Result<()> {
    conn.create_collation("unicase", |a, b| a.to_lowercase().cmp(&b.to_lowercase()))?;
    Ok(())
}

/// A SQLite database staged from (or for) a package
pub struct DatabaseImage {
    conn: Connection,
    file: NamedTempFile,
}

impl DatabaseImage {
    /// Open an existing image read-only
    pub fn open(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SQLITE_MAGIC.len() || &bytes[..SQLITE_MAGIC.len()] != SQLITE_MAGIC {
            return Err(ApkgError::Schema(
                "collection entry is not a SQLite database".to_string(),
            ));
        }
        let mut file = NamedTempFile::new()?;
        if bytes.len() >= 20 && bytes[18] == 2 && bytes[19] == 2 {
            // WAL images cannot be opened read-only without their sidecar
            // files; mark the staged copy as rollback-journal
            file.write_all(&bytes[..18])?;
            file.write_all(&[1, 1])?;
            file.write_all(&bytes[20..])?;
        } else {
            file.write_all(bytes)?;
        }
        file.flush()?;

        let conn = Connection::open_with_flags(
            file.path(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        register_collations(&conn)?;
        debug!("Staged {} byte collection at {:?}", bytes.len(), file.path());
        Ok(DatabaseImage { conn, file })
    }

    /// Create an empty image for writing
    pub fn create() -> Result<Self> {
        let file = NamedTempFile::new()?;
        let conn = Connection::open(file.path())?;
        register_collations(&conn)?;
        // Default rollback journal: no WAL sidecar, the main file is complete on close
        conn.pragma_update(None, "page_size", 4096)?;
        Ok(DatabaseImage { conn, file })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Whether a table exists in the image
    pub fn has_table(&self, name: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Close the connection and return the finished image
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        let DatabaseImage { conn, file } = self;
        conn.close().map_err(|(_, e)| ApkgError::from(e))?;
        Ok(std::fs::read(file.path())?)
    }
}
