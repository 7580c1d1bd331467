//! Validation for deck names, media filenames and package paths
//!
//! Deck names are hierarchical: segments joined by `::`. Names coming from
//! callers are normalized before they reach the collection so that the
//! parent chain can always be recovered from the full name.

use crate::error::{ApkgError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Separator between deck name segments in the domain model
pub const DECK_SEPARATOR: &str = "::";

/// Separator between deck name segments in the modern schema
pub const DB_DECK_SEPARATOR: char = '\x1f';

/// A normalized, hierarchical deck name
///
/// # Rules
/// - Segments are separated by `::`
/// - Each segment is trimmed; empty segments are dropped
/// - At least one segment must remain
/// - No control characters (the database separator `\x1f` in particular)
///
/// # Examples
///
/// ```
/// use apkg_rs::DeckName;
///
/// let name = DeckName::new(" Languages :: Japanese ").unwrap();
/// assert_eq!(name.as_str(), "Languages::Japanese");
/// assert_eq!(name.leaf(), "Japanese");
///
/// assert!(DeckName::new("::").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeckName(String);

impl DeckName {
    /// Create a normalized deck name
    pub fn new(name: impl AsRef<str>) -> std::result::Result<Self, String> {
        let name = name.as_ref();
        if name.chars().any(char::is_control) {
            return Err(format!("deck name {:?} contains control characters", name));
        }
        let segments: Vec<&str> = name
            .split(DECK_SEPARATOR)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if segments.is_empty() {
            return Err(format!("deck name {:?} has no segments", name));
        }
        Ok(DeckName(segments.join(DECK_SEPARATOR)))
    }

    /// Join a parent's full name with a child segment
    pub fn child_of(parent: &str, leaf: &str) -> std::result::Result<Self, String> {
        Self::new(format!("{}{}{}", parent, DECK_SEPARATOR, leaf))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Last segment
    pub fn leaf(&self) -> &str {
        self.0.rsplit(DECK_SEPARATOR).next().unwrap_or(&self.0)
    }

    /// Full name of the parent, if any
    pub fn parent(&self) -> Option<&str> {
        self.0.rfind(DECK_SEPARATOR).map(|idx| &self.0[..idx])
    }

    pub fn depth(&self) -> usize {
        self.0.matches(DECK_SEPARATOR).count()
    }
}

impl AsRef<str> for DeckName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeckName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Convert a domain deck name to its modern on-disk form
pub fn deck_name_to_db(name: &str) -> String {
    name.replace(DECK_SEPARATOR, &DB_DECK_SEPARATOR.to_string())
}

/// Convert a modern on-disk deck name to the domain form
pub fn deck_name_from_db(name: &str) -> String {
    name.replace(DB_DECK_SEPARATOR, DECK_SEPARATOR)
}

fn media_filename_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"^[^/\\:*?"<>|\x00-\x1f]+$"#).unwrap())
}

/// Validate a media filename
///
/// Media names are flat: no directories, no characters the consuming
/// application would reject on any platform.
pub fn validate_media_filename(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(format!("invalid media filename {:?}", name));
    }
    if !media_filename_pattern().is_match(name) {
        return Err(format!(
            "media filename {:?} contains path separators or reserved characters",
            name
        ));
    }
    Ok(())
}

/// Normalize a package path
///
/// Appends the `.apkg` extension when no extension is given. Any other
/// extension is kept, since packages are routinely renamed.
pub fn normalize_package_path(path: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ApkgError::Config(format!("{:?} is not a file path", path)))?;
    if file_name.is_empty() {
        return Err(ApkgError::Config(format!("{:?} is not a file path", path)));
    }
    let mut normalized = path.to_path_buf();
    if path.extension().is_none() {
        normalized.set_extension("apkg");
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_deck_names() {
        assert_eq!(DeckName::new("Default").unwrap().as_str(), "Default");
        assert_eq!(DeckName::new("A::B::C").unwrap().as_str(), "A::B::C");
        assert_eq!(DeckName::new("A:: ::B").unwrap().as_str(), "A::B");
        assert_eq!(DeckName::new("日本語::漢字").unwrap().leaf(), "漢字");
    }

    #[test]
    fn test_invalid_deck_names() {
        assert!(DeckName::new("").is_err());
        assert!(DeckName::new("   ").is_err());
        assert!(DeckName::new("::::").is_err());
        assert!(DeckName::new("A\x1fB").is_err());
        assert!(DeckName::new("line\nbreak").is_err());
    }

    #[test]
    fn test_deck_name_parts() {
        let name = DeckName::new("Parent::Child::Leaf").unwrap();
        assert_eq!(name.leaf(), "Leaf");
        assert_eq!(name.parent(), Some("Parent::Child"));
        assert_eq!(name.depth(), 2);
        assert_eq!(DeckName::new("Top").unwrap().parent(), None);
        assert_eq!(DeckName::child_of("Parent", "Kid").unwrap().as_str(), "Parent::Kid");
    }

    #[test]
    fn test_db_separator_conversion() {
        assert_eq!(deck_name_to_db("A::B"), "A\x1fB");
        assert_eq!(deck_name_from_db("A\x1fB\x1fC"), "A::B::C");
    }

    #[test]
    fn test_media_filenames() {
        assert!(validate_media_filename("a.png").is_ok());
        assert!(validate_media_filename("paste-1234 (1).jpg").is_ok());
        assert!(validate_media_filename("").is_err());
        assert!(validate_media_filename("..").is_err());
        assert!(validate_media_filename("dir/a.png").is_err());
        assert!(validate_media_filename("c:\\a.png").is_err());
    }

    #[test]
    fn test_normalize_package_path() {
        let path = normalize_package_path(Path::new("deck")).unwrap();
        assert_eq!(path, Path::new("deck.apkg"));

        let path = normalize_package_path(Path::new("/data/deck.apkg")).unwrap();
        assert_eq!(path, Path::new("/data/deck.apkg"));

        let path = normalize_package_path(Path::new("shared.colpkg")).unwrap();
        assert_eq!(path, Path::new("shared.colpkg"));
    }
}
