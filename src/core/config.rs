//! Engine configuration
//!
//! Loaded from TOML; every key is optional.
//!
//! ```toml
//! zstd_level = 3
//! max_decompressed_size = 268435456
//! default_version = "latest"
//! default_deck_name = "Default"
//! ```

use crate::compression::DEFAULT_MAX_DECOMPRESSED;
use crate::error::{ApkgError, Result};
use crate::meta::PackageVersion;
use crate::model::collection::DEFAULT_DECK_NAME;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Zstd level for the modern database, manifest and media (0 = zstd default)
    pub zstd_level: i32,
    /// Upper bound on any decompressed entry
    pub max_decompressed_size: usize,
    /// Version used when an export names none and the collection has no
    /// source version
    pub default_version: PackageVersion,
    pub default_deck_name: String,
    /// Deterministic id seed, for reproducible tests
    pub id_seed: Option<i64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            zstd_level: 0,
            max_decompressed_size: DEFAULT_MAX_DECOMPRESSED,
            default_version: PackageVersion::Legacy2,
            default_deck_name: DEFAULT_DECK_NAME.to_string(),
            id_seed: None,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading engine config from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| ApkgError::Config(e.to_string()))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !(-7..=22).contains(&self.zstd_level) {
            return Err(ApkgError::Config(format!(
                "zstd_level {} is outside -7..=22",
                self.zstd_level
            )));
        }
        if self.max_decompressed_size == 0 {
            return Err(ApkgError::Config("max_decompressed_size must be positive".into()));
        }
        if self.default_version == PackageVersion::Unknown {
            return Err(ApkgError::Config("default_version cannot be unknown".into()));
        }
        if self.default_deck_name.trim().is_empty() {
            return Err(ApkgError::Config("default_deck_name is empty".into()));
        }
        Ok(())
    }
}
