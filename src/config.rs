//! Configuration file parser for the sync pipeline.
//!
//! The config file is optional: a missing file yields `SyncConfig::default()`.
//! Unknown keys are ignored by serde, though we log a warning so typos do not
//! go unnoticed.
use crate::identity::Algorithm;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level pipeline configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Algorithm for newly created subscription ids.
    pub identity_algorithm: Algorithm,

    /// Forget the payload fingerprint when detection or parsing fails, so the
    /// same bytes are processed again on the next sync.
    pub reprocess_on_parse_failure: bool,

    /// Upper bound on in-flight syncs in `SyncEngine::sync_many`.
    pub max_concurrent_syncs: usize,

    pub fetch: FetchConfig,

    pub storage: StorageConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            identity_algorithm: Algorithm::Sha224,
            reprocess_on_parse_failure: false,
            max_concurrent_syncs: 10,
            fetch: FetchConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// HTTP fetch settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Whole-request deadline in seconds.
    pub timeout_secs: u64,
    /// Bodies larger than this are rejected.
    pub max_feed_bytes: usize,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_feed_bytes: 10 * 1024 * 1024, // 10MB
            user_agent: concat!("tributary/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend name resolved through `StorageRegistry`.
    pub backend: String,
    /// Database path for the `sqlite` backend, or `:memory:`.
    pub sqlite_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            sqlite_path: ":memory:".to_string(),
        }
    }
}

const KNOWN_KEYS: &[&str] = &[
    "identity_algorithm",
    "reprocess_on_parse_failure",
    "max_concurrent_syncs",
    "fetch",
    "storage",
];
const KNOWN_FETCH_KEYS: &[&str] = &["timeout_secs", "max_feed_bytes", "user_agent"];
const KNOWN_STORAGE_KEYS: &[&str] = &["backend", "sqlite_path"];

impl SyncConfig {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(SyncConfig::default())`
    /// - Empty file → `Ok(SyncConfig::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::from_toml_str(&content)?;
        tracing::info!(
            path = %path.display(),
            backend = %config.storage.backend,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse configuration from TOML text. Blank input yields defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw, KNOWN_KEYS, None);
            for (section, known) in [("fetch", KNOWN_FETCH_KEYS), ("storage", KNOWN_STORAGE_KEYS)] {
                if let Some(toml::Value::Table(table)) = raw.get(section) {
                    warn_unknown_keys(table, known, Some(section));
                }
            }
        }

        Ok(toml::from_str(content)?)
    }
}

fn warn_unknown_keys(table: &toml::Table, known: &[&str], section: Option<&str>) {
    for key in table.keys() {
        if !known.contains(&key.as_str()) {
            tracing::warn!(
                key = %key,
                section = section.unwrap_or("<root>"),
                "Unknown key in config file, ignoring"
            );
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
