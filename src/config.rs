//! Runtime configuration
//!
//! Configuration for the delivery core: server endpoints, local storage
//! paths, and the tuning knobs for token caching, the identifier pool and
//! handshake de-duplication. Stored as JSON and loaded at startup; all
//! fields have working defaults so a missing or empty file is not an error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Organisation tag expected in every connection bundle
pub const ORG_TAG: &str = "linkline.chat";

/// Bundle schema version this build issues
pub const BUNDLE_VERSION: &str = "1.0.0";

/// Bundle type for direct (1:1) connections
pub const BUNDLE_TYPE_DIRECT: &str = "direct";

/// Domain that serves `/connect` deep links
pub const LINK_DOMAIN: &str = "linkline.chat";

/// URL scheme used by file/media share intents; never handled as a
/// connection link
pub const SHARE_INTENT_SCHEME: &str = "linkline";

/// Maximum serialized size of a message's data field, in bytes
pub const MESSAGE_DATA_MAX_LENGTH: usize = 16 * 1024;

/// Delivery core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the relay server API
    pub api_base_url: String,
    /// Directory holding the SQLite stores
    pub data_dir: String,
    /// Directory holding decrypted chat media, one subdirectory per chat
    pub media_dir: String,
    /// Scratch directory for ciphertext temp files during media transfer
    pub scratch_dir: String,
    /// How long an auth token stays valid, in seconds
    pub token_validity_secs: i64,
    /// Replenish the identifier pool when it falls to this many entries
    pub link_pool_floor: usize,
    /// How many identifiers to request per replenishment
    pub link_pool_batch: usize,
    /// Width of the duplicate-bundle suppression window, in milliseconds
    pub dedup_window_ms: u64,
    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: format!("https://api.{}", LINK_DOMAIN),
            data_dir: "./app_data".to_string(),
            media_dir: "./app_data/media".to_string(),
            scratch_dir: "./app_data/scratch".to_string(),
            token_validity_secs: 15 * 60,
            link_pool_floor: 2,
            link_pool_batch: 10,
            dedup_window_ms: 5_000,
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    ///
    /// Returns defaults if the file doesn't exist or is empty.
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::Storage(format!("Failed to read config: {}", e)))?;

        if data.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_json::from_str(&data)
            .map_err(|e| Error::Storage(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to a JSON file
    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("Failed to create config directory: {}", e)))?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Storage(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, json)
            .map_err(|e| Error::Storage(format!("Failed to write config: {}", e)))?;

        Ok(())
    }
}
