use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::encryption::VALID_KEY_SIZES;
use crate::crypto::SecretKey;
use crate::errors::{KeeperError, Result};

/// Server configuration, loaded from a TOML file.
///
/// Every field except the two keys has a default, so a config file only
/// needs `database_key` and `jwt_key` (which may also come from the
/// environment or the command line).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Socket address to listen on.
    #[serde(default = "default_address")]
    pub address: String,

    /// Log filter used when `RUST_LOG` is unset (e.g. "info", "debug").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Root directory of the filesystem blob store.
    #[serde(default = "default_blob_dir")]
    pub blob_dir: PathBuf,

    /// Bucket that uploaded files are stored in.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Envelope key for stored secrets: 16, 24 or 32 bytes.
    #[serde(default)]
    pub database_key: String,

    /// Token signing key.
    #[serde(default)]
    pub jwt_key: String,

    /// Request integrity key.  Empty disables integrity checks.
    #[serde(default)]
    pub hash_key: String,

    /// Encrypt credential, note and card fields at rest.
    #[serde(default = "default_encrypt_fields")]
    pub encrypt_fields: bool,

    /// Lifetime of issued tokens, in seconds.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,

    /// Chunks buffered between an upload stream and the blob store.
    #[serde(default = "default_conduit_depth")]
    pub conduit_depth: usize,

    /// Bytes per download chunk.
    #[serde(default = "default_download_chunk_size")]
    pub download_chunk_size: usize,

    /// Reserved for storage retries; not used yet.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
}

/// Values supplied on the command line or through the environment.
/// `Some` wins over whatever the file said.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub address: Option<String>,
    pub log_level: Option<String>,
    pub database_path: Option<PathBuf>,
    pub blob_dir: Option<PathBuf>,
    pub database_key: Option<String>,
    pub jwt_key: Option<String>,
    pub hash_key: Option<String>,
}

// ── Serde default helpers ────────────────────────────────────────────

fn default_address() -> String {
    "127.0.0.1:3200".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("secretkeeper.db")
}

fn default_blob_dir() -> PathBuf {
    PathBuf::from("blobs")
}

fn default_bucket() -> String {
    crate::service::DEFAULT_BUCKET.to_string()
}

fn default_encrypt_fields() -> bool {
    true
}

fn default_token_ttl_secs() -> u64 {
    3600
}

fn default_conduit_depth() -> usize {
    crate::service::DEFAULT_CONDUIT_DEPTH
}

fn default_download_chunk_size() -> usize {
    crate::service::DEFAULT_CHUNK_SIZE
}

fn default_retry_count() -> u32 {
    3
}

// ── Implementation ───────────────────────────────────────────────────

impl Default for Settings {
    fn default() -> Self {
        Self {
            address: default_address(),
            log_level: default_log_level(),
            database_path: default_database_path(),
            blob_dir: default_blob_dir(),
            bucket: default_bucket(),
            database_key: String::new(),
            jwt_key: String::new(),
            hash_key: String::new(),
            encrypt_fields: default_encrypt_fields(),
            token_ttl_secs: default_token_ttl_secs(),
            conduit_depth: default_conduit_depth(),
            download_chunk_size: default_download_chunk_size(),
            retry_count: default_retry_count(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file, or defaults when `path` is `None`.
    ///
    /// A path that was given but cannot be read or parsed is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let contents = std::fs::read_to_string(path).map_err(|e| {
            KeeperError::ConfigError(format!("Failed to read {}: {e}", path.display()))
        })?;

        let settings: Settings = toml::from_str(&contents).map_err(|e| {
            KeeperError::ConfigError(format!("Failed to parse {}: {e}", path.display()))
        })?;

        Ok(settings)
    }

    pub fn with_overrides(mut self, o: Overrides) -> Self {
        if let Some(v) = o.address {
            self.address = v;
        }
        if let Some(v) = o.log_level {
            self.log_level = v;
        }
        if let Some(v) = o.database_path {
            self.database_path = v;
        }
        if let Some(v) = o.blob_dir {
            self.blob_dir = v;
        }
        if let Some(v) = o.database_key {
            self.database_key = v;
        }
        if let Some(v) = o.jwt_key {
            self.jwt_key = v;
        }
        if let Some(v) = o.hash_key {
            self.hash_key = v;
        }
        self
    }

    /// Check that the settings can start a server.
    pub fn validate(&self) -> Result<()> {
        let len = self.database_key.len();
        if !VALID_KEY_SIZES.contains(&len) {
            return Err(KeeperError::ConfigError(format!(
                "database_key must be 16, 24 or 32 bytes, got {len}"
            )));
        }
        if self.jwt_key.is_empty() {
            return Err(KeeperError::ConfigError("jwt_key is required".into()));
        }
        if self.token_ttl_secs == 0 {
            return Err(KeeperError::ConfigError(
                "token_ttl_secs must be greater than zero".into(),
            ));
        }
        if self.bucket.trim().is_empty() {
            return Err(KeeperError::ConfigError("bucket must not be empty".into()));
        }
        Ok(())
    }

    pub fn database_key(&self) -> Result<SecretKey> {
        SecretKey::aead(self.database_key.as_bytes().to_vec())
    }

    pub fn jwt_key(&self) -> SecretKey {
        SecretKey::new(self.jwt_key.as_bytes().to_vec())
    }

    /// The integrity key, if integrity checks are enabled.
    pub fn hash_key(&self) -> Option<SecretKey> {
        if self.hash_key.is_empty() {
            None
        } else {
            Some(SecretKey::new(self.hash_key.as_bytes().to_vec()))
        }
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

// ── Tests ────────────────────────────────────────────────────────────
