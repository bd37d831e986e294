//! Mount configuration.

use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for one served volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Port the WebDAV server listens on (loopback only).
    pub listen_port: u16,
    /// Freshness window for cached path/listing entries, in seconds.
    /// Zero or negative disables caching entirely.
    pub cache_ttl_secs: i64,
    /// Directory holding the durable lock and property tables.
    pub state_dir: PathBuf,
    /// Principal name attached to requests of this mount.
    pub principal: String,
    /// Lock timeout applied when a client does not request one.
    pub default_lock_timeout_secs: u32,
    /// Upper bound on client-requested lock timeouts.
    pub max_lock_timeout_secs: u32,
    /// Refuse every mutating verb before it reaches the backend.
    pub read_only: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            listen_port: 4918,
            cache_ttl_secs: 30,
            state_dir: PathBuf::from("."),
            principal: "cirrus".to_string(),
            default_lock_timeout_secs: 3600,
            max_lock_timeout_secs: 24 * 3600,
            read_only: false,
        }
    }
}

impl MountConfig {
    /// Load a config from a TOML file; missing keys take their defaults.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> BridgeResult<Self> {
        let text = fs::read_to_string(path.as_ref())
            .map_err(|e| BridgeError::Store(format!("read config: {e}")))?;
        toml::from_str(&text).map_err(|e| BridgeError::Store(format!("parse config: {e}")))
    }

    /// TTL as a duration; `None` when caching is disabled.
    pub fn cache_ttl(&self) -> Option<Duration> {
        if self.cache_ttl_secs > 0 {
            Some(Duration::from_secs(self.cache_ttl_secs as u64))
        } else {
            None
        }
    }

    pub fn locks_db_path(&self) -> PathBuf {
        self.state_dir.join("locks.db")
    }

    pub fn props_db_path(&self) -> PathBuf {
        self.state_dir.join("props.db")
    }

    /// Clamp a requested lock timeout into the configured bounds.
    pub fn clamp_lock_timeout(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_lock_timeout_secs)
            .min(self.max_lock_timeout_secs)
    }
}
