// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Configuration for the caching core.
//!
//! A single `Config` is shared by every layer (blob store, KV cache,
//! project/call-graph caches, solution coordinator). Defaults match the
//! recognized options documented for the cache: a 100 MiB budget, 30 day
//! entry TTL, default-level compression, and native file watching falling
//! back to polling.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 100 MiB, the default cache size budget.
pub const DEFAULT_MAX_CACHE_BYTES: u64 = 100 * 1024 * 1024;

/// 30 days, the default maximum entry age before `maintenance()` reaps it.
pub const DEFAULT_MAX_ENTRY_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// 5 minutes, the default interval between background maintenance passes.
pub const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// 5 seconds, the default poll interval when native file watching is
/// unavailable or disabled.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Payloads smaller than this are stored uncompressed (`deflate` framing
/// overhead would cost more than it saves).
pub const MIN_COMPRESS_BYTES: usize = 256;

/// Compression policy for the blob store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompressionMode {
    /// Never compress; every payload is stored as-is.
    Off,
    /// `deflate` at a fixed moderate level. The default.
    Default,
    /// `deflate` at the highest level, trading CPU for size.
    Max,
}

impl Default for CompressionMode {
    fn default() -> Self {
        Self::Default
    }
}

/// The algorithm tag recorded per blob, independent of the policy
/// (`CompressionMode`) that chose it. Stored in metadata and never
/// inferred, so a store configured one way can still read blobs written
/// under a previous policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    None,
    Deflate,
    Gzip,
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Deflate => "deflate",
            CompressionAlgorithm::Gzip => "gzip",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for CompressionAlgorithm {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(CompressionAlgorithm::None),
            "deflate" => Ok(CompressionAlgorithm::Deflate),
            "gzip" => Ok(CompressionAlgorithm::Gzip),
            other => Err(crate::Error::Corrupt(format!("unknown compression algorithm: {other}"))),
        }
    }
}

/// File-watching backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileWatchMode {
    /// Use the OS-native watcher, falling back to polling if unavailable.
    Native,
    /// Always poll on `poll_interval`.
    Poll,
    /// Never watch; changes are only seen via explicit `detect_changes()`.
    Off,
}

impl Default for FileWatchMode {
    fn default() -> Self {
        Self::Native
    }
}

/// Top-level configuration recognized by every cache layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory for all persisted cache state. Required.
    pub cache_root: PathBuf,

    /// Size budget enforced by eviction, in bytes.
    #[serde(default = "default_max_cache_bytes")]
    pub max_cache_bytes: u64,

    /// Entries older than this are reaped in `maintenance()`.
    #[serde(default = "default_max_entry_age", with = "humantime_serde_secs")]
    pub max_entry_age: Duration,

    /// Blob store compression policy.
    #[serde(default)]
    pub compression: CompressionMode,

    /// Whether a low-priority background worker runs `maintenance()`
    /// periodically.
    #[serde(default)]
    pub enable_background_maintenance: bool,

    /// Interval between background maintenance passes, when enabled.
    #[serde(default = "default_maintenance_interval", with = "humantime_serde_secs")]
    pub maintenance_interval: Duration,

    /// File watching backend.
    #[serde(default)]
    pub file_watch: FileWatchMode,

    /// Poll interval used by the polling watcher backend.
    #[serde(default = "default_poll_interval", with = "humantime_serde_secs")]
    pub poll_interval: Duration,
}

fn default_max_cache_bytes() -> u64 {
    DEFAULT_MAX_CACHE_BYTES
}

fn default_max_entry_age() -> Duration {
    DEFAULT_MAX_ENTRY_AGE
}

fn default_maintenance_interval() -> Duration {
    DEFAULT_MAINTENANCE_INTERVAL
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

impl Config {
    /// A config rooted at `cache_root` with every other option defaulted.
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            ..Self::default_with_root(PathBuf::new())
        }
    }

    fn default_with_root(cache_root: PathBuf) -> Self {
        Self {
            cache_root,
            max_cache_bytes: DEFAULT_MAX_CACHE_BYTES,
            max_entry_age: DEFAULT_MAX_ENTRY_AGE,
            compression: CompressionMode::default(),
            enable_background_maintenance: false,
            maintenance_interval: DEFAULT_MAINTENANCE_INTERVAL,
            file_watch: FileWatchMode::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Load configuration from a TOML file on disk.
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self, crate::Error> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| crate::Error::Corrupt(e.to_string()))
    }

    /// Blob shard directory (two hex chars of the fingerprint) nested under
    /// `cache_root/blobs`.
    pub fn blobs_dir(&self) -> PathBuf {
        self.cache_root.join("blobs")
    }

    /// Directory holding the coordinator's dependency index and per-solution
    /// namespace files.
    pub fn index_dir(&self) -> PathBuf {
        self.cache_root.join("index")
    }
}

/// `humantime`-free duration (de)serialization as whole seconds, avoiding an
/// extra dependency for a single field shape.
mod humantime_serde_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
