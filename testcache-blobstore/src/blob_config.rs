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

use std::path::PathBuf;
use std::time::Duration;
use testcache_core::config::CompressionMode;
use testcache_core::Config;

/// The slice of [`testcache_core::Config`] the blob store actually needs,
/// narrowed so this crate doesn't depend on coordinator/watcher options
/// that have nothing to do with on-disk blob layout.
#[derive(Debug, Clone)]
pub struct BlobStoreConfig {
    /// Root directory for blob shards (`<cache_root>/blobs`).
    pub root: PathBuf,
    pub max_cache_bytes: u64,
    pub max_entry_age: Duration,
    pub compression: CompressionMode,
}

impl From<&Config> for BlobStoreConfig {
    fn from(config: &Config) -> Self {
        BlobStoreConfig {
            root: config.blobs_dir(),
            max_cache_bytes: config.max_cache_bytes,
            max_entry_age: config.max_entry_age,
            compression: config.compression,
        }
    }
}

impl From<Config> for BlobStoreConfig {
    fn from(config: Config) -> Self {
        (&config).into()
    }
}
