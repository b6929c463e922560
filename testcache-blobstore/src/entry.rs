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

use std::collections::BTreeMap;
use std::path::PathBuf;
use testcache_core::{CompressionAlgorithm, Fingerprint};

/// Metadata for one stored blob. Mirrors the on-disk sidecar record; never
/// carries the payload bytes themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    pub fingerprint: Fingerprint,
    pub payload_path: PathBuf,
    pub metadata_path: PathBuf,
    /// Unix seconds; satisfies `created_at <= last_accessed_at`.
    pub created_at: u64,
    pub last_accessed_at: u64,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub compression_algorithm: CompressionAlgorithm,
    pub access_count: u64,
    /// Opaque producer-supplied tag used to route deserialization.
    pub type_tag: String,
    /// Producer-specific name=value pairs, carried through untouched.
    pub extras: BTreeMap<String, String>,
}

/// Outcome of a `maintenance()` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Payload or metadata files found without their matching counterpart.
    pub orphans_removed: u64,
    /// Entries removed by LRU eviction to satisfy `max_cache_bytes`.
    pub evicted: u64,
    /// Entries removed for exceeding `max_entry_age`.
    pub expired: u64,
}
