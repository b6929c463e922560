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

//! File signatures used to decide whether a dependency actually changed
//! (§4.E change-detection policy: `(size, modified_time)` first as a cheap
//! filter, a content-hash prefix only when that filter disagrees).

use std::path::Path;
use std::time::UNIX_EPOCH;
use testcache_core::{Fingerprint, Result};

/// A cheap-to-compare snapshot of one dependency file's on-disk state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FileSignature {
    pub size: u64,
    pub modified_time: u64,
    /// First 8 hex characters of a BLAKE3 digest over the file's bytes.
    /// Only ever compared, never used to reconstruct content.
    pub content_hash_prefix: String,
}

impl FileSignature {
    /// Read `path` and compute its full signature, including the content
    /// hash prefix. Used whenever the cheap `(size, modified_time)` filter
    /// disagrees with what's on record, and when a file is seen for the
    /// first time.
    pub fn compute(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let meta = std::fs::metadata(path)?;
        Ok(FileSignature {
            size: bytes.len() as u64,
            modified_time: modified_secs(&meta)?,
            content_hash_prefix: Fingerprint::of("file-signature", &bytes).shard_prefix(8),
        })
    }
}

fn modified_secs(meta: &std::fs::Metadata) -> Result<u64> {
    let modified = meta.modified()?;
    Ok(modified.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_content_yields_identical_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();
        let a = FileSignature::compute(&path).unwrap();
        let b = FileSignature::compute(&path).unwrap();
        assert_eq!(a.content_hash_prefix, b.content_hash_prefix);
    }

    #[test]
    fn different_content_yields_different_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();
        let a = FileSignature::compute(&path).unwrap();
        std::fs::write(&path, b"goodbye").unwrap();
        let b = FileSignature::compute(&path).unwrap();
        assert_ne!(a.content_hash_prefix, b.content_hash_prefix);
    }
}
