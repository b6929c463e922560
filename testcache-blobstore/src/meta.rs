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

//! On-disk sidecar metadata format for a blob.
//!
//! Each blob `<fingerprint>.bin` has a matching `<fingerprint>.meta` text
//! file, versioned so a future format change can be detected and rejected
//! cleanly instead of silently misparsed. Field order and naming follow
//! the metadata record schema: fingerprint, type_tag, timestamps, sizes,
//! access_count, compression_algorithm, then any producer-supplied extras.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;
use std::str::FromStr;
use testcache_core::{CompressionAlgorithm, Error, Fingerprint};

pub const META_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct BlobMeta {
    pub fingerprint: Fingerprint,
    pub type_tag: String,
    pub created_at: u64,
    pub last_accessed_at: u64,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub access_count: u64,
    pub compression_algorithm: CompressionAlgorithm,
    pub extras: BTreeMap<String, String>,
}

fn to_iso8601(unix_secs: u64) -> String {
    DateTime::<Utc>::from_timestamp(unix_secs as i64, 0)
        .unwrap_or_default()
        .to_rfc3339()
}

fn from_iso8601(s: &str) -> Option<u64> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.timestamp().max(0) as u64)
}

impl BlobMeta {
    pub fn to_text(&self) -> String {
        let mut out = format!(
            "VERSION {}\nfingerprint={}\ntype_tag={}\ncreated_at={}\nlast_accessed_at={}\nuncompressed_size={}\ncompressed_size={}\naccess_count={}\ncompression_algorithm={}\n",
            META_VERSION,
            self.fingerprint.to_hex(),
            self.type_tag,
            to_iso8601(self.created_at),
            to_iso8601(self.last_accessed_at),
            self.uncompressed_size,
            self.compressed_size,
            self.access_count,
            self.compression_algorithm,
        );
        for (key, value) in &self.extras {
            out.push_str(&format!("extras.{key}={value}\n"));
        }
        out
    }

    pub fn parse(text: &str) -> Result<Self, Error> {
        let mut lines = text.lines();
        let header = lines
            .next()
            .ok_or_else(|| Error::Corrupt("empty metadata file".into()))?;
        let version: u32 = header
            .strip_prefix("VERSION ")
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(|| Error::Corrupt(format!("bad metadata header: {header}")))?;
        if version != META_VERSION {
            return Err(Error::SchemaMismatch { on_disk: version, expected: META_VERSION });
        }

        let mut fingerprint = None;
        let mut type_tag = None;
        let mut created_at = None;
        let mut last_accessed_at = None;
        let mut uncompressed_size = None;
        let mut compressed_size = None;
        let mut access_count = None;
        let mut compression_algorithm = None;
        let mut extras = BTreeMap::new();

        for line in lines {
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| Error::Corrupt(format!("bad metadata line: {line}")))?;
            match key {
                "fingerprint" => fingerprint = Fingerprint::from_hex(value).ok(),
                "type_tag" => type_tag = Some(value.to_string()),
                "created_at" => created_at = from_iso8601(value),
                "last_accessed_at" => last_accessed_at = from_iso8601(value),
                "uncompressed_size" => uncompressed_size = value.parse().ok(),
                "compressed_size" => compressed_size = value.parse().ok(),
                "access_count" => access_count = value.parse().ok(),
                "compression_algorithm" => compression_algorithm = CompressionAlgorithm::from_str(value).ok(),
                other => {
                    if let Some(extra_key) = other.strip_prefix("extras.") {
                        extras.insert(extra_key.to_string(), value.to_string());
                    }
                }
            }
        }

        Ok(BlobMeta {
            fingerprint: fingerprint.ok_or_else(|| Error::Corrupt("metadata missing fingerprint".into()))?,
            type_tag: type_tag.ok_or_else(|| Error::Corrupt("metadata missing type_tag".into()))?,
            created_at: created_at.ok_or_else(|| Error::Corrupt("metadata missing created_at".into()))?,
            last_accessed_at: last_accessed_at
                .ok_or_else(|| Error::Corrupt("metadata missing last_accessed_at".into()))?,
            uncompressed_size: uncompressed_size
                .ok_or_else(|| Error::Corrupt("metadata missing uncompressed_size".into()))?,
            compressed_size: compressed_size
                .ok_or_else(|| Error::Corrupt("metadata missing compressed_size".into()))?,
            access_count: access_count.ok_or_else(|| Error::Corrupt("metadata missing access_count".into()))?,
            compression_algorithm: compression_algorithm
                .ok_or_else(|| Error::Corrupt("metadata missing compression_algorithm".into()))?,
            extras,
        })
    }

    pub fn read_from(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(path.display().to_string())
            } else {
                Error::IoError(e)
            }
        })?;
        Self::parse(&text)
    }

    pub fn write_atomic(&self, path: &Path) -> Result<(), Error> {
        let tmp = path.with_extension("meta.tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(self.to_text().as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BlobMeta {
        BlobMeta {
            fingerprint: Fingerprint::of("blob", b"payload"),
            type_tag: "widget".into(),
            created_at: 1_700_000_000,
            last_accessed_at: 1_700_000_100,
            uncompressed_size: 100,
            compressed_size: 40,
            access_count: 3,
            compression_algorithm: CompressionAlgorithm::Deflate,
            extras: BTreeMap::new(),
        }
    }

    #[test]
    fn round_trips_through_text() {
        let meta = sample();
        let parsed = BlobMeta::parse(&meta.to_text()).unwrap();
        assert_eq!(parsed.fingerprint, meta.fingerprint);
        assert_eq!(parsed.type_tag, meta.type_tag);
        assert_eq!(parsed.created_at, meta.created_at);
        assert_eq!(parsed.last_accessed_at, meta.last_accessed_at);
        assert_eq!(parsed.uncompressed_size, meta.uncompressed_size);
        assert_eq!(parsed.compressed_size, meta.compressed_size);
        assert_eq!(parsed.access_count, meta.access_count);
        assert_eq!(parsed.compression_algorithm, meta.compression_algorithm);
    }

    #[test]
    fn extras_round_trip() {
        let mut meta = sample();
        meta.extras.insert("logical_key".into(), "widgets/bolt".into());
        meta.extras.insert("schema_version".into(), "1".into());
        let parsed = BlobMeta::parse(&meta.to_text()).unwrap();
        assert_eq!(parsed.extras.get("logical_key").unwrap(), "widgets/bolt");
        assert_eq!(parsed.extras.get("schema_version").unwrap(), "1");
    }

    #[test]
    fn rejects_mismatched_version() {
        let text = "VERSION 99\nfingerprint=ab\n";
        let err = BlobMeta::parse(text).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { on_disk: 99, expected: META_VERSION }));
    }

    #[test]
    fn rejects_garbage() {
        assert!(BlobMeta::parse("not metadata at all").is_err());
    }
}
