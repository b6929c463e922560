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

//! The content-addressed blob store (Layer A).
//!
//! Blobs live two hex characters deep, `<root>/<shard>/<fingerprint>.bin`,
//! next to a versioned `.meta` sidecar. Writes go through a temp file and an
//! atomic rename so a crash mid-write never leaves a half-written blob
//! visible under its final name. A corrupt or missing blob on read
//! self-heals: `get` returns `Ok(None)` and the pair is reaped, never an
//! error surfaced to the caller.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::io::{Read, Write as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use testcache_core::config::CompressionMode;
use testcache_core::{CompressionAlgorithm, Error, Fingerprint, Result};

use crate::blob_config::BlobStoreConfig;
use crate::entry::{BlobEntry, MaintenanceReport};
use crate::meta::BlobMeta;

const SHARD_PREFIX_LEN: usize = 2;
const NUM_SHARD_LOCKS: usize = 256;

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// A persistent, crash-resilient store for opaque compressed byte payloads
/// indexed by a caller-supplied fingerprint.
pub struct BlobStore {
    config: BlobStoreConfig,
    shard_locks: Vec<Mutex<()>>,
    index: DashMap<Fingerprint, BlobMeta>,
    compressed_bytes: AtomicU64,
}

impl BlobStore {
    /// Open (creating if necessary) the blob store at `config.root`,
    /// rebuilding the in-memory index from whatever is already on disk.
    pub fn open(config: impl Into<BlobStoreConfig>) -> Result<Self> {
        let config = config.into();
        std::fs::create_dir_all(&config.root)?;

        let store = BlobStore {
            config,
            shard_locks: (0..NUM_SHARD_LOCKS).map(|_| Mutex::new(())).collect(),
            index: DashMap::new(),
            compressed_bytes: AtomicU64::new(0),
        };
        store.rebuild_index()?;
        Ok(store)
    }

    fn rebuild_index(&self) -> Result<()> {
        if !self.config.root.exists() {
            return Ok(());
        }
        for shard in std::fs::read_dir(&self.config.root)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for file in std::fs::read_dir(shard.path())? {
                let file = file?;
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some("meta") {
                    continue;
                }
                match BlobMeta::read_from(&path) {
                    Ok(meta) => {
                        self.compressed_bytes.fetch_add(meta.compressed_size, Ordering::Relaxed);
                        self.index.insert(meta.fingerprint, meta);
                    }
                    Err(_) => continue, // orphaned/corrupt sidecar; maintenance() reaps the pair
                }
            }
        }
        Ok(())
    }

    fn shard_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.config.root.join(fingerprint.shard_prefix(SHARD_PREFIX_LEN))
    }

    fn payload_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.shard_dir(fingerprint).join(format!("{}.bin", fingerprint.to_hex()))
    }

    fn metadata_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.shard_dir(fingerprint).join(format!("{}.meta", fingerprint.to_hex()))
    }

    fn lock_for(&self, fingerprint: &Fingerprint) -> &Mutex<()> {
        let idx = fingerprint.as_bytes()[0] as usize % self.shard_locks.len();
        &self.shard_locks[idx]
    }

    fn to_entry(&self, meta: &BlobMeta) -> BlobEntry {
        BlobEntry {
            fingerprint: meta.fingerprint,
            payload_path: self.payload_path(&meta.fingerprint),
            metadata_path: self.metadata_path(&meta.fingerprint),
            created_at: meta.created_at,
            last_accessed_at: meta.last_accessed_at,
            uncompressed_size: meta.uncompressed_size,
            compressed_size: meta.compressed_size,
            compression_algorithm: meta.compression_algorithm,
            access_count: meta.access_count,
            type_tag: meta.type_tag.clone(),
            extras: meta.extras.clone(),
        }
    }

    fn compress(&self, bytes: &[u8]) -> std::io::Result<Vec<u8>> {
        use flate2::write::DeflateEncoder;
        use flate2::Compression;
        let level = match self.config.compression {
            CompressionMode::Max => Compression::best(),
            _ => Compression::default(),
        };
        let mut encoder = DeflateEncoder::new(Vec::new(), level);
        encoder.write_all(bytes)?;
        encoder.finish()
    }

    fn decompress(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
        use flate2::read::DeflateDecoder;
        let mut decoder = DeflateDecoder::new(bytes);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Write `bytes` under `fingerprint`, tagged with `type_tag`. A repeat
    /// `put` for a fingerprint already present is a no-op that returns the
    /// existing entry unchanged (storing the same `(key, value)` twice
    /// yields one entry).
    #[tracing::instrument(skip(self, bytes), fields(fingerprint = %fingerprint))]
    pub fn put(&self, fingerprint: &Fingerprint, bytes: &[u8], type_tag: &str) -> Result<BlobEntry> {
        let _guard = self.lock_for(fingerprint).lock();

        if let Some(existing) = self.index.get(fingerprint) {
            return Ok(self.to_entry(&existing));
        }

        let compress = self.config.compression != CompressionMode::Off
            && bytes.len() >= testcache_core::config::MIN_COMPRESS_BYTES;
        let (on_disk, algorithm) = if compress {
            let compressed = self.compress(bytes)?;
            if compressed.len() < bytes.len() {
                (compressed, CompressionAlgorithm::Deflate)
            } else {
                (bytes.to_vec(), CompressionAlgorithm::None)
            }
        } else {
            (bytes.to_vec(), CompressionAlgorithm::None)
        };

        self.reserve_budget(on_disk.len() as u64)?;

        let shard = self.shard_dir(fingerprint);
        std::fs::create_dir_all(&shard)?;
        let payload_path = self.payload_path(fingerprint);
        let tmp_path = payload_path.with_extension("bin.tmp");
        {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(&on_disk)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &payload_path)?;

        let now = now_unix();
        let meta = BlobMeta {
            fingerprint: *fingerprint,
            type_tag: type_tag.to_string(),
            created_at: now,
            last_accessed_at: now,
            uncompressed_size: bytes.len() as u64,
            compressed_size: on_disk.len() as u64,
            access_count: 0,
            compression_algorithm: algorithm,
            extras: Default::default(),
        };
        meta.write_atomic(&self.metadata_path(fingerprint))?;

        self.compressed_bytes.fetch_add(on_disk.len() as u64, Ordering::Relaxed);
        let entry = self.to_entry(&meta);
        self.index.insert(*fingerprint, meta);
        Ok(entry)
    }

    /// Evict LRU entries until `incoming_bytes` of headroom exists.
    fn reserve_budget(&self, incoming_bytes: u64) -> Result<()> {
        let limit = self.config.max_cache_bytes;
        if incoming_bytes > limit {
            return Err(Error::QuotaExceeded { used: incoming_bytes, limit });
        }
        loop {
            let used = self.compressed_bytes.load(Ordering::Relaxed);
            if used + incoming_bytes <= limit {
                return Ok(());
            }
            let victim = self.lru_candidate();
            match victim {
                Some(fp) => {
                    // Lock-free: `reserve_budget` runs under the caller's own
                    // shard lock (from `put`), and the victim can land in
                    // that same shard. Going through `remove` here would
                    // re-acquire it on this thread and deadlock.
                    self.drop_entry(&fp);
                }
                None => {
                    return Err(Error::QuotaExceeded { used: used + incoming_bytes, limit });
                }
            }
        }
    }

    /// Ascending `last_accessed_at`, fingerprint as tiebreak.
    fn lru_candidate(&self) -> Option<Fingerprint> {
        self.index
            .iter()
            .min_by(|a, b| {
                a.value()
                    .last_accessed_at
                    .cmp(&b.value().last_accessed_at)
                    .then_with(|| a.key().cmp(b.key()))
            })
            .map(|e| *e.key())
    }

    /// Read the payload for `fingerprint`, decompressing and verifying
    /// against the recorded sizes. `Ok(None)` covers both "never stored"
    /// and "found but corrupt" (the pair is removed in the latter case).
    #[tracing::instrument(skip(self), fields(fingerprint = %fingerprint))]
    pub fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Vec<u8>>> {
        let _guard = self.lock_for(fingerprint).lock();

        let Some(meta) = self.index.get(fingerprint).map(|e| e.clone()) else {
            return Ok(None);
        };

        let payload_path = self.payload_path(fingerprint);
        let raw = match std::fs::read(&payload_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.drop_entry(fingerprint);
                return Ok(None);
            }
            Err(e) => return Err(Error::IoError(e)),
        };

        let payload = match meta.compression_algorithm {
            CompressionAlgorithm::Deflate => match Self::decompress(&raw) {
                Ok(p) => p,
                Err(_) => {
                    self.drop_entry(fingerprint);
                    return Ok(None);
                }
            },
            CompressionAlgorithm::Gzip | CompressionAlgorithm::None => raw,
        };

        if payload.len() as u64 != meta.uncompressed_size {
            self.drop_entry(fingerprint);
            return Ok(None);
        }

        let mut updated = meta;
        updated.last_accessed_at = now_unix();
        updated.access_count += 1;
        if updated.write_atomic(&self.metadata_path(fingerprint)).is_ok() {
            self.index.insert(*fingerprint, updated);
        }

        Ok(Some(payload))
    }

    fn drop_entry(&self, fingerprint: &Fingerprint) {
        if let Some((_, meta)) = self.index.remove(fingerprint) {
            self.compressed_bytes.fetch_sub(meta.compressed_size, Ordering::Relaxed);
        }
        let _ = std::fs::remove_file(self.payload_path(fingerprint));
        let _ = std::fs::remove_file(self.metadata_path(fingerprint));
    }

    /// Remove a blob and its metadata. Returns whether anything was removed.
    pub fn remove(&self, fingerprint: &Fingerprint) -> Result<bool> {
        let _guard = self.lock_for(fingerprint).lock();
        let existed = self.index.contains_key(fingerprint);
        self.drop_entry(fingerprint);
        Ok(existed)
    }

    /// All currently indexed entries, in no particular order.
    pub fn list(&self) -> impl Iterator<Item = Result<(Fingerprint, BlobEntry)>> + '_ {
        self.index
            .iter()
            .map(|e| Ok((*e.key(), self.to_entry(e.value()))))
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// `(compressed_bytes, uncompressed_bytes)` summed across all entries.
    pub fn total_size(&self) -> (u64, u64) {
        let mut compressed = 0u64;
        let mut uncompressed = 0u64;
        for entry in self.index.iter() {
            compressed += entry.value().compressed_size;
            uncompressed += entry.value().uncompressed_size;
        }
        (compressed, uncompressed)
    }

    /// (a) reap on-disk orphans (payload or metadata missing its partner),
    /// (b) evict LRU entries until under `max_cache_bytes`,
    /// (c) delete entries older than `max_entry_age`.
    #[tracing::instrument(skip(self))]
    pub fn maintenance(&self) -> Result<MaintenanceReport> {
        let mut report = MaintenanceReport::default();
        report.orphans_removed = self.reap_orphans()?;

        let now = now_unix();
        let max_age_secs = self.config.max_entry_age.as_secs();
        let stale: Vec<Fingerprint> = self
            .index
            .iter()
            .filter(|e| now.saturating_sub(e.value().created_at) > max_age_secs)
            .map(|e| *e.key())
            .collect();
        for fingerprint in stale {
            if self.remove(&fingerprint)? {
                report.expired += 1;
            }
        }

        let limit = self.config.max_cache_bytes;
        while self.compressed_bytes.load(Ordering::Relaxed) > limit {
            let Some(fingerprint) = self.lru_candidate() else { break };
            if self.remove(&fingerprint)? {
                report.evicted += 1;
            }
        }

        Ok(report)
    }

    /// Delete `.bin` files with no `.meta` partner and vice versa.
    fn reap_orphans(&self) -> Result<u64> {
        let mut removed = 0u64;
        if !self.config.root.exists() {
            return Ok(removed);
        }
        for shard in std::fs::read_dir(&self.config.root)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for file in std::fs::read_dir(shard.path())? {
                let file = file?;
                let path = file.path();
                let Some(ext) = path.extension().and_then(|e| e.to_str()) else { continue };
                let partner = match ext {
                    "bin" => path.with_extension("meta"),
                    "meta" => path.with_extension("bin"),
                    _ => continue,
                };
                if !partner.exists() {
                    remove_if_exists(&path)?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_config::BlobStoreConfig;

    fn store(dir: &tempfile::TempDir, max_cache_bytes: u64) -> BlobStore {
        let config = BlobStoreConfig {
            root: dir.path().to_path_buf(),
            max_cache_bytes,
            max_entry_age: std::time::Duration::from_secs(30 * 24 * 60 * 60),
            compression: CompressionMode::Default,
        };
        BlobStore::open(config).unwrap()
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 1024 * 1024);
        let fp = Fingerprint::of("blob", b"hello world");
        store.put(&fp, b"hello world", "text").unwrap();
        assert_eq!(store.get(&fp).unwrap(), Some(b"hello world".to_vec()));
    }

    #[test]
    fn repeated_put_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 1024 * 1024);
        let fp = Fingerprint::of("blob", b"same bytes");
        let first = store.put(&fp, b"same bytes", "text").unwrap();
        let second = store.put(&fp, b"same bytes", "text").unwrap();
        assert_eq!(first.created_at, second.created_at);
        let (compressed, _) = store.total_size();
        assert!(compressed > 0);
    }

    #[test]
    fn get_missing_returns_none_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 1024 * 1024);
        let fp = Fingerprint::of("blob", b"never stored");
        assert_eq!(store.get(&fp).unwrap(), None);
    }

    #[test]
    fn corrupted_payload_self_heals_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 1024 * 1024);
        let fp = Fingerprint::of("blob", b"trustworthy");
        let entry = store.put(&fp, b"trustworthy", "text").unwrap();

        std::fs::write(&entry.payload_path, b"corrupted garbage bytes!!").unwrap();

        assert_eq!(store.get(&fp).unwrap(), None);
        let (compressed, _) = store.total_size();
        assert_eq!(compressed, 0);
    }

    #[test]
    fn remove_deletes_payload_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 1024 * 1024);
        let fp = Fingerprint::of("blob", b"to be removed");
        store.put(&fp, b"to be removed", "text").unwrap();
        assert!(store.remove(&fp).unwrap());
        assert!(!store.remove(&fp).unwrap());
        assert_eq!(store.get(&fp).unwrap(), None);
    }

    #[test]
    fn reopening_rebuilds_index_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let fp = Fingerprint::of("blob", b"persisted across reopen");
        {
            let store = store(&dir, 1024 * 1024);
            store.put(&fp, b"persisted across reopen", "text").unwrap();
        }
        let reopened = store(&dir, 1024 * 1024);
        assert_eq!(reopened.get(&fp).unwrap(), Some(b"persisted across reopen".to_vec()));
    }

    #[test]
    fn eviction_is_ascending_last_accessed_order() {
        let dir = tempfile::tempdir().unwrap();
        let config = BlobStoreConfig {
            root: dir.path().to_path_buf(),
            max_cache_bytes: 70,
            max_entry_age: std::time::Duration::from_secs(30 * 24 * 60 * 60),
            compression: CompressionMode::Off,
        };
        let store = BlobStore::open(config).unwrap();

        let e1 = Fingerprint::of("blob", b"entry-one-0");
        let e2 = Fingerprint::of("blob", b"entry-two-0");
        store.put(&e1, b"entry-one-0", "t").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        store.put(&e2, b"entry-two-0", "t").unwrap();

        // Touch e1 so it becomes most-recently-accessed, then force eviction
        // by writing a third entry past budget.
        std::thread::sleep(std::time::Duration::from_millis(1100));
        store.get(&e1).unwrap();
        let e3 = Fingerprint::of("blob", b"entry-three");
        store.put(&e3, b"entry-three", "t").unwrap();

        assert_eq!(store.get(&e2).unwrap(), None);
        assert!(store.get(&e1).unwrap().is_some());
    }

    #[test]
    fn oversized_single_payload_is_quota_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let config = BlobStoreConfig {
            root: dir.path().to_path_buf(),
            max_cache_bytes: 8,
            max_entry_age: std::time::Duration::from_secs(30 * 24 * 60 * 60),
            compression: CompressionMode::Off,
        };
        let store = BlobStore::open(config).unwrap();
        let fp = Fingerprint::of("blob", &[0u8; 64]);
        let err = store.put(&fp, &[0u8; 64], "t").unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded { .. }));
    }

    #[test]
    fn maintenance_expires_entries_older_than_max_age() {
        let dir = tempfile::tempdir().unwrap();
        let config = BlobStoreConfig {
            root: dir.path().to_path_buf(),
            max_cache_bytes: 1024 * 1024,
            max_entry_age: std::time::Duration::from_secs(0),
            compression: CompressionMode::Default,
        };
        let store = BlobStore::open(config).unwrap();
        let fp = Fingerprint::of("blob", b"ephemeral");
        store.put(&fp, b"ephemeral", "t").unwrap();

        std::thread::sleep(std::time::Duration::from_millis(1100));
        let report = store.maintenance().unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(store.get(&fp).unwrap(), None);
    }

    #[test]
    fn maintenance_reaps_orphaned_payload_without_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 1024 * 1024);
        let fp = Fingerprint::of("blob", b"orphan");
        let shard = dir.path().join(fp.shard_prefix(2));
        std::fs::create_dir_all(&shard).unwrap();
        std::fs::write(shard.join(format!("{}.bin", fp.to_hex())), b"orphan").unwrap();

        let report = store.maintenance().unwrap();
        assert_eq!(report.orphans_removed, 1);
    }

    #[test]
    fn compression_round_trips_for_compressible_payload() {
        let dir = tempfile::tempdir().unwrap();
        let config = BlobStoreConfig {
            root: dir.path().to_path_buf(),
            max_cache_bytes: 1024 * 1024,
            max_entry_age: std::time::Duration::from_secs(30 * 24 * 60 * 60),
            compression: CompressionMode::Max,
        };
        let store = BlobStore::open(config).unwrap();

        let payload = vec![b'a'; 4096];
        let fp = Fingerprint::of("blob", &payload);
        let entry = store.put(&fp, &payload, "t").unwrap();
        assert_eq!(store.get(&fp).unwrap(), Some(payload));
        assert_eq!(entry.compression_algorithm, CompressionAlgorithm::Deflate);
        assert!(entry.compressed_size < entry.uncompressed_size);
    }

    #[test]
    fn list_and_total_size_reflect_stored_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 1024 * 1024);
        let fp1 = Fingerprint::of("blob", b"one");
        let fp2 = Fingerprint::of("blob", b"two");
        store.put(&fp1, b"one", "t").unwrap();
        store.put(&fp2, b"two", "t").unwrap();

        let entries: Vec<_> = store.list().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(entries.len(), 2);
        let (compressed, uncompressed) = store.total_size();
        assert!(compressed > 0);
        assert!(uncompressed >= 6);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::blob_config::BlobStoreConfig;
    use proptest::prelude::*;

    fn store(dir: &tempfile::TempDir) -> BlobStore {
        let config = BlobStoreConfig {
            root: dir.path().to_path_buf(),
            max_cache_bytes: 64 * 1024 * 1024,
            max_entry_age: std::time::Duration::from_secs(30 * 24 * 60 * 60),
            compression: CompressionMode::Default,
        };
        BlobStore::open(config).unwrap()
    }

    proptest! {
        /// Any payload put under its own content fingerprint comes back
        /// byte-for-byte (§8 round-trip, generalized beyond hand-picked
        /// fixtures).
        #[test]
        fn put_then_get_round_trips_for_arbitrary_payloads(payload in proptest::collection::vec(any::<u8>(), 0..8192)) {
            let dir = tempfile::tempdir().unwrap();
            let store = store(&dir);
            let fp = Fingerprint::of("blob", &payload);
            store.put(&fp, &payload, "t").unwrap();
            prop_assert_eq!(store.get(&fp).unwrap(), Some(payload));
        }

        /// Storing the same payload twice never changes the fingerprint's
        /// recorded creation time (§3 idempotent `put`).
        #[test]
        fn repeated_put_is_idempotent_for_arbitrary_payloads(payload in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let dir = tempfile::tempdir().unwrap();
            let store = store(&dir);
            let fp = Fingerprint::of("blob", &payload);
            let first = store.put(&fp, &payload, "t").unwrap();
            let second = store.put(&fp, &payload, "t").unwrap();
            prop_assert_eq!(first.created_at, second.created_at);
            prop_assert_eq!(first.uncompressed_size, payload.len() as u64);
        }
    }
}
