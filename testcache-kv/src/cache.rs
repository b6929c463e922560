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

//! The compressed, typed key-value cache (Layer B).
//!
//! Sits on top of [`testcache_blobstore::BlobStore`]: a logical key maps to
//! a small pointer file recording which blob fingerprint currently holds
//! its value and under which schema version. `get_or_compute` collapses
//! concurrent callers racing on the same key into a single loader
//! invocation via an in-memory single-flight map built on
//! `tokio::sync::Notify`. `get_or_compute_with_deadline` is the same
//! operation under an optional deadline (§5 "Timeouts"): a loader that
//! overruns it fails with [`Error::Timeout`] and the in-flight slot is
//! released without anything being stored.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use testcache_blobstore::BlobStore;
use testcache_core::{Config, Error, Fingerprint, Result};
use tokio::sync::Notify;

use crate::pointer::Pointer;
use crate::record;
use crate::stats::{CacheStats, Counters};

const KEY_SHARD_PREFIX_LEN: usize = 2;

/// Removes `key`'s in-flight [`Notify`] and wakes anyone waiting on it when
/// dropped, whether that's because the computation finished normally or
/// because its future was cancelled out from under it.
struct InflightGuard<'a> {
    cache: &'a KvCache,
    key: &'a str,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        // Hold `inflight` across the remove *and* the notify so a waiter
        // that registers under the same lock (see `get_or_compute`) can
        // never land in the gap between the two.
        let mut inflight = self.cache.inflight.lock();
        if let Some(notify) = inflight.remove(self.key) {
            notify.notify_waiters();
        }
    }
}

/// A namespaced, schema-versioned key-value cache backed by a blob store.
pub struct KvCache {
    root: PathBuf,
    blobstore: Arc<BlobStore>,
    pointers: DashMap<String, Pointer>,
    inflight: Mutex<HashMap<String, Arc<Notify>>>,
    counters: Counters,
}

impl KvCache {
    /// Open the KV layer, rooted at `config.cache_root.join("kv")`, sharing
    /// `blobstore` as the underlying content-addressed store.
    pub fn open(config: &Config, blobstore: Arc<BlobStore>) -> Result<Self> {
        let root = config.cache_root.join("kv");
        std::fs::create_dir_all(&root)?;
        let cache = KvCache {
            root,
            blobstore,
            pointers: DashMap::new(),
            inflight: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        };
        cache.rebuild_index()?;
        Ok(cache)
    }

    fn rebuild_index(&self) -> Result<()> {
        if !self.root.exists() {
            return Ok(());
        }
        for shard in std::fs::read_dir(&self.root)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for file in std::fs::read_dir(shard.path())? {
                let file = file?;
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some("ptr") {
                    continue;
                }
                if let Ok(pointer) = Pointer::read_from(&path) {
                    self.pointers.insert(pointer.key.clone(), pointer);
                }
            }
        }
        Ok(())
    }

    fn pointer_path(&self, key: &str) -> PathBuf {
        let fp = Fingerprint::of("kv-key", key.as_bytes());
        self.root
            .join(fp.shard_prefix(KEY_SHARD_PREFIX_LEN))
            .join(format!("{}.ptr", fp.to_hex()))
    }

    /// A point-in-time snapshot of this cache's activity counters plus its
    /// current footprint in the underlying blob store (§4.B).
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.counters.snapshot();
        let (compressed, uncompressed) = self.blobstore.total_size();
        stats.compression_ratio = if uncompressed == 0 {
            0.0
        } else {
            compressed as f64 / uncompressed as f64
        };
        stats.total_entries = self.pointers.len() as u64;
        stats.bytes = compressed;
        stats
    }

    /// Fetch and decode the value stored for `key`, if any and if its
    /// on-disk schema version matches `schema_version`.
    pub fn get<T: DeserializeOwned>(&self, key: &str, schema_version: u32) -> Result<T> {
        let pointer = match self.pointers.get(key) {
            Some(p) => p.clone(),
            None => {
                self.counters.record_miss();
                return Err(Error::NotFound(key.to_string()));
            }
        };
        let bytes = match self.blobstore.get(&pointer.fingerprint) {
            Ok(Some(b)) => b,
            Ok(None) => {
                // The pointer survived but its blob didn't (evicted, reaped,
                // or self-healed away after corruption) - a clean miss.
                self.counters.record_miss();
                return Err(Error::NotFound(key.to_string()));
            }
            Err(e) => {
                self.counters.record_miss();
                return Err(e);
            }
        };
        match record::decode(&bytes, schema_version) {
            Ok(value) => {
                self.counters.record_hit();
                Ok(value)
            }
            Err(e) => {
                self.counters.record_miss();
                Err(e)
            }
        }
    }

    /// Store `value` under `key` with `schema_version`, replacing any
    /// previous value (the old blob is left for `maintenance()`/GC to
    /// reclaim if nothing else references it).
    pub fn set<T: Serialize>(&self, key: &str, schema_version: u32, value: &T) -> Result<()> {
        let bytes = record::encode(schema_version, value)?;
        let fingerprint = Fingerprint::of("kv-value", &bytes);
        let entry = self.blobstore.put(&fingerprint, &bytes, "kv-value")?;
        let pointer = Pointer {
            fingerprint: entry.fingerprint,
            schema_version,
            key: key.to_string(),
        };
        pointer.write_atomic(&self.pointer_path(key))?;
        self.pointers.insert(key.to_string(), pointer);
        self.counters.record_store();
        Ok(())
    }

    /// Remove the mapping for `key`. Not an error if absent.
    pub fn invalidate(&self, key: &str) -> Result<()> {
        let existed = self.pointers.remove(key).is_some();
        let path = self.pointer_path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if existed {
            self.counters.record_invalidation(1);
        }
        Ok(())
    }

    /// Remove every key for which `predicate` returns true. Returns the
    /// number of keys removed.
    pub fn invalidate_matching(&self, predicate: impl Fn(&str) -> bool) -> Result<u64> {
        let matching: Vec<String> = self
            .pointers
            .iter()
            .filter(|e| predicate(e.key()))
            .map(|e| e.key().clone())
            .collect();
        let count = matching.len() as u64;
        for key in &matching {
            self.invalidate(key)?;
        }
        Ok(count)
    }

    /// Fetch `key`, or compute it via `loader` if absent/stale, collapsing
    /// concurrent callers for the same key into one loader invocation.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        schema_version: u32,
        loader: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Clone,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Ok(value) = self.get::<T>(key, schema_version) {
            return Ok(value);
        }

        let mut inflight = self.inflight.lock();
        if let Some(existing) = inflight.get(key) {
            // Someone else is already computing this key; wait for them and
            // re-read instead of recomputing. `enable()` registers us as a
            // waiter right now, while `inflight` is still held, so the
            // `InflightGuard::drop` that removes this slot and calls
            // `notify_waiters()` under the same lock can never run between
            // our lookup and our registration - closing the window where a
            // `notify_waiters()` (unlike `notify_one()`, no stored permit)
            // would otherwise wake no one and we'd wait forever.
            let notify = existing.clone();
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            drop(inflight);
            notified.await;
            return self.get::<T>(key, schema_version);
        }
        inflight.insert(key.to_string(), Arc::new(Notify::new()));
        drop(inflight);

        // Guards the in-flight slot for `key`: released on every exit path,
        // including the future being dropped mid-loader by an enclosing
        // `tokio::time::timeout` (§5 "Timeouts").
        let _guard = InflightGuard { cache: self, key };

        self.counters.record_compute();
        let result = loader().await;
        match &result {
            Ok(value) => {
                self.set(key, schema_version, value)?;
            }
            Err(_) => {
                self.counters.record_compute_error();
            }
        }

        result
    }

    /// `get_or_compute`, bounded by `deadline`. If the loader (or the wait
    /// for a concurrent loader already running) doesn't finish in time, the
    /// call fails with [`Error::Timeout`] and nothing is stored - a later
    /// call, with or without a deadline, is free to try again.
    pub async fn get_or_compute_with_deadline<T, F, Fut>(
        &self,
        key: &str,
        schema_version: u32,
        loader: F,
        deadline: Duration,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Clone,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(deadline, self.get_or_compute(key, schema_version, loader)).await
        {
            Ok(result) => result,
            Err(_) => {
                // Dropping the timed-out future drops the in-flight guard,
                // which releases the single-flight slot and wakes any other
                // waiter; nothing was stored since `set` only ever runs
                // after the loader future has already resolved.
                Err(Error::Timeout(deadline))
            }
        }
    }
}
