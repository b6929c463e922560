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

//! Testcache KV
//!
//! A compressed, schema-versioned key-value cache layered over the blob
//! store, with single-flight `get_or_compute` semantics.

mod cache;
mod pointer;
mod record;
mod stats;

pub use cache::KvCache;
pub use stats::CacheStats;

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use testcache_blobstore::BlobStore;
    use testcache_core::Config;

    #[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
    struct Widget {
        name: String,
        count: u32,
    }

    fn open(dir: &tempfile::TempDir) -> KvCache {
        let mut config = Config::new(dir.path());
        config.max_cache_bytes = 16 * 1024 * 1024;
        let blobstore = Arc::new(BlobStore::open(config.clone()).unwrap());
        KvCache::open(&config, blobstore).unwrap()
    }

    #[test]
    fn set_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir);
        let widget = Widget { name: "bolt".into(), count: 3 };
        cache.set("widgets/bolt", 1, &widget).unwrap();
        let fetched: Widget = cache.get("widgets/bolt", 1).unwrap();
        assert_eq!(fetched, widget);
    }

    #[test]
    fn get_missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir);
        let err = cache.get::<Widget>("missing", 1).unwrap_err();
        assert!(matches!(err, testcache_core::Error::NotFound(_)));
    }

    #[test]
    fn schema_mismatch_surfaces_on_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir);
        cache.set("widgets/bolt", 1, &Widget { name: "bolt".into(), count: 3 }).unwrap();
        let err = cache.get::<Widget>("widgets/bolt", 2).unwrap_err();
        assert!(matches!(err, testcache_core::Error::SchemaMismatch { .. }));
    }

    #[test]
    fn invalidate_removes_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir);
        cache.set("widgets/bolt", 1, &Widget { name: "bolt".into(), count: 3 }).unwrap();
        cache.invalidate("widgets/bolt").unwrap();
        assert!(cache.get::<Widget>("widgets/bolt", 1).is_err());
    }

    #[test]
    fn invalidate_matching_removes_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir);
        cache.set("widgets/a", 1, &Widget { name: "a".into(), count: 1 }).unwrap();
        cache.set("widgets/b", 1, &Widget { name: "b".into(), count: 2 }).unwrap();
        cache.set("gadgets/c", 1, &Widget { name: "c".into(), count: 3 }).unwrap();

        let removed = cache.invalidate_matching(|k| k.starts_with("widgets/")).unwrap();
        assert_eq!(removed, 2);
        assert!(cache.get::<Widget>("widgets/a", 1).is_err());
        assert!(cache.get::<Widget>("gadgets/c", 1).is_ok());
    }

    #[test]
    fn reopening_rebuilds_key_index() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = open(&dir);
            cache.set("widgets/bolt", 1, &Widget { name: "bolt".into(), count: 3 }).unwrap();
        }
        let mut config = Config::new(dir.path());
        config.max_cache_bytes = 16 * 1024 * 1024;
        let blobstore = Arc::new(BlobStore::open(config.clone()).unwrap());
        let reopened = KvCache::open(&config, blobstore).unwrap();
        let fetched: Widget = reopened.get("widgets/bolt", 1).unwrap();
        assert_eq!(fetched.count, 3);
    }

    #[tokio::test]
    async fn get_or_compute_only_runs_loader_once_on_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir);
        let calls = Arc::new(AtomicU32::new(0));

        let calls_clone = calls.clone();
        let value: Widget = cache
            .get_or_compute("widgets/bolt", 1, || async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(Widget { name: "bolt".into(), count: 3 })
            })
            .await
            .unwrap();
        assert_eq!(value.count, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let calls_clone = calls.clone();
        let second: Widget = cache
            .get_or_compute("widgets/bolt", 1, || async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(Widget { name: "bolt".into(), count: 99 })
            })
            .await
            .unwrap();
        assert_eq!(second.count, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn get_or_compute_propagates_loader_errors() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir);
        let result: Result<Widget, _> = cache
            .get_or_compute("widgets/broken", 1, || async {
                Err(testcache_core::Error::LoaderFailed("boom".into()))
            })
            .await;
        assert!(matches!(result, Err(testcache_core::Error::LoaderFailed(_))));
        let stats = cache.stats();
        assert_eq!(stats.compute_errors, 1);
    }

    #[test]
    fn stats_report_store_entries_and_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir);
        cache.set("widgets/a", 1, &Widget { name: "a".into(), count: 1 }).unwrap();
        cache.set("widgets/b", 1, &Widget { name: "b".into(), count: 2 }).unwrap();
        cache.invalidate("widgets/a").unwrap();

        let stats = cache.stats();
        assert_eq!(stats.store, 2);
        assert_eq!(stats.invalidation, 1);
        assert_eq!(stats.total_entries, 1);
        assert!(stats.bytes > 0);
        assert!(stats.compression_ratio > 0.0);
    }

    #[tokio::test]
    async fn get_or_compute_with_deadline_times_out_on_a_slow_loader() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir);
        let result: Result<Widget, _> = cache
            .get_or_compute_with_deadline(
                "widgets/slow",
                1,
                || async {
                    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                    Ok(Widget { name: "bolt".into(), count: 3 })
                },
                std::time::Duration::from_millis(10),
            )
            .await;
        assert!(matches!(result, Err(testcache_core::Error::Timeout(_))));
        assert!(cache.get::<Widget>("widgets/slow", 1).is_err());

        // The slot was released; a fresh call for the same key succeeds.
        let value: Widget = cache
            .get_or_compute_with_deadline(
                "widgets/slow",
                1,
                || async { Ok(Widget { name: "bolt".into(), count: 3 }) },
                std::time::Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(value.count, 3);
    }
}
