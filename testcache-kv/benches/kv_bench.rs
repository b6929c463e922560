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

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use testcache_blobstore::BlobStore;
use testcache_core::Config;
use testcache_kv::KvCache;

#[derive(Serialize, Deserialize, Clone)]
struct Widget {
    name: String,
    count: u32,
}

fn open(dir: &tempfile::TempDir) -> KvCache {
    let mut config = Config::new(dir.path());
    config.max_cache_bytes = 256 * 1024 * 1024;
    let blobstore = Arc::new(BlobStore::open(&config).unwrap());
    KvCache::open(&config, blobstore).unwrap()
}

fn bench_set(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let cache = open(&dir);
    let widget = Widget { name: "bolt".into(), count: 3 };

    let mut counter = 0u64;
    c.bench_function("kv_set_unique_keys", |b| {
        b.iter(|| {
            counter += 1;
            black_box(cache.set(&format!("widgets/{counter}"), 1, &widget).unwrap());
        })
    });
}

fn bench_get(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let cache = open(&dir);
    cache.set("widgets/bolt", 1, &Widget { name: "bolt".into(), count: 3 }).unwrap();

    c.bench_function("kv_get_hit", |b| {
        b.iter(|| black_box(cache.get::<Widget>("widgets/bolt", 1).unwrap()))
    });
}

criterion_group!(benches, bench_set, bench_get);
criterion_main!(benches);
