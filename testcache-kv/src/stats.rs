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

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free hit/miss/store/invalidation/compute counters for one
/// [`crate::KvCache`]. `total_entries`, `bytes` and `compression_ratio` are
/// not tracked here - they're point-in-time queries against the pointer
/// table and the blob store, folded in by `KvCache::stats`.
#[derive(Default)]
pub struct Counters {
    hit: AtomicU64,
    miss: AtomicU64,
    store: AtomicU64,
    invalidation: AtomicU64,
    computes: AtomicU64,
    compute_errors: AtomicU64,
}

impl Counters {
    pub fn record_hit(&self) {
        self.hit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.miss.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store(&self) {
        self.store.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self, count: u64) {
        self.invalidation.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_compute(&self) {
        self.computes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compute_error(&self) {
        self.compute_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hit: self.hit.load(Ordering::Relaxed),
            miss: self.miss.load(Ordering::Relaxed),
            store: self.store.load(Ordering::Relaxed),
            invalidation: self.invalidation.load(Ordering::Relaxed),
            compression_ratio: 0.0,
            total_entries: 0,
            bytes: 0,
            computes: self.computes.load(Ordering::Relaxed),
            compute_errors: self.compute_errors.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of a KV cache's activity counters (§4.B).
///
/// `compression_ratio` is `compressed_bytes / uncompressed_bytes` across the
/// whole underlying blob store (`0.0` when nothing has been stored yet) -
/// smaller means better compression. `computes`/`compute_errors` are not
/// part of the named statistic set but are cheap to carry alongside it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub hit: u64,
    pub miss: u64,
    pub store: u64,
    pub invalidation: u64,
    pub compression_ratio: f64,
    pub total_entries: u64,
    pub bytes: u64,
    /// Number of times `get_or_compute` actually ran its loader.
    pub computes: u64,
    /// Number of loader invocations that returned an error.
    pub compute_errors: u64,
}

impl CacheStats {
    /// Hit rate in `[0.0, 1.0]`; `0.0` when there have been no lookups yet.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit + self.miss;
        if total == 0 {
            0.0
        } else {
            self.hit as f64 / total as f64
        }
    }
}
