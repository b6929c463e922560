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

//! The solution-scoped coordinator (Layer E): dependency-aware invalidation
//! and file-system watching wrapped around the KV cache's single-flight
//! `get_or_compute` (§4.E).
//!
//! Ownership stays layered per §3: the coordinator never touches blob
//! files directly, only the KV cache's `get_or_compute`/`invalidate`.

use crate::change_set::ChangeSet;
use crate::dependency_index::DependencyIndex;
use crate::watcher::FileWatcher;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use testcache_core::{Config, FileWatchMode, Fingerprint, Result};
use testcache_kv::KvCache;

/// Entries stored through the coordinator carry no caller-visible schema
/// version (§4.E's `get_or_set` signature takes none) - the logical key
/// itself is the caller's contract with its own value shape.
const SCHEMA_VERSION: u32 = 1;

struct Inner {
    kv: Arc<KvCache>,
    index: DependencyIndex,
    watcher: FileWatcher,
    poll_interval: Duration,
    stop: AtomicBool,
}

impl Inner {
    fn detect_changes(&self) -> Result<ChangeSet> {
        let kv = &self.kv;
        self.index.detect_changes(|key| kv.invalidate(key))
    }

    /// Rescan only `touched` rather than every tracked path - the
    /// background loop's fast path when a native watcher event woke it.
    fn detect_changes_touched(&self, touched: &HashSet<PathBuf>) -> Result<ChangeSet> {
        let kv = &self.kv;
        self.index.detect_changes_scoped(Some(touched), |key| kv.invalidate(key))
    }
}

/// Solution-scoped front door over the KV cache, adding dependency tracking
/// and file-watch-triggered invalidation (§4.E).
pub struct SolutionCacheCoordinator {
    inner: Arc<Inner>,
    wake: SyncSender<()>,
    background: Option<JoinHandle<()>>,
}

fn solution_fingerprint(solution_path: &Path) -> Fingerprint {
    Fingerprint::of("solution", solution_path.to_string_lossy().as_bytes())
}

fn write_namespace_file(path: &Path, solution_path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("ns.tmp");
    std::fs::write(&tmp, format!("VERSION 1\n{}\n", solution_path.to_string_lossy()))?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn spawn_background(inner: Arc<Inner>, wake: Receiver<()>) -> JoinHandle<()> {
    std::thread::spawn(move || loop {
        let woken_by_watcher = match wake.recv_timeout(inner.poll_interval) {
            Ok(()) => true,
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if inner.stop.load(Ordering::Acquire) {
            break;
        }

        // A watcher event already tells us which paths changed; rescan only
        // those. A timer tick (or a watcher with nothing queued, e.g. right
        // after startup) falls back to the full scan.
        let touched = inner.watcher.drain_touched();
        let result = if woken_by_watcher && !touched.is_empty() {
            inner.detect_changes_touched(&touched.into_iter().collect())
        } else {
            inner.detect_changes()
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "background change detection failed");
        }
    })
}

impl SolutionCacheCoordinator {
    /// Load or rebuild the dependency index for `solution_path` and start
    /// the change-detection loop: a native watcher per `config.file_watch`
    /// (falling back to polling if it can't be started), or a bare polling
    /// timer, or nothing at all when watching is turned off.
    #[tracing::instrument(skip(config, kv), fields(solution_path = %solution_path.display()))]
    pub fn initialize(solution_path: &Path, config: &Config, kv: Arc<KvCache>) -> Result<Self> {
        let index = DependencyIndex::load(config.index_dir().join("dependencies.idx"))?;

        let namespace_path = config
            .index_dir()
            .join("solutions")
            .join(format!("{}.ns", solution_fingerprint(solution_path).to_hex()));
        write_namespace_file(&namespace_path, solution_path)?;

        let (wake_tx, wake_rx) = sync_channel::<()>(1);
        let watcher = match config.file_watch {
            FileWatchMode::Native => FileWatcher::native(wake_tx.clone()).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "native file watcher unavailable, falling back to polling");
                FileWatcher::disabled()
            }),
            FileWatchMode::Poll | FileWatchMode::Off => FileWatcher::disabled(),
        };

        for path in index.tracked_paths() {
            let _ = watcher.watch(&path);
        }

        let inner = Arc::new(Inner {
            kv,
            index,
            watcher,
            poll_interval: config.poll_interval,
            stop: AtomicBool::new(false),
        });

        let background =
            if config.file_watch == FileWatchMode::Off { None } else { Some(spawn_background(inner.clone(), wake_rx)) };

        Ok(SolutionCacheCoordinator { inner, wake: wake_tx, background })
    }

    /// Fetch `logical_key`, or compute it via `loader` on a miss, then
    /// register `dependency_files` as this entry's dependency set -
    /// re-registered on every call (not only a fresh compute) so the index
    /// self-heals if it was ever rebuilt out from under a still-cached
    /// entry (§4.E `get_or_set`).
    pub async fn get_or_set<T, F, Fut>(
        &self,
        logical_key: &str,
        loader: F,
        dependency_files: &HashSet<PathBuf>,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Clone,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let value = self.inner.kv.get_or_compute(logical_key, SCHEMA_VERSION, loader).await?;

        let newly_seen = self.inner.index.register(logical_key, dependency_files.clone());
        for path in &newly_seen {
            let _ = self.inner.watcher.watch(path);
        }

        Ok(value)
    }

    /// `get_or_set`, bounded by `deadline` (§5 "Timeouts"). A loader that
    /// overruns it fails with [`testcache_core::Error::Timeout`]; the
    /// dependency set is left unregistered in that case, the same as any
    /// other failed compute.
    pub async fn get_or_set_with_deadline<T, F, Fut>(
        &self,
        logical_key: &str,
        loader: F,
        dependency_files: &HashSet<PathBuf>,
        deadline: Duration,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Clone,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let value = self
            .inner
            .kv
            .get_or_compute_with_deadline(logical_key, SCHEMA_VERSION, loader, deadline)
            .await?;

        let newly_seen = self.inner.index.register(logical_key, dependency_files.clone());
        for path in &newly_seen {
            let _ = self.inner.watcher.watch(path);
        }

        Ok(value)
    }

    /// Remove `logical_key` from both the KV cache and the dependency
    /// index. Returns whether an entry was actually present.
    pub fn invalidate(&self, logical_key: &str) -> Result<bool> {
        self.inner.kv.invalidate(logical_key)?;
        Ok(self.inner.index.remove(logical_key).is_some())
    }

    /// Remove every entry whose dependency set contains `path` (§4.E
    /// `invalidate_dependents_of`). Returns how many were removed.
    pub fn invalidate_dependents_of(&self, path: &Path) -> Result<u64> {
        let dependents = self.inner.index.dependents_of(path);
        for key in &dependents {
            self.inner.kv.invalidate(key)?;
            self.inner.index.remove(key);
        }
        self.inner.watcher.unwatch(path);
        Ok(dependents.len() as u64)
    }

    /// Run one change-detection pass over every registered dependency file
    /// right now, regardless of the watcher/timer cadence (§4.E
    /// `detect_changes`).
    pub fn detect_changes(&self) -> Result<ChangeSet> {
        self.inner.detect_changes()
    }

    /// Stop the background loop and flush the dependency index to disk.
    pub fn shutdown(self) -> Result<()> {
        self.inner.stop.store(true, Ordering::Release);
        let _ = self.wake.try_send(());
        drop(self.wake);
        if let Some(handle) = self.background {
            let _ = handle.join();
        }
        self.inner.index.flush()
    }
}
