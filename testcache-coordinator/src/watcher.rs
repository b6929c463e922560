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

//! File-system watching (§4.E, §5 "a single consumer thread drains events
//! into a bounded channel; on backpressure, events are coalesced by
//! path").
//!
//! `notify`'s native backend does the OS-level watching; we only ever see
//! its events through one callback, which folds them into a `DashSet` of
//! touched paths (insertion is naturally idempotent - the coalescing) and
//! pings a bounded wake channel so the background scan loop knows a scan
//! is worth running sooner than its next timer tick. `poll`/`off` modes
//! skip the native watcher entirely; the loop's own timer is enough.

use dashmap::DashSet;
use notify::{RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use testcache_core::{Error, Result};

fn watch_error(e: notify::Error) -> Error {
    Error::IoError(io::Error::new(io::ErrorKind::Other, e.to_string()))
}

/// Watches a dynamic set of individual files, coalescing events into
/// `touched` and nudging `wake` on every one observed.
pub struct FileWatcher {
    touched: Arc<DashSet<PathBuf>>,
    native: Option<Mutex<RecommendedWatcher>>,
}

impl FileWatcher {
    /// Start the OS-native backend. Falls back to [`FileWatcher::disabled`]
    /// behavior from the caller's point of view if construction fails (the
    /// caller decides whether to log and degrade to polling).
    pub fn native(wake: SyncSender<()>) -> Result<Self> {
        let touched = Arc::new(DashSet::new());
        let touched_cb = touched.clone();
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                for path in event.paths {
                    touched_cb.insert(path);
                }
                let _ = wake.try_send(());
            }
            Err(e) => tracing::warn!(error = %e, "file watcher event error"),
        })
        .map_err(watch_error)?;
        Ok(FileWatcher { touched, native: Some(Mutex::new(watcher)) })
    }

    /// A watcher that never fires events; the background loop's periodic
    /// timer is the only trigger (`poll`/`off` modes).
    pub fn disabled() -> Self {
        FileWatcher { touched: Arc::new(DashSet::new()), native: None }
    }

    /// Start watching `path` individually (non-recursive - each dependency
    /// file is registered one at a time, not a containing directory tree).
    pub fn watch(&self, path: &Path) -> Result<()> {
        if let Some(watcher) = &self.native {
            if let Err(e) = watcher.lock().watch(path, RecursiveMode::NonRecursive) {
                // A dependency file that doesn't exist yet can't be watched
                // natively; the periodic scan still discovers it on creation.
                tracing::debug!(path = %path.display(), error = %e, "could not watch path");
            }
        }
        Ok(())
    }

    pub fn unwatch(&self, path: &Path) {
        if let Some(watcher) = &self.native {
            let _ = watcher.lock().unwatch(path);
        }
    }

    /// Drain and return every path touched since the last drain.
    pub fn drain_touched(&self) -> Vec<PathBuf> {
        let paths: Vec<PathBuf> = self.touched.iter().map(|p| p.clone()).collect();
        for path in &paths {
            self.touched.remove(path);
        }
        paths
    }
}
