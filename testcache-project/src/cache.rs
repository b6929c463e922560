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

//! The project metadata cache (Layer C).
//!
//! A read-only view over [`testcache_kv::KvCache`]: every operation here
//! goes through the KV layer's `get`/`set`/`invalidate_matching`, never
//! touches blob files directly (§3 "Ownership").

use crate::entry::ProjectEntry;
use crate::hash;
use crate::scan;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use testcache_kv::KvCache;
use testcache_core::Result;

const SCHEMA_VERSION: u32 = 1;
const DEFAULT_FRAMEWORK: &str = "default";

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn normalize(project_path: &Path) -> PathBuf {
    std::fs::canonicalize(project_path).unwrap_or_else(|_| project_path.to_path_buf())
}

fn logical_key(project_path: &Path, framework: Option<&str>) -> String {
    format!(
        "project::{}::{}",
        normalize(project_path).to_string_lossy(),
        framework.unwrap_or(DEFAULT_FRAMEWORK),
    )
}

/// Caches compiled metadata about a project over the KV layer.
pub struct ProjectCache {
    kv: Arc<KvCache>,
}

impl ProjectCache {
    pub fn new(kv: Arc<KvCache>) -> Self {
        ProjectCache { kv }
    }

    /// Read the project's current inputs from disk and build a fresh
    /// entry (§4.C). Does not store it - call [`Self::store`] for that.
    #[tracing::instrument(skip(self), fields(project_path = %project_path.display()))]
    pub fn create_entry(&self, project_path: &Path, framework: Option<&str>) -> Result<ProjectEntry> {
        let root = scan::project_root(project_path);
        let target_framework = framework.unwrap_or(DEFAULT_FRAMEWORK).to_string();
        let source_files = scan::hash_source_files(&root)?;
        let referenced_assemblies = scan::resolve_references(&root)?;
        let content_hash = hash::content_hash(&target_framework, &source_files, &referenced_assemblies);

        Ok(ProjectEntry {
            project_path: normalize(project_path),
            target_framework,
            source_files,
            referenced_assemblies,
            content_hash,
            created_at: now_unix(),
        })
    }

    /// Persist `entry` under `(project_path, target_framework)`.
    pub fn store(&self, entry: &ProjectEntry) -> Result<()> {
        let key = logical_key(&entry.project_path, Some(&entry.target_framework));
        self.kv.set(&key, SCHEMA_VERSION, entry)
    }

    /// Fetch the cached entry for `(project_path, framework)`, but only if
    /// a fresh re-hash of the project's current disk state still matches
    /// the stored `content_hash`. A mismatch is a miss; the stale entry is
    /// left in place, to be replaced on the next [`Self::store`] (§4.C).
    #[tracing::instrument(skip(self), fields(project_path = %project_path.display()))]
    pub fn get(&self, project_path: &Path, framework: Option<&str>) -> Result<Option<ProjectEntry>> {
        let key = logical_key(project_path, framework);
        let stored: ProjectEntry = match self.kv.get(&key, SCHEMA_VERSION) {
            Ok(entry) => entry,
            Err(e) if e.is_self_healing() => return Ok(None),
            Err(e) => return Err(e),
        };

        let fresh = self.create_entry(project_path, framework)?;
        if fresh.content_hash == stored.content_hash {
            Ok(Some(stored))
        } else {
            Ok(None)
        }
    }

    /// Remove every cached entry for `project_path`, across all frameworks
    /// it may have been stored under.
    pub fn invalidate(&self, project_path: &Path) -> Result<bool> {
        let prefix = format!("project::{}::", normalize(project_path).to_string_lossy());
        let removed = self.kv.invalidate_matching(|key| key.starts_with(&prefix))?;
        Ok(removed > 0)
    }
}
