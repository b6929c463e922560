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

//! The coordinator's dependency index (§3 `DependencyRecord`, §4.E).
//!
//! One record per logical key, tracking the absolute paths it depends on
//! and each path's last observed [`FileSignature`]. Persisted as a single
//! `VERSION`-prefixed JSON body under `index/dependencies.idx`; an unknown
//! version is treated the same as a missing file - rebuilt fresh, per §6.

use crate::change_set::ChangeSet;
use crate::signature::FileSignature;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use testcache_core::Result;

pub const INDEX_VERSION: u32 = 1;

/// Everything the coordinator tracks about one cached entry's dependency
/// surface (§3 DependencyRecord).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyRecord {
    pub dependency_files: HashSet<PathBuf>,
    pub last_known_signature: HashMap<PathBuf, FileSignature>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexBody {
    entries: HashMap<String, DependencyRecord>,
}

/// What happened to one tracked path during a scan.
enum PathStatus {
    Unchanged,
    /// mtime/size moved but the content hash didn't - a touch, not an edit.
    TouchOnly(FileSignature),
    Added(FileSignature),
    Modified(FileSignature),
    Deleted,
}

pub struct DependencyIndex {
    path: PathBuf,
    body: RwLock<IndexBody>,
}

impl DependencyIndex {
    /// Load the index from `path`, or start empty if it's missing or
    /// carries an unrecognized version.
    pub fn load(path: PathBuf) -> Result<Self> {
        let body = match std::fs::read_to_string(&path) {
            Ok(text) => parse_body(&text).unwrap_or_default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => IndexBody::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(DependencyIndex { path, body: RwLock::new(body) })
    }

    /// Write the index back out atomically (write-to-temp, then rename).
    pub fn flush(&self) -> Result<()> {
        let body = self.body.read();
        let json = serde_json::to_string_pretty(&*body)
            .map_err(|e| testcache_core::Error::Corrupt(e.to_string()))?;
        drop(body);
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("idx.tmp");
        std::fs::write(&tmp, format!("VERSION {INDEX_VERSION}\n{json}"))?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Register (or replace) `logical_key`'s dependency set, computing an
    /// initial signature for every path. Returns the subset of
    /// `dependency_files` that no other entry was already tracking, so the
    /// caller can hand only the genuinely new paths to the file watcher.
    pub fn register(&self, logical_key: &str, dependency_files: HashSet<PathBuf>) -> HashSet<PathBuf> {
        let mut body = self.body.write();
        let already_tracked: HashSet<PathBuf> =
            body.entries.values().flat_map(|r| r.dependency_files.iter().cloned()).collect();

        let newly_seen: HashSet<PathBuf> =
            dependency_files.iter().filter(|p| !already_tracked.contains(*p)).cloned().collect();

        let mut last_known_signature = HashMap::with_capacity(dependency_files.len());
        for path in &dependency_files {
            if let Ok(sig) = FileSignature::compute(path) {
                last_known_signature.insert(path.clone(), sig);
            }
        }

        body.entries.insert(logical_key.to_string(), DependencyRecord { dependency_files, last_known_signature });
        newly_seen
    }

    /// Drop the record for `logical_key`. Returns it, if present.
    pub fn remove(&self, logical_key: &str) -> Option<DependencyRecord> {
        self.body.write().entries.remove(logical_key)
    }

    /// Every logical key whose dependency set contains `path`.
    pub fn dependents_of(&self, path: &Path) -> Vec<String> {
        self.body
            .read()
            .entries
            .iter()
            .filter(|(_, record)| record.dependency_files.contains(path))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Every path tracked by any entry, for re-registering file watches
    /// after a restart.
    pub fn tracked_paths(&self) -> HashSet<PathBuf> {
        self.body.read().entries.values().flat_map(|r| r.dependency_files.iter().cloned()).collect()
    }

    /// Scan every tracked path, classify it as unchanged/touched/added/
    /// modified/deleted, apply the resulting signature updates, and
    /// invalidate (via the `invalidate` callback) every entry whose
    /// dependency set contains a modified or deleted path - all under one
    /// write-lock hold, so a concurrent `register` never observes a
    /// half-applied scan (§4.E "invalidations are applied before the call
    /// returns").
    pub fn detect_changes(&self, invalidate: impl FnMut(&str) -> Result<()>) -> Result<ChangeSet> {
        self.detect_changes_scoped(None, invalidate)
    }

    /// `detect_changes`, restricted to `scope` when given. A file-watcher
    /// wakeup already knows which paths changed, so the background loop
    /// scans only those instead of every tracked path; a `None` scope (the
    /// explicit API, and any timer-driven wakeup) still scans everything.
    pub fn detect_changes_scoped(
        &self,
        scope: Option<&HashSet<PathBuf>>,
        mut invalidate: impl FnMut(&str) -> Result<()>,
    ) -> Result<ChangeSet> {
        let mut body = self.body.write();
        let mut change_set = ChangeSet::default();

        let mut tracked: HashMap<PathBuf, Option<FileSignature>> = HashMap::new();
        for record in body.entries.values() {
            for path in &record.dependency_files {
                if let Some(scope) = scope {
                    if !scope.contains(path) {
                        continue;
                    }
                }
                tracked.entry(path.clone()).or_insert_with(|| record.last_known_signature.get(path).copied());
            }
        }

        let mut invalidating: HashSet<PathBuf> = HashSet::new();
        for (path, old) in &tracked {
            match classify(path, old.as_ref())? {
                PathStatus::Unchanged => {}
                PathStatus::TouchOnly(fresh) => update_signature(&mut body, path, fresh),
                PathStatus::Added(fresh) => {
                    change_set.added.insert(path.clone());
                    update_signature(&mut body, path, fresh);
                }
                PathStatus::Modified(fresh) => {
                    change_set.modified.insert(path.clone());
                    update_signature(&mut body, path, fresh);
                    invalidating.insert(path.clone());
                }
                PathStatus::Deleted => {
                    change_set.deleted.insert(path.clone());
                    invalidating.insert(path.clone());
                }
            }
        }

        if !invalidating.is_empty() {
            let affected: Vec<String> = body
                .entries
                .iter()
                .filter(|(_, record)| record.dependency_files.iter().any(|p| invalidating.contains(p)))
                .map(|(key, _)| key.clone())
                .collect();

            for key in &affected {
                invalidate(key)?;
                body.entries.remove(key);
            }
            change_set.affected_entries = affected.into_iter().collect();
        }

        Ok(change_set)
    }
}

fn update_signature(body: &mut IndexBody, path: &Path, signature: FileSignature) {
    for record in body.entries.values_mut() {
        if record.dependency_files.contains(path) {
            record.last_known_signature.insert(path.to_path_buf(), signature);
        }
    }
}

fn classify(path: &Path, old: Option<&FileSignature>) -> Result<PathStatus> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(if old.is_some() { PathStatus::Deleted } else { PathStatus::Unchanged });
        }
        Err(e) => return Err(e.into()),
    };

    let old = match old {
        Some(old) => old,
        None => return Ok(PathStatus::Added(FileSignature::compute(path)?)),
    };

    let modified_time = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(old.modified_time);

    if old.size == meta.len() && old.modified_time == modified_time {
        return Ok(PathStatus::Unchanged);
    }

    let fresh = FileSignature::compute(path)?;
    if fresh.content_hash_prefix == old.content_hash_prefix {
        Ok(PathStatus::TouchOnly(fresh))
    } else {
        Ok(PathStatus::Modified(fresh))
    }
}

fn parse_body(text: &str) -> Option<IndexBody> {
    let mut lines = text.splitn(2, '\n');
    let header = lines.next()?;
    let rest = lines.next().unwrap_or("");
    let version: u32 = header.strip_prefix("VERSION ")?.trim().parse().ok()?;
    if version != INDEX_VERSION {
        return None;
    }
    serde_json::from_str(rest).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &tempfile::TempDir, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn unrelated_change_detects_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write(&tmp, "a.cs", b"one");
        let index = DependencyIndex::load(tmp.path().join("deps.idx")).unwrap();
        index.register("k1", HashSet::from([path]));

        let mut invalidated = Vec::new();
        let change_set = index.detect_changes(|key| { invalidated.push(key.to_string()); Ok(()) }).unwrap();
        assert!(change_set.is_empty());
        assert!(invalidated.is_empty());
    }

    #[test]
    fn editing_a_dependency_invalidates_its_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write(&tmp, "a.cs", b"one");
        let index = DependencyIndex::load(tmp.path().join("deps.idx")).unwrap();
        index.register("k1", HashSet::from([path.clone()]));

        std::fs::write(&path, b"two different length content").unwrap();
        let mut invalidated = Vec::new();
        let change_set = index.detect_changes(|key| { invalidated.push(key.to_string()); Ok(()) }).unwrap();

        assert!(change_set.modified.contains(&path));
        assert_eq!(change_set.affected_entries, HashSet::from(["k1".to_string()]));
        assert_eq!(invalidated, vec!["k1".to_string()]);
        assert!(index.dependents_of(&path).is_empty());
    }

    #[test]
    fn deleting_a_dependency_invalidates_immediately() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write(&tmp, "a.cs", b"one");
        let index = DependencyIndex::load(tmp.path().join("deps.idx")).unwrap();
        index.register("k1", HashSet::from([path.clone()]));
        std::fs::remove_file(&path).unwrap();

        let change_set = index.detect_changes(|_| Ok(())).unwrap();
        assert!(change_set.deleted.contains(&path));
        assert_eq!(change_set.affected_entries.len(), 1);
    }

    #[test]
    fn a_file_added_later_is_reported_but_does_not_invalidate() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("new.cs");
        let index = DependencyIndex::load(tmp.path().join("deps.idx")).unwrap();
        index.register("k1", HashSet::from([path.clone()]));

        std::fs::write(&path, b"now it exists").unwrap();
        let change_set = index.detect_changes(|_| Ok(())).unwrap();
        assert!(change_set.added.contains(&path));
        assert!(change_set.affected_entries.is_empty());
    }

    #[test]
    fn flush_then_reload_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write(&tmp, "a.cs", b"one");
        let index_path = tmp.path().join("index/deps.idx");
        let index = DependencyIndex::load(index_path.clone()).unwrap();
        index.register("k1", HashSet::from([path.clone()]));
        index.flush().unwrap();

        let reloaded = DependencyIndex::load(index_path).unwrap();
        assert_eq!(reloaded.dependents_of(&path), vec!["k1".to_string()]);
    }

    #[test]
    fn unknown_version_is_treated_as_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let index_path = tmp.path().join("deps.idx");
        std::fs::write(&index_path, "VERSION 99\n{}").unwrap();
        let index = DependencyIndex::load(index_path).unwrap();
        assert!(index.tracked_paths().is_empty());
    }
}
