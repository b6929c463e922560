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

//! The call-graph cache (Layer D): persists forward+reverse call graphs
//! over the KV layer, validating structural integrity on every read.

use crate::entry::{AdjacencyMap, CallGraphEntry};
use crate::validate;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use testcache_core::{Fingerprint, Result};
use testcache_kv::KvCache;
use testcache_project::AssemblyReference;

const SCHEMA_VERSION: u32 = 1;

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// The §4.D key is `hash(project_path || sorted(assemblies) || compiler_version)`.
/// We render it as `callgraph::<project_path>::<fingerprint of the rest>`
/// rather than a bare fingerprint: the project path stays human-readable in
/// the logical key so `invalidate` can remove every assembly-set variant
/// for a project with one prefix match, the same trick [`testcache_project::ProjectCache`]
/// uses for its per-framework entries. The fingerprint still folds in
/// `project_path` itself, so this is not a weaker key - just a more legible
/// encoding of the same hash.
fn cache_key(project_path: &Path, referenced_assemblies: &[AssemblyReference], compiler_version: &str) -> String {
    format!(
        "callgraph::{}::{}",
        project_path.to_string_lossy(),
        dependency_fingerprint(project_path, referenced_assemblies, compiler_version).to_hex(),
    )
}

fn key_prefix(project_path: &Path) -> String {
    format!("callgraph::{}::", project_path.to_string_lossy())
}

fn dependency_fingerprint(
    project_path: &Path,
    referenced_assemblies: &[AssemblyReference],
    compiler_version: &str,
) -> Fingerprint {
    let mut sorted: Vec<&AssemblyReference> = referenced_assemblies.iter().collect();
    sorted.sort_by(|a, b| a.identifier.cmp(&b.identifier));

    let mut parts: Vec<Vec<u8>> = Vec::with_capacity(2 + sorted.len());
    parts.push(project_path.to_string_lossy().into_owned().into_bytes());
    parts.push(compiler_version.as_bytes().to_vec());
    for reference in sorted {
        let mut part = reference.identifier.clone().into_bytes();
        part.push(0);
        match &reference.content_hash {
            Some(hash) => part.extend_from_slice(hash.to_hex().as_bytes()),
            None => part.extend_from_slice(b"unresolved"),
        }
        parts.push(part);
    }
    Fingerprint::derive("callgraph", &parts)
}

/// Caches forward and reverse call graphs over the KV layer (§4.D).
pub struct CallGraphCache {
    kv: Arc<KvCache>,
    compiler_version: String,
    invalidation_count: AtomicU64,
}

impl CallGraphCache {
    pub fn new(kv: Arc<KvCache>, compiler_version: impl Into<String>) -> Self {
        CallGraphCache { kv, compiler_version: compiler_version.into(), invalidation_count: AtomicU64::new(0) }
    }

    /// Number of entries deleted for failing structural validation on read
    /// (§8 scenario S3).
    pub fn invalidation_count(&self) -> u64 {
        self.invalidation_count.load(Ordering::Relaxed)
    }

    #[tracing::instrument(skip(self, call_graph, reverse_call_graph), fields(project_path = %project_path.display()))]
    pub fn store(
        &self,
        project_path: &Path,
        referenced_assemblies: &[AssemblyReference],
        call_graph: AdjacencyMap,
        reverse_call_graph: AdjacencyMap,
        build_time: Duration,
    ) -> Result<()> {
        let dependency_hashes = referenced_assemblies
            .iter()
            .filter_map(|r| r.content_hash.map(|h| (r.identifier.clone(), h)))
            .collect();

        let entry = CallGraphEntry {
            project_path: project_path.to_path_buf(),
            compiler_version: self.compiler_version.clone(),
            dependency_hashes,
            call_graph,
            reverse_call_graph,
            build_time_ms: build_time.as_millis() as u64,
            created_at: now_unix(),
        };

        let key = cache_key(project_path, referenced_assemblies, &self.compiler_version);
        self.kv.set(&key, SCHEMA_VERSION, &entry)
    }

    /// Fetch the call graph for `(project_path, referenced_assemblies)`.
    /// Runs structural validation on hit; a failing entry is deleted and
    /// treated as a miss (§3, §4.D, §8 S3).
    #[tracing::instrument(skip(self), fields(project_path = %project_path.display()))]
    pub fn get(&self, project_path: &Path, referenced_assemblies: &[AssemblyReference]) -> Result<Option<CallGraphEntry>> {
        let key = cache_key(project_path, referenced_assemblies, &self.compiler_version);
        let entry: CallGraphEntry = match self.kv.get(&key, SCHEMA_VERSION) {
            Ok(entry) => entry,
            Err(e) if e.is_self_healing() => return Ok(None),
            Err(e) => return Err(e),
        };

        if validate::is_structurally_valid(&entry) {
            Ok(Some(entry))
        } else {
            self.kv.invalidate(&key)?;
            self.invalidation_count.fetch_add(1, Ordering::Relaxed);
            Ok(None)
        }
    }

    /// Remove every cached graph for `project_path`, regardless of which
    /// assembly set it was keyed under (§4.D `invalidate`).
    pub fn invalidate(&self, project_path: &Path) -> Result<u64> {
        let prefix = key_prefix(project_path);
        self.kv.invalidate_matching(|key| key.starts_with(&prefix))
    }
}
