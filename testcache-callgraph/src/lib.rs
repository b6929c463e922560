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

//! Testcache Callgraph
//!
//! Layer D: persists forward and reverse call graphs keyed by a project
//! and the exact dependency surface used to build them, re-validating
//! structural integrity (forward/reverse transpose) on every read (§4.D).

mod cache;
mod entry;
mod method_id;
mod validate;

pub use cache::CallGraphCache;
pub use entry::{AdjacencyMap, CallGraphEntry, CallGraphStats};
pub use method_id::MethodId;
pub use validate::is_structurally_valid;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use testcache_blobstore::BlobStore;
    use testcache_core::Config;
    use testcache_kv::KvCache;
    use testcache_project::AssemblyReference;

    fn open(dir: &tempfile::TempDir) -> CallGraphCache {
        let mut config = Config::new(dir.path());
        config.max_cache_bytes = 16 * 1024 * 1024;
        let blobstore = Arc::new(BlobStore::open(config.clone()).unwrap());
        let kv = Arc::new(KvCache::open(&config, blobstore).unwrap());
        CallGraphCache::new(kv, "roslyn-4.9")
    }

    fn graph(pairs: &[(&str, &str)]) -> (AdjacencyMap, AdjacencyMap) {
        let mut forward: AdjacencyMap = HashMap::new();
        let mut reverse: AdjacencyMap = HashMap::new();
        for (a, b) in pairs {
            forward.entry(MethodId::new(*a)).or_default().insert(MethodId::new(*b));
            reverse.entry(MethodId::new(*b)).or_default().insert(MethodId::new(*a));
        }
        (forward, reverse)
    }

    #[test]
    fn valid_graph_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir);
        let project = std::path::Path::new("/proj/a.csproj");
        let refs = [AssemblyReference { identifier: "System.Core".into(), content_hash: None }];
        let (forward, reverse) = graph(&[("Main", "Helper"), ("Main", "Other")]);

        cache.store(project, &refs, forward.clone(), reverse, Duration::from_millis(50)).unwrap();
        let fetched = cache.get(project, &refs).unwrap().unwrap();
        assert_eq!(fetched.call_graph, forward);
        assert_eq!(fetched.build_time_ms, 50);
    }

    #[test]
    fn a_different_assembly_set_misses() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir);
        let project = std::path::Path::new("/proj/a.csproj");
        let (forward, reverse) = graph(&[("Main", "Helper")]);
        cache.store(project, &[], forward, reverse, Duration::from_millis(1)).unwrap();

        let other_refs = [AssemblyReference { identifier: "Newtonsoft.Json".into(), content_hash: None }];
        assert!(cache.get(project, &other_refs).unwrap().is_none());
    }

    #[test]
    fn a_broken_transpose_is_rejected_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir);
        let project = std::path::Path::new("/proj/a.csproj");

        let mut forward: AdjacencyMap = HashMap::new();
        forward.entry(MethodId::new("Main")).or_default().insert(MethodId::new("Helper"));
        let reverse: AdjacencyMap = HashMap::new(); // missing Helper -> Main

        cache.store(project, &[], forward, reverse, Duration::from_millis(1)).unwrap();
        assert!(cache.get(project, &[]).unwrap().is_none());
        assert_eq!(cache.invalidation_count(), 1);
    }

    #[test]
    fn invalidate_removes_every_assembly_set_variant() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir);
        let project = std::path::Path::new("/proj/a.csproj");
        let (f1, r1) = graph(&[("A", "B")]);
        let other_refs = [AssemblyReference { identifier: "X".into(), content_hash: None }];
        cache.store(project, &[], f1, r1, Duration::from_millis(1)).unwrap();
        let (f2, r2) = graph(&[("C", "D")]);
        cache.store(project, &other_refs, f2, r2, Duration::from_millis(1)).unwrap();

        assert!(cache.get(project, &[]).unwrap().is_some());
        assert!(cache.get(project, &other_refs).unwrap().is_some());

        let removed = cache.invalidate(project).unwrap();
        assert_eq!(removed, 2);
        assert!(cache.get(project, &[]).unwrap().is_none());
        assert!(cache.get(project, &other_refs).unwrap().is_none());
    }

    #[test]
    fn statistics_report_fan_out_and_density() {
        let (forward, reverse) = graph(&[("A", "B"), ("A", "C"), ("B", "C")]);
        let entry = CallGraphEntry {
            project_path: "/proj".into(),
            compiler_version: "1.0".into(),
            dependency_hashes: HashMap::new(),
            call_graph: forward,
            reverse_call_graph: reverse,
            build_time_ms: 0,
            created_at: 0,
        };
        let stats = entry.statistics();
        assert_eq!(stats.total_methods, 3);
        assert_eq!(stats.total_edges, 3);
        assert_eq!(stats.max_fan_out, 2);
    }
}
