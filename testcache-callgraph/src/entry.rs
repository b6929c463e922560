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

use crate::method_id::MethodId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use testcache_core::Fingerprint;

pub type AdjacencyMap = HashMap<MethodId, HashSet<MethodId>>;

/// A stored forward+reverse call graph for one project, keyed by the exact
/// dependency surface used to build it (§3 CallGraphEntry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallGraphEntry {
    pub project_path: PathBuf,
    pub compiler_version: String,
    /// Assembly identifier -> content hash, the dependency surface this
    /// graph was computed against.
    pub dependency_hashes: HashMap<String, Fingerprint>,
    pub call_graph: AdjacencyMap,
    pub reverse_call_graph: AdjacencyMap,
    pub build_time_ms: u64,
    pub created_at: u64,
}

/// Aggregate statistics over a [`CallGraphEntry`] (§4.D `statistics`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallGraphStats {
    pub total_methods: usize,
    pub total_edges: usize,
    pub average_fan_out: f64,
    pub max_fan_out: usize,
    pub graph_density: f64,
}

impl CallGraphEntry {
    /// Compute §4.D statistics over this entry's forward graph.
    pub fn statistics(&self) -> CallGraphStats {
        let mut methods: HashSet<&MethodId> = HashSet::new();
        for (caller, callees) in &self.call_graph {
            methods.insert(caller);
            methods.extend(callees.iter());
        }

        let total_methods = methods.len();
        let total_edges: usize = self.call_graph.values().map(HashSet::len).sum();
        let max_fan_out = self.call_graph.values().map(HashSet::len).max().unwrap_or(0);
        let average_fan_out = if self.call_graph.is_empty() {
            0.0
        } else {
            total_edges as f64 / self.call_graph.len() as f64
        };
        let graph_density = if total_methods > 1 {
            total_edges as f64 / (total_methods as f64 * (total_methods as f64 - 1.0))
        } else {
            0.0
        };

        CallGraphStats { total_methods, total_edges, average_fan_out, max_fan_out, graph_density }
    }
}
