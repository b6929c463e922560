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

//! Structural integrity validation, enforced on every read (§3, §4.D).
//!
//! A single check - that `reverse_call_graph` is the exact transpose of
//! `call_graph` - subsumes all three invariants §3 lists: every forward
//! edge has a matching reverse edge, every reverse key is reachable from a
//! forward edge, and neither map carries an edge the other doesn't mirror.

use crate::entry::{AdjacencyMap, CallGraphEntry};
use std::collections::{HashMap, HashSet};

fn transpose(graph: &AdjacencyMap) -> AdjacencyMap {
    let mut out: AdjacencyMap = HashMap::new();
    for (caller, callees) in graph {
        for callee in callees {
            out.entry(callee.clone()).or_default().insert(caller.clone());
        }
    }
    out
}

/// True iff `entry.reverse_call_graph` is exactly the transpose of
/// `entry.call_graph` - no missing edges, no extra ones, no dangling keys.
pub fn is_structurally_valid(entry: &CallGraphEntry) -> bool {
    let expected_reverse = transpose(&entry.call_graph);
    // HashMap equality with HashSet<MethodId> values: present iff both
    // sides agree on every key's full neighbor set, including absent keys
    // (a key with an empty set on one side but missing on the other would
    // fail here, which is intentional - trailing empty adjacency lists are
    // never written by `store`).
    normalize_empty(&expected_reverse) == normalize_empty(&entry.reverse_call_graph)
}

/// Drop keys mapping to an empty set before comparing, so a forward graph
/// with an isolated node (present as a key with no callees) doesn't
/// spuriously disagree with a reverse graph that never recorded it.
fn normalize_empty(graph: &AdjacencyMap) -> HashMap<&crate::method_id::MethodId, &HashSet<crate::method_id::MethodId>> {
    graph.iter().filter(|(_, v)| !v.is_empty()).collect()
}
