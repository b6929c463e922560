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

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use testcache_core::Fingerprint;

/// A single source file's path (relative to the project root) and the
/// content hash used to detect edits to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFileHash {
    pub relative_path: PathBuf,
    pub content_hash: Fingerprint,
}

/// A referenced assembly/package. `content_hash` is `None` when the
/// reference could not be resolved to a concrete artifact (still tracked,
/// since an unresolved reference becoming resolvable is itself a change).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyReference {
    pub identifier: String,
    pub content_hash: Option<Fingerprint>,
}

/// Cached metadata about one project: its source file set, its resolved
/// references, and the content hash that is the sole signal for whether
/// this entry is still valid (§4.C).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectEntry {
    pub project_path: PathBuf,
    pub target_framework: String,
    /// Sorted by `relative_path`.
    pub source_files: Vec<SourceFileHash>,
    /// Sorted by `identifier`.
    pub referenced_assemblies: Vec<AssemblyReference>,
    pub content_hash: Fingerprint,
    pub created_at: u64,
}
