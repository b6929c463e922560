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

//! Testcache Project
//!
//! Layer C: caches a project's source file set, resolved references, and
//! inferred target framework, gated by a single content hash (§4.C).

mod cache;
mod entry;
mod hash;
mod scan;

pub use cache::ProjectCache;
pub use entry::{AssemblyReference, ProjectEntry, SourceFileHash};
pub use hash::content_hash;
