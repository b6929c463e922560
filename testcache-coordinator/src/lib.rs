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

//! Testcache Coordinator
//!
//! Layer E: a solution-scoped front door over the KV cache that adds
//! dependency-aware invalidation and file-system watching (§4.E).

mod change_set;
mod coordinator;
mod dependency_index;
mod signature;
mod watcher;

pub use change_set::ChangeSet;
pub use coordinator::SolutionCacheCoordinator;
pub use dependency_index::{DependencyIndex, DependencyRecord};
pub use signature::FileSignature;
