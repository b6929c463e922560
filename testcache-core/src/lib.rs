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

//! Testcache Core
//!
//! Shared foundations for the caching layers: configuration, the crate-wide
//! error taxonomy, content-addressed fingerprints, and the resilience
//! primitives (retry backoff, deadline helper) the KV cache and solution
//! coordinator build their `*_with_deadline` operations on (§5 "Timeouts").

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod resilience;

pub use config::{CompressionAlgorithm, CompressionMode, Config, FileWatchMode};
pub use error::{Error, Result};
pub use fingerprint::Fingerprint;
pub use resilience::{with_deadline, RetryPolicy};
