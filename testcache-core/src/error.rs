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

//! Crate-wide error taxonomy shared by every cache layer.
//!
//! `NotFound`, `Corrupt`, and `SchemaMismatch` are self-healing: callers
//! that see them from a layer's internal read path should treat the read
//! as a miss and recompute, not propagate a failure. `IoError`,
//! `QuotaExceeded`, `LoaderFailed`, `Timeout`, and `Cancelled` are
//! propagated to the caller unchanged.

use std::path::PathBuf;

/// The error type returned by every public operation in the cache.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No entry exists for the given key or fingerprint. Self-healing.
    #[error("not found: {0}")]
    NotFound(String),

    /// An entry exists on disk but failed to decode (bad header, truncated
    /// payload, checksum mismatch). Self-healing: treated as a miss.
    #[error("corrupt entry at {0}")]
    Corrupt(String),

    /// An entry's schema version does not match what the caller expects.
    /// Self-healing: treated as a miss so the caller recomputes.
    #[error("schema mismatch: on-disk version {on_disk}, expected {expected}")]
    SchemaMismatch { on_disk: u32, expected: u32 },

    /// Underlying filesystem I/O failed. Propagated.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// The cache's size budget is exhausted and eviction could not make
    /// room for the new entry. Propagated.
    #[error("quota exceeded: {used} bytes used, {limit} byte limit")]
    QuotaExceeded { used: u64, limit: u64 },

    /// A `get_or_compute` loader closure returned an error. Propagated,
    /// wrapping the loader's own error message.
    #[error("loader failed: {0}")]
    LoaderFailed(String),

    /// An operation did not complete before its deadline. Propagated.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// An operation was cancelled before completion. Propagated.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// True for the self-healing variants: callers on an internal read
    /// path should fall through to a cache miss rather than bubble this up.
    pub fn is_self_healing(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::Corrupt(_) | Error::SchemaMismatch { .. }
        )
    }

    /// Build a `Corrupt` error for a file at `path` with a short reason.
    pub fn corrupt_at(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Error::Corrupt(format!("{}: {}", path.into().display(), reason))
    }
}

/// Result alias used throughout the cache crates.
pub type Result<T> = std::result::Result<T, Error>;
