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

//! Source file enumeration and reference resolution.
//!
//! The caching core doesn't ship a Roslyn-style analyzer (that's an
//! external producer per the crate's scope) - it just needs *some*
//! deterministic way to discover a project's inputs for hashing. We scan
//! `project_path` (a directory, or a manifest file whose parent is the
//! project root) for regular files, skipping VCS/build directories, and
//! resolve references from an optional `project.refs` manifest:
//! one `identifier[=content_hash_hex]` per line.

use crate::entry::{AssemblyReference, SourceFileHash};
use std::path::{Path, PathBuf};
use testcache_core::{Error, Fingerprint, Result};

const IGNORED_DIR_NAMES: &[&str] = &[".git", "target", "bin", "obj", "node_modules", ".svn"];
const REFS_MANIFEST: &str = "project.refs";

/// The directory a project's sources live under, given either the
/// directory itself or a manifest file inside it.
pub fn project_root(project_path: &Path) -> PathBuf {
    if project_path.is_file() {
        project_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| project_path.to_path_buf())
    } else {
        project_path.to_path_buf()
    }
}

/// Enumerate every regular file under `root`, hashing its contents.
/// Returns entries sorted by `relative_path` (§4.C "sorted by relative path").
pub fn hash_source_files(root: &Path) -> Result<Vec<SourceFileHash>> {
    let mut files = Vec::new();
    if root.exists() {
        walk(root, root, &mut files)?;
    }
    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(files)
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<SourceFileHash>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            let name = entry.file_name();
            if IGNORED_DIR_NAMES.iter().any(|ignored| name == *ignored) {
                continue;
            }
            walk(root, &path, out)?;
        } else if file_type.is_file() {
            if path.file_name().and_then(|n| n.to_str()) == Some(REFS_MANIFEST) {
                continue;
            }
            let bytes = std::fs::read(&path)?;
            let relative_path = path
                .strip_prefix(root)
                .map_err(|_| Error::Corrupt(format!("{} not under {}", path.display(), root.display())))?
                .to_path_buf();
            out.push(SourceFileHash {
                content_hash: Fingerprint::of("source-file", &bytes),
                relative_path,
            });
        }
    }
    Ok(())
}

/// Resolve referenced assemblies from `root/project.refs`, if present.
/// Absent manifest means no references. Returns entries sorted by
/// `identifier` (§4.C "sorted by identifier").
pub fn resolve_references(root: &Path) -> Result<Vec<AssemblyReference>> {
    let manifest = root.join(REFS_MANIFEST);
    if !manifest.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(&manifest)?;
    let mut refs: Vec<AssemblyReference> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| match line.split_once('=') {
            Some((identifier, hash_hex)) => AssemblyReference {
                identifier: identifier.trim().to_string(),
                content_hash: Fingerprint::from_hex(hash_hex.trim()).ok(),
            },
            None => AssemblyReference { identifier: line.to_string(), content_hash: None },
        })
        .collect();
    refs.sort_by(|a, b| a.identifier.cmp(&b.identifier));
    Ok(refs)
}
