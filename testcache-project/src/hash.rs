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

use crate::entry::{AssemblyReference, SourceFileHash};
use testcache_core::Fingerprint;

/// The §4.C content hash: a canonical serialization of
/// `(target_framework, sorted source file list, sorted assembly references)`
/// fed through [`Fingerprint::derive`]. Deterministic across machines given
/// the same inputs, since every part is length-prefixed and inputs are
/// required to already be sorted by the caller.
pub fn content_hash(
    target_framework: &str,
    source_files: &[SourceFileHash],
    referenced_assemblies: &[AssemblyReference],
) -> Fingerprint {
    let mut parts: Vec<Vec<u8>> = Vec::with_capacity(1 + source_files.len() + referenced_assemblies.len());
    parts.push(target_framework.as_bytes().to_vec());
    for file in source_files {
        let mut part = file.relative_path.to_string_lossy().into_owned().into_bytes();
        part.push(0);
        part.extend_from_slice(file.content_hash.to_hex().as_bytes());
        parts.push(part);
    }
    for reference in referenced_assemblies {
        let mut part = reference.identifier.clone().into_bytes();
        part.push(0);
        match &reference.content_hash {
            Some(hash) => part.extend_from_slice(hash.to_hex().as_bytes()),
            None => part.extend_from_slice(b"unresolved"),
        }
        parts.push(part);
    }
    Fingerprint::derive("project", &parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn file(path: &str, hash: &str) -> SourceFileHash {
        SourceFileHash {
            relative_path: PathBuf::from(path),
            content_hash: Fingerprint::of("source-file", hash.as_bytes()),
        }
    }

    #[test]
    fn same_inputs_same_hash() {
        let files = vec![file("a.rs", "a")];
        let a = content_hash("net8.0", &files, &[]);
        let b = content_hash("net8.0", &files, &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn a_different_file_hash_changes_the_content_hash() {
        let before = content_hash("net8.0", &[file("a.rs", "a")], &[]);
        let after = content_hash("net8.0", &[file("a.rs", "changed")], &[]);
        assert_ne!(before, after);
    }

    #[test]
    fn framework_participates_in_the_hash() {
        let files = vec![file("a.rs", "a")];
        let net8 = content_hash("net8.0", &files, &[]);
        let net9 = content_hash("net9.0", &files, &[]);
        assert_ne!(net8, net9);
    }

    #[test]
    fn unresolved_and_resolved_references_differ() {
        let resolved = AssemblyReference {
            identifier: "System.Core".into(),
            content_hash: Some(Fingerprint::of("blob", b"x")),
        };
        let unresolved = AssemblyReference { identifier: "System.Core".into(), content_hash: None };
        let a = content_hash("net8.0", &[], std::slice::from_ref(&resolved));
        let b = content_hash("net8.0", &[], std::slice::from_ref(&unresolved));
        assert_ne!(a, b);
    }
}
