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

//! Content-addressed fingerprints.
//!
//! A `Fingerprint` is a BLAKE3 digest over a label and an ordered list of
//! byte parts. Every layer derives its on-disk keys this way: the blob
//! store fingerprints raw payloads, the project cache fingerprints sorted
//! file hashes plus framework metadata, and the coordinator fingerprints
//! a solution's dependency set.

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A 32-byte BLAKE3 digest, rendered as lowercase hex for on-disk names.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; 32]);

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Fingerprint::from_hex(&s).map_err(D::Error::custom)
    }
}

impl Fingerprint {
    /// Derive a fingerprint from a label (the logical kind of thing being
    /// hashed, e.g. `"blob"`, `"project"`, `"callgraph"`) and an ordered
    /// sequence of byte parts. Order matters: callers that want an
    /// order-independent fingerprint must sort their parts first.
    pub fn derive<I, P>(label: &str, parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        let mut hasher = blake3::Hasher::new();
        hasher.update(label.as_bytes());
        hasher.update(&[0u8]); // separator between label and parts
        for part in parts {
            let bytes = part.as_ref();
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        }
        Fingerprint(*hasher.finalize().as_bytes())
    }

    /// Fingerprint of a single byte slice under `label`.
    pub fn of(label: &str, bytes: impl AsRef<[u8]>) -> Self {
        Self::derive(label, std::iter::once(bytes))
    }

    /// Raw 32-byte digest.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full lowercase hex encoding, used as the on-disk file stem.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First `n` hex characters, used for shard directory names.
    pub fn shard_prefix(&self, n: usize) -> String {
        let hex = self.to_hex();
        hex[..n.min(hex.len())].to_string()
    }

    /// Parse a fingerprint back from its hex encoding.
    pub fn from_hex(s: &str) -> Result<Self, crate::Error> {
        let bytes = hex::decode(s).map_err(|e| crate::Error::Corrupt(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| crate::Error::Corrupt(format!("fingerprint hex wrong length: {s}")))?;
        Ok(Fingerprint(arr))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Deriving from the same label and bytes twice always agrees, no
        /// matter what the bytes are (§8 determinism).
        #[test]
        fn derive_is_deterministic(label in "[a-z]{1,16}", bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let a = Fingerprint::derive(&label, std::iter::once(bytes.as_slice()));
            let b = Fingerprint::derive(&label, std::iter::once(bytes.as_slice()));
            prop_assert_eq!(a, b);
        }

        /// Hex round-trips for every fingerprint, not just hand-picked ones.
        #[test]
        fn hex_round_trips_for_arbitrary_input(label in "[a-z]{1,16}", bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let fp = Fingerprint::derive(&label, std::iter::once(bytes.as_slice()));
            let parsed = Fingerprint::from_hex(&fp.to_hex()).unwrap();
            prop_assert_eq!(fp, parsed);
        }

        /// Distinct byte payloads under the same label essentially never
        /// collide - a length-prefixed single-part digest is injective in
        /// practice for BLAKE3's collision resistance.
        #[test]
        fn distinct_bytes_rarely_collide(a in proptest::collection::vec(any::<u8>(), 0..64), b in proptest::collection::vec(any::<u8>(), 0..64)) {
            prop_assume!(a != b);
            let fa = Fingerprint::of("x", &a);
            let fb = Fingerprint::of("x", &b);
            prop_assert_ne!(fa, fb);
        }
    }
}
