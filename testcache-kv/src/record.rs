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

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use testcache_core::Error;

/// The envelope stored in the blob store for every KV entry. Carries the
/// caller's schema version so a breaking change to a value's shape surfaces
/// as a clean miss (`Error::SchemaMismatch`) instead of a garbled decode.
#[derive(Serialize, Deserialize)]
struct Envelope {
    schema_version: u32,
    payload: Vec<u8>,
}

/// Encode `value` under `schema_version` for storage.
pub fn encode<T: Serialize>(schema_version: u32, value: &T) -> Result<Vec<u8>, Error> {
    let payload = bincode::serialize(value).map_err(|e| Error::Corrupt(e.to_string()))?;
    let envelope = Envelope { schema_version, payload };
    bincode::serialize(&envelope).map_err(|e| Error::Corrupt(e.to_string()))
}

/// Decode a value previously written by [`encode`], checking that its
/// schema version matches `expected_schema_version`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8], expected_schema_version: u32) -> Result<T, Error> {
    let envelope: Envelope =
        bincode::deserialize(bytes).map_err(|e| Error::Corrupt(e.to_string()))?;
    if envelope.schema_version != expected_schema_version {
        return Err(Error::SchemaMismatch {
            on_disk: envelope.schema_version,
            expected: expected_schema_version,
        });
    }
    bincode::deserialize(&envelope.payload).map_err(|e| Error::Corrupt(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips() {
        let bytes = encode(1, &"hello".to_string()).unwrap();
        let decoded: String = decode(&bytes, 1).unwrap();
        assert_eq!(decoded, "hello");
    }

    #[test]
    fn mismatched_schema_version_is_rejected() {
        let bytes = encode(1, &42i32).unwrap();
        let err = decode::<i32>(&bytes, 2).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { on_disk: 1, expected: 2 }));
    }
}
