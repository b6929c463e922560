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

//! On-disk pointer files mapping a logical KV key to the blob store
//! fingerprint holding its value, plus the schema version it was written
//! with. Kept separate from the blob itself since many logical keys can
//! point at entries that otherwise dedup in the blob store.

use std::io::Write as _;
use std::path::Path;
use testcache_core::{Error, Fingerprint};

const POINTER_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct Pointer {
    pub fingerprint: Fingerprint,
    pub schema_version: u32,
    /// The original logical key, hex-encoded on disk so `=`/newlines in the
    /// key itself can't corrupt the line format. Lets `rebuild_index` in
    /// [`crate::KvCache`] recover the key -> pointer mapping after restart.
    pub key: String,
}

impl Pointer {
    pub fn read_from(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(path.display().to_string())
            } else {
                Error::IoError(e)
            }
        })?;
        let mut lines = text.lines();
        let header = lines
            .next()
            .ok_or_else(|| Error::Corrupt("empty pointer file".into()))?;
        let version: u32 = header
            .strip_prefix("VERSION ")
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(|| Error::Corrupt(format!("bad pointer header: {header}")))?;
        if version != POINTER_VERSION {
            return Err(Error::SchemaMismatch { on_disk: version, expected: POINTER_VERSION });
        }

        let mut fingerprint = None;
        let mut schema_version = None;
        let mut key = None;
        for line in lines {
            let (field, value) = line
                .split_once('=')
                .ok_or_else(|| Error::Corrupt(format!("bad pointer line: {line}")))?;
            match field {
                "fingerprint" => fingerprint = Fingerprint::from_hex(value).ok(),
                "schema_version" => schema_version = value.parse().ok(),
                "key_hex" => {
                    key = hex::decode(value)
                        .ok()
                        .and_then(|b| String::from_utf8(b).ok())
                }
                _ => {}
            }
        }

        Ok(Pointer {
            fingerprint: fingerprint.ok_or_else(|| Error::Corrupt("pointer missing fingerprint".into()))?,
            schema_version: schema_version
                .ok_or_else(|| Error::Corrupt("pointer missing schema_version".into()))?,
            key: key.ok_or_else(|| Error::Corrupt("pointer missing key".into()))?,
        })
    }

    pub fn write_atomic(&self, path: &Path) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("ptr.tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            write!(
                file,
                "VERSION {}\nfingerprint={}\nschema_version={}\nkey_hex={}\n",
                POINTER_VERSION,
                self.fingerprint.to_hex(),
                self.schema_version,
                hex::encode(self.key.as_bytes()),
            )?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
