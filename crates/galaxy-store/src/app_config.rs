//! AppConfig — the versioned deployable configuration of one app.
//!
//! Every mutation bumps a persisted `revision` counter, and [`AppConfig::id`]
//! puts that counter in the high bits. Two records of the same app can
//! therefore be ordered by `id` alone, even when their content hashes
//! collide. The low 20 bits come from a SHA-256 over the content and only
//! keep ids of unrelated records apart.
//!
//! Revisions are bounded by [`MAX_REVISION`] so they fit above those 20
//! bits; larger values are rejected on load and increments stop there.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{StoreError, StoreResult};

/// Bits of the content hash kept in the low part of an id.
const HASH_BITS: u32 = 20;
const HASH_MASK: u64 = (1 << HASH_BITS) - 1;

/// Largest revision that survives the shift into an id.
pub const MAX_REVISION: u64 = u64::MAX >> HASH_BITS;

// Persisted hash field names.
const FIELD_NAME: &str = "name";
const FIELD_VERSION: &str = "version";
const FIELD_ENVIRONMENT: &str = "environment";
const FIELD_PORTS: &str = "ports";
const FIELD_REVISION: &str = "revision";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    name: String,
    /// Image reference being deployed, e.g. `registry.foo.com/foobar:abc234`.
    #[serde(default)]
    version: String,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    ports: BTreeMap<String, String>,
    #[serde(default = "first_revision", deserialize_with = "bounded_revision")]
    revision: u64,
}

fn first_revision() -> u64 {
    1
}

fn check_revision(revision: u64) -> Result<u64, String> {
    if revision > MAX_REVISION {
        return Err(format!("revision {revision} exceeds {MAX_REVISION}"));
    }
    Ok(revision)
}

fn bounded_revision<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    check_revision(u64::deserialize(deserializer)?).map_err(serde::de::Error::custom)
}

impl AppConfig {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            env: BTreeMap::new(),
            ports: BTreeMap::new(),
            revision: first_revision(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// The image reference. Same value as [`Self::version`].
    pub fn image(&self) -> &str {
        &self.version
    }

    pub fn set_version(&mut self, version: impl Into<String>) {
        self.version = version.into();
        self.bump();
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn env_get(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    pub fn env_set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.insert(key.into(), value.into());
        self.bump();
    }

    /// Remove a variable. Returns whether it was set; the revision advances
    /// either way.
    pub fn env_unset(&mut self, key: &str) -> bool {
        let existed = self.env.remove(key).is_some();
        self.bump();
        existed
    }

    /// Port → protocol bindings. Legacy; kept for records that still carry them.
    pub fn ports(&self) -> &BTreeMap<String, String> {
        &self.ports
    }

    pub fn add_port(&mut self, port: impl Into<String>, protocol: impl Into<String>) {
        self.ports.insert(port.into(), protocol.into());
        self.bump();
    }

    pub fn clear_ports(&mut self) {
        self.ports.clear();
        self.bump();
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Move the revision strictly past `floor` if it is not already.
    ///
    /// Used when a record from elsewhere (a backup) replaces a stored one,
    /// so the replacement still orders after what readers have seen.
    pub fn advance_revision_past(&mut self, floor: u64) {
        if self.revision <= floor {
            self.revision = floor.saturating_add(1).min(MAX_REVISION);
        }
    }

    fn bump(&mut self) {
        self.revision = self.revision.saturating_add(1).min(MAX_REVISION);
    }

    fn content_digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.version.as_bytes());
        hasher.update([0u8]);
        for (key, value) in &self.env {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update([1u8]);
        for (port, protocol) in &self.ports {
            hasher.update(port.as_bytes());
            hasher.update(b"/");
            hasher.update(protocol.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(self.revision.to_be_bytes());
        hasher.finalize().into()
    }

    /// Short hex fingerprint of the current content, for logs and listings.
    pub fn digest(&self) -> String {
        hex::encode(&self.content_digest()[..6])
    }

    /// Identifier of this exact configuration. Recomputed on every call.
    pub fn id(&self) -> u64 {
        let digest = self.content_digest();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        (self.revision << HASH_BITS) | (u64::from_be_bytes(head) & HASH_MASK)
    }

    /// `{name}_{id}`: a distinct container identity per configuration.
    pub fn container_name(&self) -> String {
        format!("{}_{}", self.name, self.id())
    }

    /// Hash fields as persisted under the app key.
    pub fn to_fields(&self) -> StoreResult<HashMap<String, String>> {
        let json = |value: &BTreeMap<String, String>| {
            serde_json::to_string(value).map_err(|e| StoreError::Serialize(e.to_string()))
        };
        Ok(HashMap::from([
            (FIELD_NAME.to_string(), self.name.clone()),
            (FIELD_VERSION.to_string(), self.version.clone()),
            (FIELD_ENVIRONMENT.to_string(), json(&self.env)?),
            (FIELD_PORTS.to_string(), json(&self.ports)?),
            (FIELD_REVISION.to_string(), self.revision.to_string()),
        ]))
    }

    /// Rebuild from persisted hash fields. Missing optional fields take
    /// their defaults; a missing name or a malformed value is an error.
    pub fn from_fields(fields: &HashMap<String, String>) -> StoreResult<Self> {
        let name = fields
            .get(FIELD_NAME)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| StoreError::Deserialize("app config has no name".to_string()))?;
        let json = |field: &str| -> StoreResult<BTreeMap<String, String>> {
            match fields.get(field).filter(|raw| !raw.is_empty()) {
                Some(raw) => serde_json::from_str(raw)
                    .map_err(|e| StoreError::Deserialize(format!("{name}.{field}: {e}"))),
                None => Ok(BTreeMap::new()),
            }
        };
        let revision = match fields.get(FIELD_REVISION) {
            Some(raw) => raw
                .parse()
                .map_err(|_| format!("invalid value {raw:?}"))
                .and_then(check_revision)
                .map_err(|e| StoreError::Deserialize(format!("{name}.{FIELD_REVISION}: {e}")))?,
            None => first_revision(),
        };

        Ok(Self {
            name: name.clone(),
            version: fields.get(FIELD_VERSION).cloned().unwrap_or_default(),
            env: json(FIELD_ENVIRONMENT)?,
            ports: json(FIELD_PORTS)?,
            revision,
        })
    }
}
