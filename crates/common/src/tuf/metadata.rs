use std::collections::BTreeMap;

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{checksum, RoleName, TufError};
use crate::crypto::{KeyError, PublicKey};

const ED25519_KEYTYPE: &str = "ed25519";
const SHA256: &str = "sha256";

/// Default lifetime of freshly signed metadata for a role
pub fn default_expiry(role: &RoleName) -> DateTime<Utc> {
    let lifetime = match role.as_str() {
        "root" => Duration::days(365 * 10),
        "timestamp" => Duration::days(14),
        _ => Duration::days(365 * 3),
    };
    let expires = Utc::now() + lifetime;
    // whole seconds keep the encoded form stable across re-serialisation
    DateTime::from_timestamp(expires.timestamp(), 0).unwrap_or(expires)
}

/// A role body that can live inside a [`Signed`] envelope
pub trait RoleMeta: Serialize + DeserializeOwned + Clone {
    /// Value of the `_type` field
    const TYPE: &'static str;

    fn version(&self) -> u64;
    fn expires(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub keyid: String,
    pub method: String,
    /// base64 encoded signature over the canonical `signed` body
    pub sig: String,
}

/// The signed metadata envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signed<T> {
    pub signed: T,
    pub signatures: Vec<Signature>,
}

impl<T: RoleMeta> Signed<T> {
    /// Decode and type-check a metadata blob
    pub fn from_bytes(data: &[u8]) -> Result<Self, TufError> {
        let raw: Signed<serde_json::Value> = serde_json::from_slice(data)?;
        let common: SignedCommon = serde_json::from_value(raw.signed.clone())?;
        if common.type_ != T::TYPE {
            return Err(TufError::TypeMismatch {
                expected: T::TYPE.to_string(),
                found: common.type_,
            });
        }
        Ok(Signed {
            signed: serde_json::from_value(raw.signed)?,
            signatures: raw.signatures,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, TufError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// The fields every role body shares; used to peek at metadata without
///  knowing its role up front.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedCommon {
    #[serde(rename = "_type")]
    pub type_: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
}

/// Public key material as TUF serialises it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TufKey {
    pub keytype: String,
    pub keyval: KeyVal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVal {
    /// base64 encoded public key bytes
    pub public: String,
}

impl TufKey {
    pub fn from_public(key: &PublicKey) -> Self {
        Self {
            keytype: ED25519_KEYTYPE.to_string(),
            keyval: KeyVal {
                public: base64::engine::general_purpose::STANDARD.encode(key.to_bytes()),
            },
        }
    }

    pub fn key_id(&self) -> Result<String, KeyError> {
        Ok(self.public_key()?.key_id())
    }

    pub fn public_key(&self) -> Result<PublicKey, KeyError> {
        if self.keytype != ED25519_KEYTYPE {
            return Err(KeyError::Unsupported(self.keytype.clone()));
        }
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&self.keyval.public)
            .map_err(|e| KeyError::Decode(e.to_string()))?;
        PublicKey::try_from(bytes.as_slice())
    }
}

/// Key ids and signature threshold for a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleKeys {
    pub keyids: Vec<String>,
    pub threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootMeta {
    #[serde(rename = "_type")]
    pub type_: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    #[serde(default)]
    pub consistent_snapshot: bool,
    pub keys: BTreeMap<String, TufKey>,
    pub roles: BTreeMap<String, RoleKeys>,
}

impl RootMeta {
    pub fn new(version: u64) -> Self {
        Self {
            type_: Self::TYPE.to_string(),
            version,
            expires: default_expiry(&RoleName::root()),
            consistent_snapshot: false,
            keys: BTreeMap::new(),
            roles: BTreeMap::new(),
        }
    }

    /// Register `keys` as the signers of `role` with the given threshold
    pub fn set_role_keys(
        &mut self,
        role: &RoleName,
        keys: &[PublicKey],
        threshold: u32,
    ) -> &mut Self {
        let mut keyids = Vec::with_capacity(keys.len());
        for key in keys {
            let id = key.key_id();
            self.keys.insert(id.clone(), TufKey::from_public(key));
            keyids.push(id);
        }
        self.roles
            .insert(role.to_string(), RoleKeys { keyids, threshold });
        self
    }

    pub fn role_keys(&self, role: &RoleName) -> Option<&RoleKeys> {
        self.roles.get(role.as_str())
    }
}

impl RoleMeta for RootMeta {
    const TYPE: &'static str = "Root";

    fn version(&self) -> u64 {
        self.version
    }

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegatedRole {
    pub name: String,
    pub keyids: Vec<String>,
    pub threshold: u32,
    #[serde(default)]
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Delegations {
    pub keys: BTreeMap<String, TufKey>,
    pub roles: Vec<DelegatedRole>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetsMeta {
    #[serde(rename = "_type")]
    pub type_: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    #[serde(default)]
    pub targets: BTreeMap<String, FileMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegations: Option<Delegations>,
}

impl TargetsMeta {
    pub fn new(version: u64) -> Self {
        Self {
            type_: Self::TYPE.to_string(),
            version,
            expires: default_expiry(&RoleName::targets()),
            targets: BTreeMap::new(),
            delegations: None,
        }
    }

    pub fn delegation(&self, name: &RoleName) -> Option<&DelegatedRole> {
        self.delegations
            .as_ref()?
            .roles
            .iter()
            .find(|role| role.name == name.as_str())
    }
}

impl RoleMeta for TargetsMeta {
    const TYPE: &'static str = "Targets";

    fn version(&self) -> u64 {
        self.version
    }

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    #[serde(rename = "_type")]
    pub type_: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub meta: BTreeMap<String, FileMeta>,
}

impl SnapshotMeta {
    pub fn new(version: u64) -> Self {
        Self {
            type_: Self::TYPE.to_string(),
            version,
            expires: default_expiry(&RoleName::snapshot()),
            meta: BTreeMap::new(),
        }
    }
}

impl RoleMeta for SnapshotMeta {
    const TYPE: &'static str = "Snapshot";

    fn version(&self) -> u64 {
        self.version
    }

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampMeta {
    #[serde(rename = "_type")]
    pub type_: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub meta: BTreeMap<String, FileMeta>,
}

impl TimestampMeta {
    pub fn new(version: u64) -> Self {
        Self {
            type_: Self::TYPE.to_string(),
            version,
            expires: default_expiry(&RoleName::timestamp()),
            meta: BTreeMap::new(),
        }
    }

    /// The snapshot this timestamp vouches for
    pub fn snapshot(&self) -> Option<&FileMeta> {
        self.meta.get(super::SNAPSHOT_ROLE)
    }
}

impl RoleMeta for TimestampMeta {
    const TYPE: &'static str = "Timestamp";

    fn version(&self) -> u64 {
        self.version
    }

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }
}

/// Length, hashes and (optionally) version of a referenced metadata file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub length: u64,
    pub hashes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl FileMeta {
    pub fn from_bytes(data: &[u8], version: Option<u64>) -> Self {
        let mut hashes = BTreeMap::new();
        hashes.insert(SHA256.to_string(), checksum(data));
        Self {
            length: data.len() as u64,
            hashes,
            version,
        }
    }

    pub fn sha256(&self) -> Option<&str> {
        self.hashes.get(SHA256).map(String::as_str)
    }

    /// Whether this entry describes exactly `data`
    pub fn matches(&self, data: &[u8]) -> bool {
        self.length == data.len() as u64 && self.sha256() == Some(checksum(data).as_str())
    }
}
