//! The Update Framework data model.
//!
//! Roles, repository names (GUNs), the signed metadata envelope and the
//! role bodies the server reads, writes and generates. Only the subset of
//! TUF the server needs to reason about is modelled here; anything a client
//! adds on top is carried through untouched in the raw bytes.

mod canonical;
mod metadata;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use canonical::canonical_json;
pub use metadata::{
    default_expiry, DelegatedRole, Delegations, FileMeta, RoleKeys, RoleMeta, RootMeta, Signature,
    Signed, SignedCommon, SnapshotMeta, TargetsMeta, TimestampMeta, TufKey,
};

pub const ROOT_ROLE: &str = "root";
pub const TARGETS_ROLE: &str = "targets";
pub const SNAPSHOT_ROLE: &str = "snapshot";
pub const TIMESTAMP_ROLE: &str = "timestamp";

/// Delegation conventionally used for released content
pub const RELEASES_ROLE: &str = "targets/releases";

/// The top-level roles every repository has, in dependency order.
pub const BASE_ROLES: [&str; 4] = [ROOT_ROLE, TARGETS_ROLE, SNAPSHOT_ROLE, TIMESTAMP_ROLE];

const DELEGATION_PREFIX: &str = "targets/";

#[derive(Debug, thiserror::Error)]
pub enum TufError {
    #[error("invalid role name: {0}")]
    InvalidRole(String),
    #[error("invalid repository name: {0}")]
    InvalidGun(String),
    #[error("metadata type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("malformed metadata: {0}")]
    Json(#[from] serde_json::Error),
    #[error("signature error: {0}")]
    Signature(String),
}

/// A TUF role name: one of the four canonical roles or a delegated
///  role below `targets/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoleName(String);

impl RoleName {
    pub fn root() -> Self {
        Self(ROOT_ROLE.to_string())
    }

    pub fn targets() -> Self {
        Self(TARGETS_ROLE.to_string())
    }

    pub fn snapshot() -> Self {
        Self(SNAPSHOT_ROLE.to_string())
    }

    pub fn timestamp() -> Self {
        Self(TIMESTAMP_ROLE.to_string())
    }

    pub fn releases() -> Self {
        Self(RELEASES_ROLE.to_string())
    }

    pub fn parse(name: &str) -> Result<Self, TufError> {
        if BASE_ROLES.contains(&name) {
            return Ok(Self(name.to_string()));
        }

        let Some(rest) = name.strip_prefix(DELEGATION_PREFIX) else {
            return Err(TufError::InvalidRole(name.to_string()));
        };

        let valid = !rest.is_empty()
            && rest.split('/').all(|component| {
                !component.is_empty()
                    && component != "."
                    && component != ".."
                    && component
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            });

        if valid {
            Ok(Self(name.to_string()))
        } else {
            Err(TufError::InvalidRole(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT_ROLE
    }

    pub fn is_targets(&self) -> bool {
        self.0 == TARGETS_ROLE
    }

    pub fn is_snapshot(&self) -> bool {
        self.0 == SNAPSHOT_ROLE
    }

    pub fn is_timestamp(&self) -> bool {
        self.0 == TIMESTAMP_ROLE
    }

    /// Whether this is a delegated targets role (`targets/<name>`)
    pub fn is_delegation(&self) -> bool {
        self.0.starts_with(DELEGATION_PREFIX)
    }

    /// Roles whose signing keys the server itself holds
    pub fn is_server_signable(&self) -> bool {
        self.is_snapshot() || self.is_timestamp()
    }

    /// Roles whose content is a targets listing (top-level or delegated)
    pub fn is_targets_like(&self) -> bool {
        self.is_targets() || self.is_delegation()
    }

    /// The delegating role, for delegated roles only
    pub fn parent(&self) -> Option<RoleName> {
        if !self.is_delegation() {
            return None;
        }
        let (parent, _) = self.0.rsplit_once('/')?;
        Some(Self(parent.to_string()))
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoleName {
    type Err = TufError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RoleName {
    type Error = TufError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoleName> for String {
    fn from(role: RoleName) -> Self {
        role.0
    }
}

/// Globally Unique Name of a repository, e.g. `quay.io/org/repo`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Gun(String);

impl Gun {
    pub fn parse(name: &str) -> Result<Self, TufError> {
        let valid = !name.is_empty()
            && name
                .split('/')
                .all(|component| !component.is_empty() && component != "." && component != "..");
        if valid {
            Ok(Self(name.to_string()))
        } else {
            Err(TufError::InvalidGun(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The registry host, i.e. the first path component
    pub fn host(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }

    /// The namespace below the host, if the name has one
    pub fn namespace_owner(&self) -> Option<&str> {
        self.0.split('/').nth(1)
    }
}

impl fmt::Display for Gun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Gun {
    type Err = TufError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Gun {
    type Error = TufError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Gun> for String {
    fn from(gun: Gun) -> Self {
        gun.0
    }
}

/// Lowercase hex SHA-256 of a metadata blob
pub fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// The consistent-snapshot file stem for a role at a checksum
pub fn consistent_name(role: &RoleName, checksum: &str) -> String {
    format!("{}.{}", role, checksum)
}
