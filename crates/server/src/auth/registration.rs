use std::fs;
use std::path::Path;

use bytes::Bytes;

use common::crypto::{sign_metadata, KeyError, SecretKey};
use common::tuf::{checksum, RoleName, RootMeta, TufError};

pub const ROOT_KEY_FILE: &str = "root.pem";
pub const TARGETS_KEY_FILE: &str = "targets.pem";
pub const SNAPSHOT_KEY_FILE: &str = "snapshot.pem";
pub const TIMESTAMP_KEY_FILE: &str = "timestamp.pem";

/// Suffix marking a registration that covers every repository under a host
const WILDCARD_SUFFIX: &str = "/*";

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("invalid registration pattern {0:?}")]
    InvalidPattern(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad operator key {file}: {source}")]
    Key { file: String, source: KeyError },
    #[error("failed to sign operator root: {0}")]
    Sign(#[from] TufError),
}

/// The operator's signing keys for an alternate root of trust
#[derive(Debug, Clone)]
pub struct OperatorKeys {
    pub root: SecretKey,
    pub targets: SecretKey,
    pub snapshot: SecretKey,
    pub timestamp: SecretKey,
}

impl OperatorKeys {
    pub fn generate() -> Self {
        Self {
            root: SecretKey::generate(),
            targets: SecretKey::generate(),
            snapshot: SecretKey::generate(),
            timestamp: SecretKey::generate(),
        }
    }

    /// Write every key as PEM into `dir`, creating it if needed
    pub fn write_pem(&self, dir: &Path) -> Result<(), RegistrationError> {
        fs::create_dir_all(dir)?;
        for (file, key) in self.files() {
            fs::write(dir.join(file), key.to_pem())?;
        }
        Ok(())
    }

    pub fn load_pem(dir: &Path) -> Result<Self, RegistrationError> {
        let load = |file: &str| -> Result<SecretKey, RegistrationError> {
            let pem = fs::read_to_string(dir.join(file))?;
            SecretKey::from_pem(&pem).map_err(|source| RegistrationError::Key {
                file: file.to_string(),
                source,
            })
        };
        Ok(Self {
            root: load(ROOT_KEY_FILE)?,
            targets: load(TARGETS_KEY_FILE)?,
            snapshot: load(SNAPSHOT_KEY_FILE)?,
            timestamp: load(TIMESTAMP_KEY_FILE)?,
        })
    }

    fn files(&self) -> [(&'static str, &SecretKey); 4] {
        [
            (ROOT_KEY_FILE, &self.root),
            (TARGETS_KEY_FILE, &self.targets),
            (SNAPSHOT_KEY_FILE, &self.snapshot),
            (TIMESTAMP_KEY_FILE, &self.timestamp),
        ]
    }
}

/// Binds a repository, or every repository under a host (`host/*`), to an
///  operator root of trust.
#[derive(Debug, Clone)]
pub struct RootRegistration {
    pattern: String,
    root: Bytes,
    root_checksum: String,
    root_version: u64,
    keys: OperatorKeys,
}

impl RootRegistration {
    /// Sign a fresh operator root for `pattern`
    pub fn new(pattern: &str, keys: OperatorKeys) -> Result<Self, RegistrationError> {
        let pattern = pattern.trim();
        let valid = match pattern.strip_suffix(WILDCARD_SUFFIX) {
            Some(host) => !host.is_empty() && !host.contains('*'),
            None => !pattern.is_empty() && !pattern.contains('*'),
        };
        if !valid {
            return Err(RegistrationError::InvalidPattern(pattern.to_string()));
        }

        let root_version = 1;
        let mut root = RootMeta::new(root_version);
        root.set_role_keys(&RoleName::root(), &[keys.root.public()], 1)
            .set_role_keys(&RoleName::targets(), &[keys.targets.public()], 1)
            .set_role_keys(&RoleName::snapshot(), &[keys.snapshot.public()], 1)
            .set_role_keys(&RoleName::timestamp(), &[keys.timestamp.public()], 1);
        let root = Bytes::from(sign_metadata(root, &[&keys.root])?.to_bytes()?);

        tracing::info!(pattern, root_key = %keys.root.public().key_id(), "registered alternate root");
        Ok(Self {
            pattern: pattern.to_string(),
            root_checksum: checksum(&root),
            root,
            root_version,
            keys,
        })
    }

    /// Load operator keys from a directory written by `apostille keygen`
    pub fn from_key_dir(pattern: &str, dir: &Path) -> Result<Self, RegistrationError> {
        Self::new(pattern, OperatorKeys::load_pem(dir)?)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// For `host/*` patterns, the prefix a repository name must start with
    pub fn wildcard_prefix(&self) -> Option<&str> {
        self.pattern
            .strip_suffix('*')
            .filter(|_| self.pattern.ends_with(WILDCARD_SUFFIX))
    }

    pub fn root_bytes(&self) -> &Bytes {
        &self.root
    }

    pub fn root_checksum(&self) -> &str {
        &self.root_checksum
    }

    pub fn root_version(&self) -> u64 {
        self.root_version
    }

    pub fn targets_key(&self) -> &SecretKey {
        &self.keys.targets
    }

    pub fn snapshot_key(&self) -> &SecretKey {
        &self.keys.snapshot
    }

    pub fn timestamp_key(&self) -> &SecretKey {
        &self.keys.timestamp
    }
}
