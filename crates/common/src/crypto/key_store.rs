use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{PublicKey, SecretKey};
use crate::tuf::{Gun, RoleName};

/// Server-held signing keys for one trust tree, by repository and role.
///
/// Cloning is cheap and clones share the same keys.
#[derive(Debug, Clone, Default)]
pub struct KeyStore {
    inner: Arc<RwLock<HashMap<(Gun, RoleName), SecretKey>>>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, gun: &Gun, role: &RoleName) -> Option<SecretKey> {
        self.inner.read().get(&(gun.clone(), role.clone())).cloned()
    }

    pub fn public(&self, gun: &Gun, role: &RoleName) -> Option<PublicKey> {
        self.get(gun, role).map(|key| key.public())
    }

    /// Fetch the key for a role, generating one on first use
    pub fn get_or_create(&self, gun: &Gun, role: &RoleName) -> SecretKey {
        let mut inner = self.inner.write();
        inner
            .entry((gun.clone(), role.clone()))
            .or_insert_with(|| {
                tracing::info!(gun = %gun, role = %role, "generated server signing key");
                SecretKey::generate()
            })
            .clone()
    }

    /// Replace the key for a role with a freshly generated one
    pub fn rotate(&self, gun: &Gun, role: &RoleName) -> SecretKey {
        let key = SecretKey::generate();
        self.inner
            .write()
            .insert((gun.clone(), role.clone()), key.clone());
        tracing::info!(gun = %gun, role = %role, key_id = %key.public().key_id(), "rotated server signing key");
        key
    }

    /// Store a known key, e.g. one loaded from disk
    pub fn insert(&self, gun: &Gun, role: &RoleName, key: SecretKey) {
        self.inner.write().insert((gun.clone(), role.clone()), key);
    }

    /// Forget every key held for a repository
    pub fn delete_gun(&self, gun: &Gun) -> usize {
        let mut inner = self.inner.write();
        let before = inner.len();
        inner.retain(|(key_gun, _), _| key_gun != gun);
        before - inner.len()
    }
}
