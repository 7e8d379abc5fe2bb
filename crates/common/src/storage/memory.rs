use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{MetaStore, MetaUpdate, StorageError, StoredMeta};
use crate::tuf::{Gun, RoleName};

/// In-memory metadata store
#[derive(Debug, Clone, Default)]
pub struct MemStorage {
    inner: Arc<RwLock<MemStorageInner>>,
}

#[derive(Debug, Default)]
struct MemStorageInner {
    /// gun -> role -> history
    repos: HashMap<Gun, HashMap<RoleName, RoleHistory>>,
}

#[derive(Debug, Default)]
struct RoleHistory {
    /// Every version ever written, keyed by version; the last entry is current
    versions: BTreeMap<u64, StoredMeta>,
    /// checksum -> version
    checksums: HashMap<String, u64>,
}

impl RoleHistory {
    fn current(&self) -> Option<&StoredMeta> {
        self.versions.values().next_back()
    }

    fn current_version(&self) -> Option<u64> {
        self.versions.keys().next_back().copied()
    }

    fn push(&mut self, meta: StoredMeta) {
        self.checksums.insert(meta.checksum.clone(), meta.version);
        self.versions.insert(meta.version, meta);
    }
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn not_found(gun: &Gun, role: &RoleName, what: impl std::fmt::Display) -> StorageError {
        StorageError::NotFound(format!("{} {} {}", gun, role, what))
    }

    fn check_version(
        inner: &MemStorageInner,
        gun: &Gun,
        update: &MetaUpdate,
    ) -> Result<(), StorageError> {
        let current = inner
            .repos
            .get(gun)
            .and_then(|roles| roles.get(&update.role))
            .and_then(RoleHistory::current_version);

        match current {
            Some(current) if update.version <= current => Err(StorageError::OldVersion {
                role: update.role.clone(),
                current,
                attempted: update.version,
            }),
            _ => Ok(()),
        }
    }

    fn apply(inner: &mut MemStorageInner, gun: &Gun, update: MetaUpdate) {
        let meta = StoredMeta::new(update.role.clone(), update.version, update.data);
        inner
            .repos
            .entry(gun.clone())
            .or_default()
            .entry(update.role)
            .or_default()
            .push(meta);
    }
}

#[async_trait]
impl MetaStore for MemStorage {
    async fn update_current(&self, gun: &Gun, update: MetaUpdate) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        Self::check_version(&inner, gun, &update)?;
        tracing::debug!(gun = %gun, role = %update.role, version = update.version, "storing metadata");
        Self::apply(&mut inner, gun, update);
        Ok(())
    }

    async fn update_many(&self, gun: &Gun, updates: Vec<MetaUpdate>) -> Result<(), StorageError> {
        let mut inner = self.inner.write();

        // validate the whole batch before touching anything
        for (i, update) in updates.iter().enumerate() {
            Self::check_version(&inner, gun, update)?;
            if updates[..i].iter().any(|other| other.role == update.role) {
                return Err(StorageError::Internal(format!(
                    "duplicate update for role {} in batch",
                    update.role
                )));
            }
        }

        for update in updates {
            tracing::debug!(gun = %gun, role = %update.role, version = update.version, "storing metadata");
            Self::apply(&mut inner, gun, update);
        }
        Ok(())
    }

    async fn get_current(&self, gun: &Gun, role: &RoleName) -> Result<StoredMeta, StorageError> {
        let inner = self.inner.read();
        inner
            .repos
            .get(gun)
            .and_then(|roles| roles.get(role))
            .and_then(RoleHistory::current)
            .cloned()
            .ok_or_else(|| Self::not_found(gun, role, "current"))
    }

    async fn get_version(
        &self,
        gun: &Gun,
        role: &RoleName,
        version: u64,
    ) -> Result<StoredMeta, StorageError> {
        let inner = self.inner.read();
        inner
            .repos
            .get(gun)
            .and_then(|roles| roles.get(role))
            .and_then(|history| history.versions.get(&version))
            .cloned()
            .ok_or_else(|| Self::not_found(gun, role, format!("version {}", version)))
    }

    async fn get_checksum(
        &self,
        gun: &Gun,
        role: &RoleName,
        checksum: &str,
    ) -> Result<StoredMeta, StorageError> {
        let inner = self.inner.read();
        inner
            .repos
            .get(gun)
            .and_then(|roles| roles.get(role))
            .and_then(|history| {
                let version = history.checksums.get(checksum)?;
                history.versions.get(version)
            })
            .cloned()
            .ok_or_else(|| Self::not_found(gun, role, format!("checksum {}", checksum)))
    }

    async fn current_roles(&self, gun: &Gun) -> Result<Vec<RoleName>, StorageError> {
        let inner = self.inner.read();
        let mut roles: Vec<RoleName> = inner
            .repos
            .get(gun)
            .map(|roles| roles.keys().cloned().collect())
            .unwrap_or_default();
        roles.sort();
        Ok(roles)
    }

    async fn delete(&self, gun: &Gun) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        match inner.repos.remove(gun) {
            Some(_) => {
                tracing::info!(gun = %gun, "deleted all metadata");
                Ok(())
            }
            None => Err(StorageError::NotFound(format!("{}", gun))),
        }
    }
}
