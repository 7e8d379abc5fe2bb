//! Single-tree metadata storage.
//!
//! A [`MetaStore`] holds one trust tree: for every repository and role, an
//!  immutable history of versioned metadata blobs plus a "current" pointer
//!  that only moves forward. The multiplexing layer composes two of these.

mod memory;

use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::tuf::{checksum, Gun, RoleName};

pub use memory::MemStorage;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Nothing stored for the requested repository, role, version or checksum
    #[error("metadata not found: {0}")]
    NotFound(String),
    /// A write did not advance the role's version
    #[error("{role}: version {attempted} is not newer than current version {current}")]
    OldVersion {
        role: RoleName,
        current: u64,
        attempted: u64,
    },
    #[error("storage backend error: {0}")]
    Internal(String),
}

/// One role's new metadata in a write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaUpdate {
    pub role: RoleName,
    pub version: u64,
    pub data: Bytes,
}

impl MetaUpdate {
    pub fn new(role: RoleName, version: u64, data: impl Into<Bytes>) -> Self {
        Self {
            role,
            version,
            data: data.into(),
        }
    }
}

/// A metadata blob as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMeta {
    pub role: RoleName,
    pub version: u64,
    pub data: Bytes,
    /// hex SHA-256 of `data`
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

impl StoredMeta {
    pub fn new(role: RoleName, version: u64, data: Bytes) -> Self {
        Self {
            checksum: checksum(&data),
            role,
            version,
            data,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait MetaStore: Send + Sync + Debug + 'static {
    /// Store a single role's metadata and make it current
    async fn update_current(&self, gun: &Gun, update: MetaUpdate) -> Result<(), StorageError>;

    /// Store several roles at once. Either every update is applied or none
    ///  is, and readers never observe a partially applied batch.
    async fn update_many(&self, gun: &Gun, updates: Vec<MetaUpdate>) -> Result<(), StorageError>;

    async fn get_current(&self, gun: &Gun, role: &RoleName) -> Result<StoredMeta, StorageError>;

    async fn get_version(
        &self,
        gun: &Gun,
        role: &RoleName,
        version: u64,
    ) -> Result<StoredMeta, StorageError>;

    async fn get_checksum(
        &self,
        gun: &Gun,
        role: &RoleName,
        checksum: &str,
    ) -> Result<StoredMeta, StorageError>;

    /// Roles that currently have metadata for a repository
    async fn current_roles(&self, gun: &Gun) -> Result<Vec<RoleName>, StorageError>;

    /// Remove every role and version for a repository.
    ///
    /// Fails with `NotFound` if the repository had nothing stored.
    async fn delete(&self, gun: &Gun) -> Result<(), StorageError>;

    /// Current metadata, or `None` instead of a `NotFound` error
    async fn try_current(
        &self,
        gun: &Gun,
        role: &RoleName,
    ) -> Result<Option<StoredMeta>, StorageError> {
        match self.get_current(gun, role).await {
            Ok(meta) => Ok(Some(meta)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
