/**
 * Cryptographic types and operations.
 *  - Ed25519 public and secret keys
 *  - Signing and threshold verification of TUF metadata
 *  - Per-repository server key storage
 */
pub mod crypto;
/**
 * Single-tree metadata storage: versioned,
 *  content-addressed history per repository and role.
 */
pub mod storage;
/**
 * Helpers for building signed repositories in tests.
 */
pub mod testkit;
/**
 * The TUF data model: roles, repository names,
 *  signed envelopes and canonical encoding.
 */
pub mod tuf;
/**
 * Acceptance checks for pushed metadata.
 */
pub mod validation;
/**
 * Helper for setting build version information
 *  at compile time.
 */
pub mod version;

pub mod prelude {
    pub use crate::crypto::{KeyStore, PublicKey, SecretKey};
    pub use crate::storage::{MemStorage, MetaStore, MetaUpdate, StorageError, StoredMeta};
    pub use crate::tuf::{Gun, RoleName, Signed};
    pub use crate::validation::{validate_update, ValidationError};
    pub use crate::version::build_info;
}
