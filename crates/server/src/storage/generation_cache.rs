use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use common::tuf::Gun;

/// What an alternate tree was last generated from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    /// Digest over the signer roles the generated set depends on
    pub source_digest: String,
    /// Checksum of the operator root the set was generated under
    pub root_checksum: String,
    pub generated_at: DateTime<Utc>,
}

impl Generation {
    pub fn matches(&self, source_digest: &str, root_checksum: &str) -> bool {
        self.source_digest == source_digest && self.root_checksum == root_checksum
    }
}

/// Records the last generation per repository and hands out the per-repository
///  lock that keeps regeneration single flight.
///
/// Locks outlive the generations they guard, so a regeneration queued
///  before a delete still serializes with everything after it.
#[derive(Debug, Default)]
pub struct GenerationCache {
    generations: RwLock<HashMap<Gun, Generation>>,
    locks: Mutex<HashMap<Gun, Arc<tokio::sync::Mutex<()>>>>,
}

impl GenerationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, gun: &Gun) -> Option<Generation> {
        self.generations.read().get(gun).cloned()
    }

    /// Whether the alternate tree already reflects these signer roles and
    ///  this operator root
    pub fn is_current(&self, gun: &Gun, source_digest: &str, root_checksum: &str) -> bool {
        self.generations
            .read()
            .get(gun)
            .is_some_and(|g| g.matches(source_digest, root_checksum))
    }

    pub fn record(&self, gun: &Gun, generation: Generation) {
        self.generations.write().insert(gun.clone(), generation);
    }

    pub fn lock_for(&self, gun: &Gun) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.lock().entry(gun.clone()).or_default().clone()
    }

    /// Forget the last generation; the repository's lock stays in place
    pub fn remove(&self, gun: &Gun) {
        self.generations.write().remove(gun);
    }
}
