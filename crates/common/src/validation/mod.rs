//! Validation of pushed metadata batches.
//!
//! Mirrors the checks a notary server applies before accepting an update:
//!  well-formed metadata of the right type, strictly increasing versions,
//!  root and targets signed to threshold, delegations reachable from their
//!  parent, and a snapshot that matches what was pushed. When a client
//!  omits the snapshot and the server holds the snapshot key, the snapshot
//!  is generated here.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::Serialize;

use crate::crypto::{sign_metadata, verify_role_signatures, KeyStore};
use crate::storage::{MetaStore, MetaUpdate, StorageError};
use crate::tuf::{
    FileMeta, Gun, RoleKeys, RoleMeta, RoleName, RootMeta, Signature, Signed, SignedCommon,
    SnapshotMeta, TargetsMeta, TimestampMeta, TufKey,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "type")]
pub enum ValidationError {
    #[error("bad root: {msg}")]
    #[serde(rename = "ErrBadRoot")]
    BadRoot { msg: String },

    #[error("bad targets ({role}): {msg}")]
    #[serde(rename = "ErrBadTargets")]
    BadTargets { role: String, msg: String },

    #[error("bad snapshot: {msg}")]
    #[serde(rename = "ErrBadSnapshot")]
    BadSnapshot { msg: String },

    /// A role the update depends on is neither pushed nor available
    #[error("{msg}")]
    #[serde(rename = "ErrBadHierarchy")]
    BadHierarchy { missing: String, msg: String },

    #[error("bad version for {role}: {msg}")]
    #[serde(rename = "ErrBadVersion")]
    BadVersion { role: String, msg: String },

    #[error("invalid update: {msg}")]
    #[serde(rename = "ErrInvalidUpdate")]
    InvalidUpdate { msg: String },

    #[error("internal error validating update: {msg}")]
    #[serde(rename = "ErrInternal")]
    Internal { msg: String },
}

impl ValidationError {
    /// The structured error body returned to clients
    pub fn to_body(&self) -> serde_json::Value {
        serde_json::json!({
            "errors": [{
                "code": "VALIDATION_FAILED",
                "message": self.to_string(),
                "detail": self,
            }]
        })
    }
}

impl From<StorageError> for ValidationError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::OldVersion {
                role,
                current,
                attempted,
            } => ValidationError::BadVersion {
                role: role.to_string(),
                msg: format!(
                    "version {} is not newer than current version {}",
                    attempted, current
                ),
            },
            other => ValidationError::Internal {
                msg: other.to_string(),
            },
        }
    }
}

/// Peek at the version declared inside a metadata blob
pub fn declared_version(data: &[u8]) -> Result<u64, ValidationError> {
    let envelope: Signed<SignedCommon> =
        serde_json::from_slice(data).map_err(|e| ValidationError::InvalidUpdate {
            msg: format!("malformed metadata: {}", e),
        })?;
    Ok(envelope.signed.version)
}

fn expected_type(role: &RoleName) -> &'static str {
    if role.is_root() {
        RootMeta::TYPE
    } else if role.is_snapshot() {
        SnapshotMeta::TYPE
    } else if role.is_timestamp() {
        TimestampMeta::TYPE
    } else {
        TargetsMeta::TYPE
    }
}

/// A pushed blob decoded far enough to check signatures
struct Decoded {
    update: MetaUpdate,
    body: serde_json::Value,
    signatures: Vec<Signature>,
}

fn decode(update: MetaUpdate) -> Result<Decoded, ValidationError> {
    let envelope: Signed<serde_json::Value> =
        serde_json::from_slice(&update.data).map_err(|e| ValidationError::InvalidUpdate {
            msg: format!("{}: malformed metadata: {}", update.role, e),
        })?;
    let common: SignedCommon = serde_json::from_value(envelope.signed.clone()).map_err(|e| {
        ValidationError::InvalidUpdate {
            msg: format!("{}: malformed metadata: {}", update.role, e),
        }
    })?;

    let expected = expected_type(&update.role);
    if common.type_ != expected {
        return Err(ValidationError::InvalidUpdate {
            msg: format!(
                "{}: expected {} metadata, found {}",
                update.role, expected, common.type_
            ),
        });
    }
    if common.version != update.version {
        return Err(ValidationError::BadVersion {
            role: update.role.to_string(),
            msg: format!(
                "update declares version {} but metadata is version {}",
                update.version, common.version
            ),
        });
    }

    Ok(Decoded {
        update,
        body: envelope.signed,
        signatures: envelope.signatures,
    })
}

fn typed<T: RoleMeta>(decoded: &Decoded) -> Result<T, ValidationError> {
    serde_json::from_value(decoded.body.clone()).map_err(|e| ValidationError::InvalidUpdate {
        msg: format!("{}: malformed metadata: {}", decoded.update.role, e),
    })
}

/// Load and decode a stored role, if there is one
async fn stored<T: RoleMeta>(
    store: &dyn MetaStore,
    gun: &Gun,
    role: &RoleName,
) -> Result<Option<(T, Bytes)>, ValidationError> {
    let Some(meta) = store.try_current(gun, role).await? else {
        return Ok(None);
    };
    let signed = Signed::<T>::from_bytes(&meta.data).map_err(|e| ValidationError::Internal {
        msg: format!("stored {} is unreadable: {}", role, e),
    })?;
    Ok(Some((signed.signed, meta.data)))
}

/// Validate a batch of updates for one repository in one tree.
///
/// Returns the updates to write, which may include a server-generated
///  snapshot.
pub async fn validate_update(
    store: &dyn MetaStore,
    keys: &KeyStore,
    gun: &Gun,
    updates: Vec<MetaUpdate>,
) -> Result<Vec<MetaUpdate>, ValidationError> {
    if updates.is_empty() {
        return Err(ValidationError::InvalidUpdate {
            msg: "no metadata in update".into(),
        });
    }

    let mut pushed: BTreeMap<RoleName, Decoded> = BTreeMap::new();
    for update in updates {
        let role = update.role.clone();
        if pushed.insert(role.clone(), decode(update)?).is_some() {
            return Err(ValidationError::InvalidUpdate {
                msg: format!("{} appears more than once in update", role),
            });
        }
    }

    for decoded in pushed.values() {
        if let Some(current) = store.try_current(gun, &decoded.update.role).await? {
            if decoded.update.version <= current.version {
                return Err(ValidationError::BadVersion {
                    role: decoded.update.role.to_string(),
                    msg: format!(
                        "version {} is not newer than current version {}",
                        decoded.update.version, current.version
                    ),
                });
            }
        }
    }

    let root = validate_root(store, gun, pushed.get(&RoleName::root())).await?;

    if let Some(targets) = pushed.get(&RoleName::targets()) {
        let role_keys = root
            .role_keys(&RoleName::targets())
            .ok_or_else(|| ValidationError::BadRoot {
                msg: "root does not define a targets role".into(),
            })?;
        verify_role_signatures(&targets.body, &targets.signatures, &root.keys, role_keys).map_err(
            |e| ValidationError::BadTargets {
                role: RoleName::targets().to_string(),
                msg: e.to_string(),
            },
        )?;
    }

    for decoded in pushed.values().filter(|d| d.update.role.is_delegation()) {
        validate_delegation(store, gun, &pushed, decoded).await?;
    }

    let mut accepted: Vec<MetaUpdate> = Vec::with_capacity(pushed.len() + 1);
    match pushed.get(&RoleName::snapshot()) {
        Some(snapshot) => validate_snapshot(&root, &pushed, snapshot)?,
        None => {
            let needs_snapshot = pushed
                .keys()
                .any(|role| !role.is_timestamp() && !role.is_snapshot());
            if needs_snapshot {
                accepted.push(generate_snapshot(store, keys, gun, &pushed).await?);
            }
        }
    }

    if let Some(timestamp) = pushed.get(&RoleName::timestamp()) {
        typed::<TimestampMeta>(timestamp)?;
    }

    accepted.extend(pushed.into_values().map(|decoded| decoded.update));
    Ok(accepted)
}

async fn validate_root(
    store: &dyn MetaStore,
    gun: &Gun,
    pushed: Option<&Decoded>,
) -> Result<RootMeta, ValidationError> {
    let previous = stored::<RootMeta>(store, gun, &RoleName::root()).await?;

    let Some(decoded) = pushed else {
        return previous
            .map(|(root, _)| root)
            .ok_or_else(|| ValidationError::BadRoot {
                msg: "no root metadata has been uploaded for this repository".into(),
            });
    };

    let root: RootMeta = typed(decoded)?;
    let own_keys = root
        .role_keys(&RoleName::root())
        .ok_or_else(|| ValidationError::BadRoot {
            msg: "root does not define a root role".into(),
        })?;
    verify_role_signatures(&decoded.body, &decoded.signatures, &root.keys, own_keys).map_err(
        |e| ValidationError::BadRoot {
            msg: format!("root is not signed by its own keys: {}", e),
        },
    )?;

    // a rotation must also be vouched for by the keys being replaced
    if let Some((old, _)) = previous {
        if let Some(old_keys) = old.role_keys(&RoleName::root()) {
            verify_role_signatures(&decoded.body, &decoded.signatures, &old.keys, old_keys)
                .map_err(|e| ValidationError::BadRoot {
                    msg: format!("root rotation is not signed by the previous root keys: {}", e),
                })?;
        }
    }

    for role in [RoleName::targets(), RoleName::snapshot(), RoleName::timestamp()] {
        if root.role_keys(&role).is_none() {
            return Err(ValidationError::BadRoot {
                msg: format!("root does not define a {} role", role),
            });
        }
    }

    Ok(root)
}

async fn validate_delegation(
    store: &dyn MetaStore,
    gun: &Gun,
    pushed: &BTreeMap<RoleName, Decoded>,
    decoded: &Decoded,
) -> Result<(), ValidationError> {
    let role = &decoded.update.role;
    let parent_role = role.parent().ok_or_else(|| ValidationError::InvalidUpdate {
        msg: format!("{} is not a delegated role", role),
    })?;

    let parent: TargetsMeta = match pushed.get(&parent_role) {
        Some(parent) => typed(parent)?,
        None => match stored::<TargetsMeta>(store, gun, &parent_role).await? {
            Some((parent, _)) => parent,
            None => {
                return Err(ValidationError::BadHierarchy {
                    missing: parent_role.to_string(),
                    msg: format!(
                        "{} was pushed but its parent {} does not exist",
                        role, parent_role
                    ),
                })
            }
        },
    };

    let delegation = parent
        .delegation(role)
        .ok_or_else(|| ValidationError::BadHierarchy {
            missing: role.to_string(),
            msg: format!("{} does not delegate to {}", parent_role, role),
        })?;
    let keys: BTreeMap<String, TufKey> = parent
        .delegations
        .as_ref()
        .map(|d| d.keys.clone())
        .unwrap_or_default();
    let role_keys = RoleKeys {
        keyids: delegation.keyids.clone(),
        threshold: delegation.threshold,
    };

    verify_role_signatures(&decoded.body, &decoded.signatures, &keys, &role_keys).map_err(|e| {
        ValidationError::BadTargets {
            role: role.to_string(),
            msg: e.to_string(),
        }
    })
}

fn validate_snapshot(
    root: &RootMeta,
    pushed: &BTreeMap<RoleName, Decoded>,
    snapshot: &Decoded,
) -> Result<(), ValidationError> {
    let body: SnapshotMeta = typed(snapshot)?;
    let role_keys = root
        .role_keys(&RoleName::snapshot())
        .ok_or_else(|| ValidationError::BadRoot {
            msg: "root does not define a snapshot role".into(),
        })?;
    verify_role_signatures(&snapshot.body, &snapshot.signatures, &root.keys, role_keys).map_err(
        |e| ValidationError::BadSnapshot { msg: e.to_string() },
    )?;

    for decoded in pushed
        .values()
        .filter(|d| d.update.role.is_root() || d.update.role.is_targets_like())
    {
        let role = &decoded.update.role;
        let listed = body
            .meta
            .get(role.as_str())
            .ok_or_else(|| ValidationError::BadSnapshot {
                msg: format!("snapshot does not list {}", role),
            })?;
        if !listed.matches(&decoded.update.data) {
            return Err(ValidationError::BadSnapshot {
                msg: format!("snapshot entry for {} does not match the pushed {}", role, role),
            });
        }
    }
    Ok(())
}

async fn generate_snapshot(
    store: &dyn MetaStore,
    keys: &KeyStore,
    gun: &Gun,
    pushed: &BTreeMap<RoleName, Decoded>,
) -> Result<MetaUpdate, ValidationError> {
    let Some(key) = keys.get(gun, &RoleName::snapshot()) else {
        return Err(ValidationError::BadHierarchy {
            missing: RoleName::snapshot().to_string(),
            msg: "no snapshot was included in update and server does not hold current snapshot key for repository".into(),
        });
    };

    let previous = stored::<SnapshotMeta>(store, gun, &RoleName::snapshot()).await?;
    let version = previous.as_ref().map(|(s, _)| s.version + 1).unwrap_or(1);
    let mut snapshot = SnapshotMeta::new(version);
    if let Some((previous, _)) = previous {
        snapshot.meta = previous.meta;
    }

    for role in store.current_roles(gun).await? {
        if (role.is_root() || role.is_targets_like()) && !snapshot.meta.contains_key(role.as_str())
        {
            let meta = store.get_current(gun, &role).await?;
            snapshot.meta.insert(
                role.to_string(),
                FileMeta::from_bytes(&meta.data, Some(meta.version)),
            );
        }
    }
    for decoded in pushed.values().filter(|d| !d.update.role.is_timestamp()) {
        snapshot.meta.insert(
            decoded.update.role.to_string(),
            FileMeta::from_bytes(&decoded.update.data, Some(decoded.update.version)),
        );
    }

    let signed = sign_metadata(snapshot, &[&key]).map_err(|e| ValidationError::Internal {
        msg: e.to_string(),
    })?;
    let data = signed.to_bytes().map_err(|e| ValidationError::Internal {
        msg: e.to_string(),
    })?;
    tracing::info!(gun = %gun, version, "server generated snapshot for update");
    Ok(MetaUpdate::new(RoleName::snapshot(), version, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStorage;
    use crate::testkit::RepoBuilder;

    fn gun() -> Gun {
        Gun::parse("quay.io/apostille").unwrap()
    }

    #[tokio::test]
    async fn test_full_repo_is_accepted() {
        let repo = RepoBuilder::new(gun()).build().unwrap();
        let store = MemStorage::new();

        let accepted = validate_update(&store, &KeyStore::new(), &gun(), repo.updates())
            .await
            .unwrap();
        assert_eq!(accepted.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_snapshot_without_server_key_is_bad_hierarchy() {
        let repo = RepoBuilder::new(gun()).build().unwrap();
        let store = MemStorage::new();

        let updates = vec![repo.update(&RoleName::root()), repo.update(&RoleName::targets())];
        let err = validate_update(&store, &KeyStore::new(), &gun(), updates)
            .await
            .unwrap_err();
        assert!(
            matches!(err, ValidationError::BadHierarchy { ref missing, .. } if missing == "snapshot")
        );

        let body = err.to_body();
        assert_eq!(body["errors"][0]["detail"]["type"], "ErrBadHierarchy");
    }

    #[tokio::test]
    async fn test_missing_snapshot_with_server_key_is_generated() {
        let keys = KeyStore::new();
        let snapshot_key = keys.get_or_create(&gun(), &RoleName::snapshot());
        let repo = RepoBuilder::new(gun())
            .snapshot_key(snapshot_key)
            .build()
            .unwrap();
        let store = MemStorage::new();

        let updates = vec![repo.update(&RoleName::root()), repo.update(&RoleName::targets())];
        let accepted = validate_update(&store, &keys, &gun(), updates).await.unwrap();

        let snapshot = accepted
            .iter()
            .find(|u| u.role.is_snapshot())
            .expect("snapshot generated");
        let body = Signed::<SnapshotMeta>::from_bytes(&snapshot.data).unwrap().signed;
        assert!(body.meta["targets"].matches(&repo.bytes(&RoleName::targets())));
    }

    #[tokio::test]
    async fn test_no_root_is_rejected() {
        let repo = RepoBuilder::new(gun()).build().unwrap();
        let store = MemStorage::new();

        let err = validate_update(
            &store,
            &KeyStore::new(),
            &gun(),
            vec![repo.update(&RoleName::targets()), repo.update(&RoleName::snapshot())],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ValidationError::BadRoot { .. }));
    }

    #[tokio::test]
    async fn test_targets_signed_by_wrong_key_is_rejected() {
        let repo = RepoBuilder::new(gun()).build().unwrap();
        let impostor = RepoBuilder::new(gun()).build().unwrap();
        let store = MemStorage::new();

        let updates = vec![
            repo.update(&RoleName::root()),
            impostor.update(&RoleName::targets()),
            repo.update(&RoleName::snapshot()),
        ];
        let err = validate_update(&store, &KeyStore::new(), &gun(), updates)
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::BadTargets { .. }));
    }

    #[tokio::test]
    async fn test_replayed_version_is_rejected() {
        let repo = RepoBuilder::new(gun()).build().unwrap();
        let store = MemStorage::new();
        store.update_many(&gun(), repo.updates()).await.unwrap();

        let err = validate_update(&store, &KeyStore::new(), &gun(), repo.updates())
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::BadVersion { .. }));
    }

    #[tokio::test]
    async fn test_delegation_requires_parent() {
        let repo = RepoBuilder::new(gun())
            .delegation("targets/ci")
            .build()
            .unwrap();
        let store = MemStorage::new();
        let ci = RoleName::parse("targets/ci").unwrap();

        // parent neither pushed nor stored
        let err = validate_update(
            &store,
            &KeyStore::new(),
            &gun(),
            vec![repo.update(&RoleName::root()), repo.update(&ci)],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ValidationError::BadHierarchy { .. }));

        let accepted = validate_update(&store, &KeyStore::new(), &gun(), repo.updates())
            .await
            .unwrap();
        assert!(accepted.iter().any(|u| u.role == ci));
    }
}
