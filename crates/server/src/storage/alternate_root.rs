//! Derives an alternate-root tree from the signer tree.
//!
//! The generated set is:
//!  - `root`: the operator's registered root, unchanged
//!  - `targets/releases`: the signer's current top-level targets, byte for byte
//!  - `targets`: signed by the operator, delegating only to `targets/releases`
//!    with the signer's targets keys
//!  - `snapshot` and `timestamp`: signed by the operator over the above and
//!    the signer's own delegated roles
//!
//! Delegated roles other than `targets/releases` are not copied; they are
//!  read straight from the signer tree.
//!
//! A set is only as fresh as the signer roles it was derived from, so each
//!  set carries a digest of them; see [`source_digest`].

use std::collections::BTreeMap;

use bytes::Bytes;

use common::crypto::{sign_metadata, SecretKey};
use common::storage::{MetaStore, MetaUpdate, StorageError, StoredMeta};
use common::tuf::{
    checksum, DelegatedRole, Delegations, FileMeta, Gun, RoleMeta, RoleName, RootMeta, Signed,
    SnapshotMeta, TargetsMeta, TimestampMeta, TufError, TufKey, RELEASES_ROLE,
};

use crate::auth::RootRegistration;

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("signer tree for {0} has no targets to derive from")]
    NoSignerTargets(Gun),
    #[error("signer tree for {0} has no root describing its targets keys")]
    NoSignerRoot(Gun),
    #[error("signer root for {gun} does not define a targets role")]
    NoTargetsRole { gun: Gun },
    #[error("metadata error: {0}")]
    Tuf(#[from] TufError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// A freshly derived set of alternate-tree roles, ready to write in one batch
#[derive(Debug)]
pub struct GeneratedSet {
    pub updates: Vec<MetaUpdate>,
    /// Digest of the signer roles this set was derived from
    pub source_digest: String,
}

/// Current signer roles a generated set depends on: root, targets and every
///  delegation except `targets/releases`, which the alternate tree replaces.
async fn read_sources(
    signer: &dyn MetaStore,
    gun: &Gun,
) -> Result<BTreeMap<RoleName, StoredMeta>, StorageError> {
    let releases = RoleName::releases();
    let mut sources = BTreeMap::new();
    for role in signer.current_roles(gun).await? {
        if !(role.is_root() || role.is_targets_like()) || role == releases {
            continue;
        }
        let meta = signer.get_current(gun, &role).await?;
        sources.insert(role, meta);
    }
    Ok(sources)
}

fn digest(sources: &BTreeMap<RoleName, StoredMeta>) -> String {
    let listing = sources
        .iter()
        .map(|(role, meta)| format!("{}={}\n", role, meta.checksum))
        .collect::<String>();
    checksum(listing.as_bytes())
}

/// Digest of the signer roles a generation would read right now, or `None`
///  while the signer has no targets to generate from.
pub async fn source_digest(
    signer: &dyn MetaStore,
    gun: &Gun,
) -> Result<Option<String>, StorageError> {
    let sources = read_sources(signer, gun).await?;
    Ok(sources
        .contains_key(&RoleName::targets())
        .then(|| digest(&sources)))
}

/// Next version of a role in the alternate tree
async fn next_version(
    alternate: &dyn MetaStore,
    gun: &Gun,
    role: &RoleName,
) -> Result<u64, StorageError> {
    Ok(alternate
        .try_current(gun, role)
        .await?
        .map(|meta| meta.version + 1)
        .unwrap_or(1))
}

fn signed_bytes<T: RoleMeta>(body: T, key: &SecretKey) -> Result<Bytes, TufError> {
    Ok(Bytes::from(sign_metadata(body, &[key])?.to_bytes()?))
}

/// Build the `targets/releases` delegation from the signer's root
fn releases_delegation(
    gun: &Gun,
    signer_root: &StoredMeta,
) -> Result<Delegations, GenerationError> {
    let root = Signed::<RootMeta>::from_bytes(&signer_root.data)?.signed;
    let role_keys = root
        .role_keys(&RoleName::targets())
        .ok_or_else(|| GenerationError::NoTargetsRole { gun: gun.clone() })?;

    let keys = role_keys
        .keyids
        .iter()
        .filter_map(|id| root.keys.get(id).map(|key| (id.clone(), key.clone())))
        .collect::<std::collections::BTreeMap<String, TufKey>>();

    Ok(Delegations {
        keys,
        roles: vec![DelegatedRole {
            name: RELEASES_ROLE.to_string(),
            keyids: role_keys.keyids.clone(),
            threshold: role_keys.threshold,
            paths: vec![String::new()],
        }],
    })
}

/// Derive the alternate tree for `gun` from the signer tree's current state.
///
/// Versions continue from whatever the alternate tree last held, so every
///  generated role strictly advances.
pub async fn generate(
    signer: &dyn MetaStore,
    alternate: &dyn MetaStore,
    gun: &Gun,
    registration: &RootRegistration,
) -> Result<GeneratedSet, GenerationError> {
    let sources = read_sources(signer, gun).await?;
    let signer_targets = sources
        .get(&RoleName::targets())
        .ok_or_else(|| GenerationError::NoSignerTargets(gun.clone()))?;
    let signer_root = sources
        .get(&RoleName::root())
        .ok_or_else(|| GenerationError::NoSignerRoot(gun.clone()))?;

    let releases = RoleName::releases();
    let mut updates = Vec::with_capacity(5);

    // root only moves when the registration changes
    let root_version = match alternate.try_current(gun, &RoleName::root()).await? {
        Some(current) if current.checksum == registration.root_checksum() => current.version,
        current => {
            let version = current
                .map(|c| c.version + 1)
                .unwrap_or(registration.root_version());
            updates.push(MetaUpdate::new(
                RoleName::root(),
                version,
                registration.root_bytes().clone(),
            ));
            version
        }
    };

    let releases_version = next_version(alternate, gun, &releases).await?;
    updates.push(MetaUpdate::new(
        releases.clone(),
        releases_version,
        signer_targets.data.clone(),
    ));

    let targets_version = next_version(alternate, gun, &RoleName::targets()).await?;
    let mut targets = TargetsMeta::new(targets_version);
    targets.delegations = Some(releases_delegation(gun, signer_root)?);
    let targets = signed_bytes(targets, registration.targets_key())?;
    updates.push(MetaUpdate::new(
        RoleName::targets(),
        targets_version,
        targets.clone(),
    ));

    let snapshot_version = next_version(alternate, gun, &RoleName::snapshot()).await?;
    let mut snapshot = SnapshotMeta::new(snapshot_version);
    snapshot.meta.insert(
        RoleName::root().to_string(),
        FileMeta::from_bytes(registration.root_bytes(), Some(root_version)),
    );
    snapshot.meta.insert(
        RoleName::targets().to_string(),
        FileMeta::from_bytes(&targets, Some(targets_version)),
    );
    snapshot.meta.insert(
        releases.to_string(),
        FileMeta::from_bytes(&signer_targets.data, Some(releases_version)),
    );
    for (role, meta) in sources.iter().filter(|(role, _)| role.is_delegation()) {
        snapshot.meta.insert(
            role.to_string(),
            FileMeta::from_bytes(&meta.data, Some(meta.version)),
        );
    }
    let snapshot = signed_bytes(snapshot, registration.snapshot_key())?;

    let timestamp_version = next_version(alternate, gun, &RoleName::timestamp()).await?;
    let mut timestamp = TimestampMeta::new(timestamp_version);
    timestamp.meta.insert(
        RoleName::snapshot().to_string(),
        FileMeta::from_bytes(&snapshot, Some(snapshot_version)),
    );
    let timestamp = signed_bytes(timestamp, registration.timestamp_key())?;

    updates.push(MetaUpdate::new(
        RoleName::snapshot(),
        snapshot_version,
        snapshot,
    ));
    updates.push(MetaUpdate::new(
        RoleName::timestamp(),
        timestamp_version,
        timestamp,
    ));

    Ok(GeneratedSet {
        source_digest: digest(&sources),
        updates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::OperatorKeys;
    use common::crypto::verify_role_signatures;
    use common::storage::MemStorage;
    use common::testkit::RepoBuilder;

    fn gun() -> Gun {
        Gun::parse("quay.io/signingUser/testRepo").unwrap()
    }

    fn update<'a>(set: &'a GeneratedSet, role: &RoleName) -> &'a MetaUpdate {
        set.updates.iter().find(|u| &u.role == role).unwrap()
    }

    #[tokio::test]
    async fn test_generates_consistent_set() {
        let signer = MemStorage::new();
        let alternate = MemStorage::new();
        let repo = RepoBuilder::new(gun())
            .delegation("targets/ci")
            .build()
            .unwrap();
        signer.update_many(&gun(), repo.updates()).await.unwrap();
        let registration = RootRegistration::new("quay.io/*", OperatorKeys::generate()).unwrap();

        let set = generate(&signer, &alternate, &gun(), &registration)
            .await
            .unwrap();

        assert_eq!(
            update(&set, &RoleName::releases()).data,
            repo.bytes(&RoleName::targets())
        );
        assert_eq!(
            update(&set, &RoleName::root()).data,
            registration.root_bytes().clone()
        );

        // the alternate targets delegates to the signer's targets key
        let targets_data = &update(&set, &RoleName::targets()).data;
        let targets = Signed::<TargetsMeta>::from_bytes(targets_data).unwrap();
        let delegation = targets.signed.delegation(&RoleName::releases()).unwrap();
        assert_eq!(delegation.keyids, vec![repo.keys.targets.public().key_id()]);

        // and is signed by the operator's targets key
        let root = Signed::<RootMeta>::from_bytes(registration.root_bytes()).unwrap();
        let raw: Signed<serde_json::Value> = serde_json::from_slice(targets_data).unwrap();
        verify_role_signatures(
            &raw.signed,
            &raw.signatures,
            &root.signed.keys,
            root.signed.role_keys(&RoleName::targets()).unwrap(),
        )
        .unwrap();

        let snapshot =
            Signed::<SnapshotMeta>::from_bytes(&update(&set, &RoleName::snapshot()).data).unwrap();
        assert!(snapshot.signed.meta["targets"].matches(targets_data));
        assert!(snapshot.signed.meta["targets/releases"].matches(&repo.bytes(&RoleName::targets())));
        assert!(snapshot.signed.meta.contains_key("targets/ci"));

        let timestamp =
            Signed::<TimestampMeta>::from_bytes(&update(&set, &RoleName::timestamp()).data)
                .unwrap();
        assert!(timestamp
            .signed
            .snapshot()
            .unwrap()
            .matches(&update(&set, &RoleName::snapshot()).data));
    }

    #[tokio::test]
    async fn test_versions_advance_and_root_is_written_once() {
        let signer = MemStorage::new();
        let alternate = MemStorage::new();
        let repo = RepoBuilder::new(gun()).build().unwrap();
        signer.update_many(&gun(), repo.updates()).await.unwrap();
        let registration = RootRegistration::new("quay.io/*", OperatorKeys::generate()).unwrap();

        let first = generate(&signer, &alternate, &gun(), &registration)
            .await
            .unwrap();
        alternate.update_many(&gun(), first.updates).await.unwrap();

        let next = repo.next().build().unwrap();
        signer.update_many(&gun(), next.updates()).await.unwrap();
        let second = generate(&signer, &alternate, &gun(), &registration)
            .await
            .unwrap();

        assert!(second.updates.iter().all(|u| !u.role.is_root()));
        assert!(second.updates.iter().all(|u| u.version == 2));
        assert_ne!(first.source_digest, second.source_digest);
    }

    #[tokio::test]
    async fn test_source_digest_tracks_delegations() {
        let signer = MemStorage::new();
        assert_eq!(source_digest(&signer, &gun()).await.unwrap(), None);

        let repo = RepoBuilder::new(gun())
            .delegation("targets/ci")
            .build()
            .unwrap();
        signer.update_many(&gun(), repo.updates()).await.unwrap();
        let registration = RootRegistration::new("quay.io/*", OperatorKeys::generate()).unwrap();
        let set = generate(&signer, &MemStorage::new(), &gun(), &registration)
            .await
            .unwrap();
        let before = source_digest(&signer, &gun()).await.unwrap();
        assert_eq!(before.as_deref(), Some(set.source_digest.as_str()));

        // only the delegation moves; top-level targets are untouched
        let ci = RoleName::parse("targets/ci").unwrap();
        let next = repo.next().build().unwrap();
        signer.update_many(&gun(), vec![next.update(&ci)]).await.unwrap();

        assert_ne!(source_digest(&signer, &gun()).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_no_signer_targets() {
        let registration = RootRegistration::new("quay.io/*", OperatorKeys::generate()).unwrap();
        let err = generate(&MemStorage::new(), &MemStorage::new(), &gun(), &registration)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::NoSignerTargets(_)));
    }
}
