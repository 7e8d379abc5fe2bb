use std::collections::BTreeMap;

use anyhow::Result;
use bytes::Bytes;

use crate::crypto::{sign_metadata, SecretKey};
use crate::storage::MetaUpdate;
use crate::tuf::{
    DelegatedRole, Delegations, FileMeta, Gun, RoleName, RootMeta, SnapshotMeta, TargetsMeta,
    TimestampMeta, TufKey,
};

/// Every key a test repository is signed with
#[derive(Debug, Clone)]
pub struct RepoKeys {
    pub root: SecretKey,
    pub targets: SecretKey,
    pub snapshot: SecretKey,
    pub timestamp: SecretKey,
    /// Delegated role -> signing key
    pub delegations: BTreeMap<RoleName, SecretKey>,
}

impl RepoKeys {
    pub fn generate() -> Self {
        Self {
            root: SecretKey::generate(),
            targets: SecretKey::generate(),
            snapshot: SecretKey::generate(),
            timestamp: SecretKey::generate(),
            delegations: BTreeMap::new(),
        }
    }

    fn delegation(&mut self, role: &RoleName) -> SecretKey {
        self.delegations
            .entry(role.clone())
            .or_insert_with(SecretKey::generate)
            .clone()
    }
}

/// Builder for a signed test repository
#[derive(Debug, Clone)]
pub struct RepoBuilder {
    gun: Gun,
    keys: RepoKeys,
    version: u64,
    delegations: Vec<String>,
    targets: BTreeMap<String, Vec<u8>>,
}

impl RepoBuilder {
    pub fn new(gun: Gun) -> Self {
        Self {
            gun,
            keys: RepoKeys::generate(),
            version: 1,
            delegations: Vec::new(),
            targets: BTreeMap::new(),
        }
    }

    /// Reuse an existing set of keys
    pub fn keys(mut self, keys: RepoKeys) -> Self {
        self.keys = keys;
        self
    }

    /// Sign the snapshot with `key`, typically the server's snapshot key
    pub fn snapshot_key(mut self, key: SecretKey) -> Self {
        self.keys.snapshot = key;
        self
    }

    pub fn timestamp_key(mut self, key: SecretKey) -> Self {
        self.keys.timestamp = key;
        self
    }

    /// Version used for every role
    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Add a delegated role, e.g. `targets/releases`
    pub fn delegation(mut self, name: &str) -> Self {
        self.delegations.push(name.to_string());
        self
    }

    /// Add a target to the top-level targets role
    pub fn target(mut self, name: &str, content: &[u8]) -> Self {
        self.targets.insert(name.to_string(), content.to_vec());
        self
    }

    pub fn build(mut self) -> Result<TestRepo> {
        let version = self.version;
        let mut roles = BTreeMap::new();

        let mut root = RootMeta::new(version);
        root.set_role_keys(&RoleName::root(), &[self.keys.root.public()], 1)
            .set_role_keys(&RoleName::targets(), &[self.keys.targets.public()], 1)
            .set_role_keys(&RoleName::snapshot(), &[self.keys.snapshot.public()], 1)
            .set_role_keys(&RoleName::timestamp(), &[self.keys.timestamp.public()], 1);
        let root = sign_metadata(root, &[&self.keys.root])?.to_bytes()?;
        roles.insert(RoleName::root(), Bytes::from(root));

        let mut targets = TargetsMeta::new(version);
        for (name, content) in &self.targets {
            targets
                .targets
                .insert(name.clone(), FileMeta::from_bytes(content, None));
        }

        let mut delegated = Vec::with_capacity(self.delegations.len());
        for name in &self.delegations {
            let role = RoleName::parse(name)?;
            let key = self.keys.delegation(&role);
            delegated.push((role, key));
        }
        if !delegated.is_empty() {
            let mut delegations = Delegations::default();
            for (role, key) in &delegated {
                let public = key.public();
                delegations
                    .keys
                    .insert(public.key_id(), TufKey::from_public(&public));
                delegations.roles.push(DelegatedRole {
                    name: role.to_string(),
                    keyids: vec![public.key_id()],
                    threshold: 1,
                    paths: vec![String::new()],
                });
            }
            targets.delegations = Some(delegations);
        }
        let targets = sign_metadata(targets, &[&self.keys.targets])?.to_bytes()?;
        roles.insert(RoleName::targets(), Bytes::from(targets));

        for (role, key) in &delegated {
            let body = TargetsMeta::new(version);
            let data = sign_metadata(body, &[key])?.to_bytes()?;
            roles.insert(role.clone(), Bytes::from(data));
        }

        let mut snapshot = SnapshotMeta::new(version);
        for (role, data) in &roles {
            snapshot
                .meta
                .insert(role.to_string(), FileMeta::from_bytes(data, Some(version)));
        }
        let snapshot = Bytes::from(sign_metadata(snapshot, &[&self.keys.snapshot])?.to_bytes()?);

        let mut timestamp = TimestampMeta::new(version);
        timestamp.meta.insert(
            RoleName::snapshot().to_string(),
            FileMeta::from_bytes(&snapshot, Some(version)),
        );
        let timestamp = sign_metadata(timestamp, &[&self.keys.timestamp])?.to_bytes()?;

        roles.insert(RoleName::snapshot(), snapshot);
        roles.insert(RoleName::timestamp(), Bytes::from(timestamp));

        Ok(TestRepo {
            gun: self.gun,
            keys: self.keys,
            version,
            delegations: self.delegations,
            roles,
        })
    }
}

/// A built repository: signed bytes for every role
#[derive(Debug, Clone)]
pub struct TestRepo {
    pub gun: Gun,
    pub keys: RepoKeys,
    pub version: u64,
    delegations: Vec<String>,
    roles: BTreeMap<RoleName, Bytes>,
}

impl TestRepo {
    pub fn bytes(&self, role: &RoleName) -> Bytes {
        self.roles.get(role).cloned().unwrap_or_default()
    }

    /// Update for a single role
    pub fn update(&self, role: &RoleName) -> MetaUpdate {
        MetaUpdate::new(role.clone(), self.version, self.bytes(role))
    }

    /// What a client pushes: every role except the server-managed timestamp
    pub fn updates(&self) -> Vec<MetaUpdate> {
        self.roles
            .keys()
            .filter(|role| !role.is_timestamp())
            .map(|role| self.update(role))
            .collect()
    }

    /// Every role, timestamp included
    pub fn all_updates(&self) -> Vec<MetaUpdate> {
        self.roles.keys().map(|role| self.update(role)).collect()
    }

    /// A builder for the next version of this repository, with the same
    ///  keys and delegations
    pub fn next(&self) -> RepoBuilder {
        let mut builder = RepoBuilder::new(self.gun.clone())
            .keys(self.keys.clone())
            .version(self.version + 1);
        builder.delegations = self.delegations.clone();
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::verify_role_signatures;
    use crate::tuf::Signed;

    #[test]
    fn test_built_repo_is_consistent() {
        let gun = Gun::parse("quay.io/org/repo").unwrap();
        let repo = RepoBuilder::new(gun)
            .delegation("targets/releases")
            .target("app", b"hello")
            .build()
            .unwrap();

        let root = Signed::<RootMeta>::from_bytes(&repo.bytes(&RoleName::root())).unwrap();
        let raw: Signed<serde_json::Value> =
            serde_json::from_slice(&repo.bytes(&RoleName::targets())).unwrap();
        verify_role_signatures(
            &raw.signed,
            &raw.signatures,
            &root.signed.keys,
            root.signed.role_keys(&RoleName::targets()).unwrap(),
        )
        .unwrap();

        let snapshot =
            Signed::<SnapshotMeta>::from_bytes(&repo.bytes(&RoleName::snapshot())).unwrap();
        assert!(snapshot.signed.meta["targets/releases"]
            .matches(&repo.bytes(&RoleName::parse("targets/releases").unwrap())));

        let timestamp =
            Signed::<TimestampMeta>::from_bytes(&repo.bytes(&RoleName::timestamp())).unwrap();
        assert!(timestamp
            .signed
            .snapshot()
            .unwrap()
            .matches(&repo.bytes(&RoleName::snapshot())));
        assert_eq!(repo.updates().len(), 4);
    }

    #[test]
    fn test_next_keeps_keys_and_bumps_version() {
        let gun = Gun::parse("quay.io/org/repo").unwrap();
        let repo = RepoBuilder::new(gun).build().unwrap();
        let next = repo.next().build().unwrap();

        assert_eq!(next.version, 2);
        assert_eq!(next.keys.root.public(), repo.keys.root.public());
        assert_ne!(next.bytes(&RoleName::targets()), repo.bytes(&RoleName::targets()));
    }
}
