use std::sync::Arc;

use serde::{Deserialize, Serialize};

use common::crypto::{sign_metadata, KeyStore, PublicKey, SecretKey};
use common::storage::{MetaStore, MetaUpdate, StorageError, StoredMeta};
use common::tuf::{FileMeta, Gun, RoleName, Signed, TimestampMeta};
use common::validation::{validate_update, ValidationError};

use super::alternate_root::{self, GenerationError};
use super::generation_cache::{Generation, GenerationCache};
use crate::auth::{Identity, RootRegistration, RootResolver, Tree, TreeSelector};
use crate::metrics::Metrics;

/// The tree a write declares itself authoritative for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Signer,
    Alternate,
}

impl Channel {
    fn tree(self) -> Tree {
        match self {
            Channel::Signer => Tree::Signer,
            Channel::Alternate => Tree::AlternateRoot,
        }
    }
}

/// One role's update, optionally tagged with a channel. Untagged updates go
///  to whichever tree the caller resolves to.
#[derive(Debug, Clone)]
pub struct ChannelUpdate {
    pub update: MetaUpdate,
    pub channel: Option<Channel>,
}

impl ChannelUpdate {
    pub fn untagged(update: MetaUpdate) -> Self {
        Self {
            update,
            channel: None,
        }
    }

    pub fn tagged(update: MetaUpdate, channel: Channel) -> Self {
        Self {
            update,
            channel: Some(channel),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MultiplexError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{0} is not eligible for trust multiplexing")]
    PrefixNotEligible(Gun),
    /// A write whose channel contradicts the caller's tree
    #[error("{role}: {msg}")]
    ChannelViolation { role: RoleName, msg: String },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StorageError> for MultiplexError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => MultiplexError::NotFound(what),
            err @ StorageError::OldVersion { .. } => MultiplexError::Validation(err.into()),
            StorageError::Internal(msg) => MultiplexError::Internal(msg),
        }
    }
}

impl From<GenerationError> for MultiplexError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::NoSignerTargets(_) | GenerationError::NoSignerRoot(_) => {
                MultiplexError::NotFound(err.to_string())
            }
            GenerationError::Storage(err) => err.into(),
            other => MultiplexError::Internal(other.to_string()),
        }
    }
}

/// How a historical lookup identifies a blob
#[derive(Debug, Clone, Copy)]
enum Lookup<'a> {
    Version(u64),
    Checksum(&'a str),
}

/// Serves two trust trees for every repository and decides, per caller,
///  which one answers.
///
/// Cloning is cheap; clones share stores, keys and generation state.
#[derive(Debug, Clone)]
pub struct MultiplexingStore {
    signer: Arc<dyn MetaStore>,
    alternate: Arc<dyn MetaStore>,
    signer_keys: KeyStore,
    alternate_keys: KeyStore,
    cache: Arc<GenerationCache>,
    resolver: Arc<RootResolver>,
    metrics: Option<Metrics>,
}

impl MultiplexingStore {
    pub fn new(
        signer: Arc<dyn MetaStore>,
        alternate: Arc<dyn MetaStore>,
        resolver: RootResolver,
    ) -> Self {
        Self {
            signer,
            alternate,
            signer_keys: KeyStore::new(),
            alternate_keys: KeyStore::new(),
            cache: Arc::new(GenerationCache::new()),
            resolver: Arc::new(resolver),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn resolver(&self) -> &RootResolver {
        &self.resolver
    }

    pub fn resolve(&self, gun: &Gun, identity: &Identity) -> TreeSelector {
        self.resolver.resolve(gun, identity)
    }

    /// The store backing a tree, for seeding and inspection
    pub fn tree_store(&self, tree: Tree) -> &Arc<dyn MetaStore> {
        match tree {
            Tree::Signer => &self.signer,
            Tree::AlternateRoot => &self.alternate,
        }
    }

    pub fn generation(&self, gun: &Gun) -> Option<Generation> {
        self.cache.get(gun)
    }

    /// Current metadata for a role in the caller's tree
    pub async fn get_current(
        &self,
        gun: &Gun,
        role: &RoleName,
        identity: &Identity,
    ) -> Result<StoredMeta, MultiplexError> {
        match self.resolve(gun, identity) {
            TreeSelector::NotEligible => Err(not_found(gun, role)),
            TreeSelector::Signer => {
                if role.is_timestamp() {
                    let keys = self.signer_keys.clone();
                    let (g, r) = (gun.clone(), RoleName::timestamp());
                    return self
                        .current_timestamp(&*self.signer, gun, Tree::Signer, move || {
                            keys.get_or_create(&g, &r)
                        })
                        .await;
                }
                Ok(self.signer.get_current(gun, role).await?)
            }
            TreeSelector::AlternateRoot(None) => {
                if role.is_timestamp() {
                    let keys = self.alternate_keys.clone();
                    let (g, r) = (gun.clone(), RoleName::timestamp());
                    return self
                        .current_timestamp(&*self.alternate, gun, Tree::AlternateRoot, move || {
                            keys.get_or_create(&g, &r)
                        })
                        .await;
                }
                match self.alternate.try_current(gun, role).await? {
                    Some(meta) => Ok(meta),
                    None => self.shared_delegation(gun, role, None).await,
                }
            }
            TreeSelector::AlternateRoot(Some(registration)) => {
                match self.ensure_generated(gun, &registration).await {
                    Ok(()) => {}
                    Err(MultiplexError::NotFound(msg)) => {
                        tracing::debug!(gun = %gun, %msg, "nothing to generate alternate root tree from");
                    }
                    // whatever was generated last is still consistent
                    Err(e) => {
                        tracing::warn!(gun = %gun, error = %e, "alternate root regeneration failed");
                    }
                }
                if role.is_delegation() && *role != RoleName::releases() {
                    return Ok(self.signer.get_current(gun, role).await?);
                }
                if role.is_timestamp() {
                    let key = registration.timestamp_key().clone();
                    return self
                        .current_timestamp(&*self.alternate, gun, Tree::AlternateRoot, move || key)
                        .await;
                }
                Ok(self.alternate.get_current(gun, role).await?)
            }
        }
    }

    pub async fn get_by_version(
        &self,
        gun: &Gun,
        role: &RoleName,
        version: u64,
        identity: &Identity,
    ) -> Result<StoredMeta, MultiplexError> {
        self.get_historical(gun, role, Lookup::Version(version), identity)
            .await
    }

    pub async fn get_by_checksum(
        &self,
        gun: &Gun,
        role: &RoleName,
        checksum: &str,
        identity: &Identity,
    ) -> Result<StoredMeta, MultiplexError> {
        self.get_historical(gun, role, Lookup::Checksum(checksum), identity)
            .await
    }

    async fn get_historical(
        &self,
        gun: &Gun,
        role: &RoleName,
        lookup: Lookup<'_>,
        identity: &Identity,
    ) -> Result<StoredMeta, MultiplexError> {
        match self.resolve(gun, identity) {
            TreeSelector::NotEligible => Err(not_found(gun, role)),
            TreeSelector::Signer => Ok(lookup_in(&*self.signer, gun, role, lookup).await?),
            TreeSelector::AlternateRoot(None) => {
                match lookup_in(&*self.alternate, gun, role, lookup).await {
                    Err(StorageError::NotFound(_)) => {
                        self.shared_delegation(gun, role, Some(lookup)).await
                    }
                    other => Ok(other?),
                }
            }
            TreeSelector::AlternateRoot(Some(_)) => {
                if role.is_delegation() && *role != RoleName::releases() {
                    return Ok(lookup_in(&*self.signer, gun, role, lookup).await?);
                }
                Ok(lookup_in(&*self.alternate, gun, role, lookup).await?)
            }
        }
    }

    /// Delegated roles an alternate tree without a registration does not
    ///  hold itself are shared from the signer tree, with `targets/releases`
    ///  standing in for the signer's top-level targets.
    async fn shared_delegation(
        &self,
        gun: &Gun,
        role: &RoleName,
        lookup: Option<Lookup<'_>>,
    ) -> Result<StoredMeta, MultiplexError> {
        if !role.is_delegation() {
            return Err(not_found(gun, role));
        }
        let source = if *role == RoleName::releases() {
            RoleName::targets()
        } else {
            role.clone()
        };
        let mut meta = match lookup {
            Some(lookup) => lookup_in(&*self.signer, gun, &source, lookup).await?,
            None => self.signer.get_current(gun, &source).await?,
        };
        meta.role = role.clone();
        Ok(meta)
    }

    /// Apply a batch of updates to the caller's tree.
    ///
    /// Every update must belong to the caller's tree; the batch is validated
    ///  against that tree and written all at once.
    pub async fn update_many(
        &self,
        gun: &Gun,
        updates: Vec<ChannelUpdate>,
        identity: &Identity,
    ) -> Result<(), MultiplexError> {
        let (tree, store, keys) = match self.resolve(gun, identity) {
            TreeSelector::NotEligible => {
                return Err(MultiplexError::PrefixNotEligible(gun.clone()))
            }
            TreeSelector::Signer => (Tree::Signer, &self.signer, &self.signer_keys),
            TreeSelector::AlternateRoot(None) => {
                (Tree::AlternateRoot, &self.alternate, &self.alternate_keys)
            }
            TreeSelector::AlternateRoot(Some(registration)) => {
                let role = updates
                    .first()
                    .map(|u| u.update.role.clone())
                    .unwrap_or_else(RoleName::root);
                return Err(MultiplexError::ChannelViolation {
                    role,
                    msg: format!(
                        "the alternate root tree for {} is generated from {} and cannot be written",
                        gun,
                        registration.pattern()
                    ),
                });
            }
        };

        let mut batch = Vec::with_capacity(updates.len());
        for ChannelUpdate { update, channel } in updates {
            if let Some(channel) = channel {
                if channel.tree() != tree {
                    return Err(MultiplexError::ChannelViolation {
                        role: update.role,
                        msg: format!(
                            "update tagged for the {} tree but caller {} writes the {} tree",
                            channel.tree(),
                            identity.username(),
                            tree
                        ),
                    });
                }
            }
            batch.push(update);
        }

        let batch = validate_update(&**store, keys, gun, batch).await?;
        let roles = batch
            .iter()
            .map(|u| u.role.to_string())
            .collect::<Vec<_>>();
        store.update_many(gun, batch).await?;

        tracing::info!(gun = %gun, tree = %tree, ?roles, "stored metadata update");
        Ok(())
    }

    /// Delete a repository from every tree the caller controls
    pub async fn delete(&self, gun: &Gun, identity: &Identity) -> Result<(), MultiplexError> {
        match self.resolve(gun, identity) {
            TreeSelector::NotEligible => Err(MultiplexError::NotFound(gun.to_string())),
            TreeSelector::Signer => {
                let lock = self.cache.lock_for(gun);
                let _guard = lock.lock().await;

                let signer = self.signer.delete(gun).await;
                let alternate = self.alternate.delete(gun).await;
                self.signer_keys.delete_gun(gun);
                self.alternate_keys.delete_gun(gun);
                self.cache.remove(gun);

                match (signer, alternate) {
                    (Err(StorageError::NotFound(_)), Err(StorageError::NotFound(_))) => {
                        Err(MultiplexError::NotFound(gun.to_string()))
                    }
                    (Err(e @ StorageError::Internal(_)), _)
                    | (_, Err(e @ StorageError::Internal(_))) => Err(e.into()),
                    _ => {
                        tracing::info!(gun = %gun, "deleted repository from both trees");
                        Ok(())
                    }
                }
            }
            TreeSelector::AlternateRoot(None) => {
                self.alternate.delete(gun).await?;
                self.alternate_keys.delete_gun(gun);
                tracing::info!(gun = %gun, "deleted repository from alternate tree");
                Ok(())
            }
            TreeSelector::AlternateRoot(Some(_)) => Err(MultiplexError::Forbidden(format!(
                "only the signer may delete {}",
                gun
            ))),
        }
    }

    /// Remove everything held for a repository regardless of caller.
    ///  Used to reset state between tests.
    pub async fn delete_all(&self, gun: &Gun) -> Result<(), MultiplexError> {
        for store in [&self.signer, &self.alternate] {
            match store.delete(gun).await {
                Ok(()) | Err(StorageError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.signer_keys.delete_gun(gun);
        self.alternate_keys.delete_gun(gun);
        self.cache.remove(gun);
        Ok(())
    }

    /// Public half of the server-held key for `role`
    pub async fn get_key(
        &self,
        gun: &Gun,
        role: &RoleName,
        identity: &Identity,
    ) -> Result<PublicKey, MultiplexError> {
        if !role.is_server_signable() {
            return Err(not_found(gun, role));
        }
        match self.resolve(gun, identity) {
            TreeSelector::NotEligible => Err(not_found(gun, role)),
            TreeSelector::Signer => Ok(self.signer_keys.get_or_create(gun, role).public()),
            TreeSelector::AlternateRoot(None) => {
                Ok(self.alternate_keys.get_or_create(gun, role).public())
            }
            TreeSelector::AlternateRoot(Some(registration)) => Ok(if role.is_snapshot() {
                registration.snapshot_key().public()
            } else {
                registration.timestamp_key().public()
            }),
        }
    }

    /// Replace the server-held key for `role`
    pub async fn rotate_key(
        &self,
        gun: &Gun,
        role: &RoleName,
        identity: &Identity,
    ) -> Result<PublicKey, MultiplexError> {
        if !role.is_server_signable() {
            return Err(not_found(gun, role));
        }
        match self.resolve(gun, identity) {
            TreeSelector::NotEligible => Err(not_found(gun, role)),
            TreeSelector::Signer => Ok(self.signer_keys.rotate(gun, role).public()),
            TreeSelector::AlternateRoot(None) => Ok(self.alternate_keys.rotate(gun, role).public()),
            TreeSelector::AlternateRoot(Some(registration)) => Err(MultiplexError::Conflict(
                format!(
                    "{} keys for {} belong to the operator root {}",
                    role,
                    gun,
                    registration.pattern()
                ),
            )),
        }
    }

    /// The current timestamp of a tree, re-signed first if it no longer
    ///  describes the current snapshot.
    async fn current_timestamp(
        &self,
        store: &dyn MetaStore,
        gun: &Gun,
        tree: Tree,
        key: impl FnOnce() -> SecretKey,
    ) -> Result<StoredMeta, MultiplexError> {
        let role = RoleName::timestamp();
        let timestamp = store.try_current(gun, &role).await?;
        let Some(snapshot) = store.try_current(gun, &RoleName::snapshot()).await? else {
            return timestamp.ok_or_else(|| not_found(gun, &role));
        };

        if let Some(current) = &timestamp {
            let fresh = Signed::<TimestampMeta>::from_bytes(&current.data)
                .ok()
                .and_then(|ts| ts.signed.snapshot().map(|meta| meta.matches(&snapshot.data)))
                .unwrap_or(false);
            if fresh {
                return Ok(current.clone());
            }
        }

        let version = timestamp.as_ref().map(|t| t.version + 1).unwrap_or(1);
        let mut body = TimestampMeta::new(version);
        body.meta.insert(
            RoleName::snapshot().to_string(),
            FileMeta::from_bytes(&snapshot.data, Some(snapshot.version)),
        );
        let data = sign_metadata(body, &[&key()])
            .and_then(|signed| signed.to_bytes())
            .map_err(|e| MultiplexError::Internal(e.to_string()))?;

        match store
            .update_current(gun, MetaUpdate::new(role.clone(), version, data))
            .await
        {
            Ok(()) => {
                tracing::debug!(gun = %gun, tree = %tree, version, "re-signed stale timestamp");
                if let Some(metrics) = &self.metrics {
                    metrics.timestamp_refreshed(&tree.to_string());
                }
            }
            // a concurrent reader refreshed it first
            Err(StorageError::OldVersion { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(store.get_current(gun, &role).await?)
    }

    /// Make sure the alternate tree reflects the signer's current root,
    ///  targets and delegations, under the current operator root.
    ///
    /// Regeneration runs on its own task so that a caller going away does
    ///  not leave it half done.
    async fn ensure_generated(
        &self,
        gun: &Gun,
        registration: &Arc<RootRegistration>,
    ) -> Result<(), MultiplexError> {
        let digest = alternate_root::source_digest(&*self.signer, gun)
            .await?
            .ok_or_else(|| GenerationError::NoSignerTargets(gun.clone()))?;
        if self
            .cache
            .is_current(gun, &digest, registration.root_checksum())
        {
            return Ok(());
        }

        let this = self.clone();
        let gun = gun.clone();
        let registration = registration.clone();
        tokio::spawn(async move { this.regenerate(&gun, &registration).await })
            .await
            .map_err(|e| MultiplexError::Internal(format!("regeneration task failed: {}", e)))?
    }

    async fn regenerate(
        &self,
        gun: &Gun,
        registration: &RootRegistration,
    ) -> Result<(), MultiplexError> {
        let lock = self.cache.lock_for(gun);
        let _guard = lock.lock().await;

        // someone else may have finished while we waited
        if let Some(digest) = alternate_root::source_digest(&*self.signer, gun).await? {
            if self
                .cache
                .is_current(gun, &digest, registration.root_checksum())
            {
                return Ok(());
            }
        }

        let result = async {
            let generated =
                alternate_root::generate(&*self.signer, &*self.alternate, gun, registration)
                    .await?;
            let digest = generated.source_digest.clone();
            self.alternate.update_many(gun, generated.updates).await?;
            Ok::<_, MultiplexError>(digest)
        }
        .await;

        match result {
            Ok(source_digest) => {
                let previous = self.cache.get(gun).map(|g| g.generated_at);
                tracing::info!(
                    gun = %gun,
                    pattern = registration.pattern(),
                    ?previous,
                    "regenerated alternate root tree"
                );
                self.cache.record(
                    gun,
                    Generation {
                        source_digest,
                        root_checksum: registration.root_checksum().to_string(),
                        generated_at: chrono::Utc::now(),
                    },
                );
                if let Some(metrics) = &self.metrics {
                    metrics.regeneration("success");
                }
                Ok(())
            }
            Err(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.regeneration("failure");
                }
                Err(e)
            }
        }
    }
}

fn not_found(gun: &Gun, role: &RoleName) -> MultiplexError {
    MultiplexError::NotFound(format!("{} {}", gun, role))
}

async fn lookup_in(
    store: &dyn MetaStore,
    gun: &Gun,
    role: &RoleName,
    lookup: Lookup<'_>,
) -> Result<StoredMeta, StorageError> {
    match lookup {
        Lookup::Version(version) => store.get_version(gun, role, version).await,
        Lookup::Checksum(checksum) => store.get_checksum(gun, role, checksum).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::OperatorKeys;
    use common::storage::MemStorage;
    use common::testkit::{RepoBuilder, TestRepo};
    use common::tuf::SnapshotMeta;

    const GUN: &str = "quay.io/signingUser/testRepo";

    fn gun() -> Gun {
        Gun::parse(GUN).unwrap()
    }

    fn signer() -> Identity {
        Identity::new("signingUser")
    }

    fn other() -> Identity {
        Identity::new("nonsigning-user")
    }

    fn store(resolver: RootResolver) -> MultiplexingStore {
        MultiplexingStore::new(
            Arc::new(MemStorage::new()),
            Arc::new(MemStorage::new()),
            resolver,
        )
    }

    fn registered() -> (MultiplexingStore, RootRegistration) {
        let registration = RootRegistration::new(GUN, OperatorKeys::generate()).unwrap();
        let store = store(RootResolver::new(vec![]).with_registration(registration.clone()));
        (store, registration)
    }

    async fn push(store: &MultiplexingStore, repo: &TestRepo, identity: &Identity) {
        let updates = repo
            .all_updates()
            .into_iter()
            .map(ChannelUpdate::untagged)
            .collect();
        store.update_many(&gun(), updates, identity).await.unwrap();
    }

    async fn current(store: &MultiplexingStore, role: &RoleName, identity: &Identity) -> StoredMeta {
        store.get_current(&gun(), role, identity).await.unwrap()
    }

    #[tokio::test]
    async fn test_signer_reads_what_it_pushed() {
        let (store, _) = registered();
        let repo = RepoBuilder::new(gun()).build().unwrap();
        push(&store, &repo, &signer()).await;

        for role in [RoleName::root(), RoleName::targets(), RoleName::snapshot(), RoleName::timestamp()] {
            assert_eq!(current(&store, &role, &signer()).await.data, repo.bytes(&role));
        }
    }

    #[tokio::test]
    async fn test_trees_diverge_under_registration() {
        let (store, registration) = registered();
        let repo = RepoBuilder::new(gun())
            .delegation("targets/ci")
            .build()
            .unwrap();
        push(&store, &repo, &signer()).await;

        for role in [RoleName::root(), RoleName::targets(), RoleName::snapshot()] {
            assert_ne!(current(&store, &role, &other()).await.data, repo.bytes(&role));
        }
        assert_eq!(
            &current(&store, &RoleName::root(), &other()).await.data,
            registration.root_bytes()
        );

        // pass-through roles are identical whoever asks
        assert_eq!(
            current(&store, &RoleName::releases(), &other()).await.data,
            current(&store, &RoleName::targets(), &signer()).await.data
        );
        let ci = RoleName::parse("targets/ci").unwrap();
        assert_eq!(
            current(&store, &ci, &other()).await.data,
            current(&store, &ci, &signer()).await.data
        );

        let timestamp = current(&store, &RoleName::timestamp(), &other()).await;
        let snapshot = current(&store, &RoleName::snapshot(), &other()).await;
        let timestamp = Signed::<TimestampMeta>::from_bytes(&timestamp.data).unwrap();
        assert!(timestamp.signed.snapshot().unwrap().matches(&snapshot.data));
    }

    #[tokio::test]
    async fn test_regeneration_follows_signer_targets() {
        let (store, _) = registered();
        let repo = RepoBuilder::new(gun()).build().unwrap();
        push(&store, &repo, &signer()).await;

        let first = current(&store, &RoleName::targets(), &other()).await;
        // reading again without a signer push reuses the generated set
        assert_eq!(current(&store, &RoleName::targets(), &other()).await, first);

        let next = repo.next().target("app", b"v2").build().unwrap();
        push(&store, &next, &signer()).await;

        let second = current(&store, &RoleName::targets(), &other()).await;
        assert_eq!(second.version, first.version + 1);
        assert_eq!(
            current(&store, &RoleName::releases(), &other()).await.data,
            next.bytes(&RoleName::targets())
        );
    }

    #[tokio::test]
    async fn test_delegation_push_regenerates_snapshot() {
        let (store, _) = registered();
        let repo = RepoBuilder::new(gun())
            .delegation("targets/ci")
            .build()
            .unwrap();
        push(&store, &repo, &signer()).await;
        let ci = RoleName::parse("targets/ci").unwrap();
        let first = current(&store, &RoleName::snapshot(), &other()).await;
        let first_generated = store.generation(&gun()).unwrap().generated_at;

        // only the delegation and the signer's snapshot move
        let next = repo.next().build().unwrap();
        let updates = vec![
            ChannelUpdate::untagged(next.update(&ci)),
            ChannelUpdate::untagged(next.update(&RoleName::snapshot())),
        ];
        store.update_many(&gun(), updates, &signer()).await.unwrap();

        let served_ci = current(&store, &ci, &other()).await;
        assert_eq!(served_ci.data, next.bytes(&ci));

        let snapshot = current(&store, &RoleName::snapshot(), &other()).await;
        assert_eq!(snapshot.version, first.version + 1);
        let body = Signed::<SnapshotMeta>::from_bytes(&snapshot.data).unwrap();
        assert!(body.signed.meta["targets/ci"].matches(&served_ci.data));
        assert!(store.generation(&gun()).unwrap().generated_at >= first_generated);

        let timestamp = current(&store, &RoleName::timestamp(), &other()).await;
        let timestamp = Signed::<TimestampMeta>::from_bytes(&timestamp.data).unwrap();
        assert!(timestamp.signed.snapshot().unwrap().matches(&snapshot.data));
    }

    #[tokio::test]
    async fn test_failed_regeneration_keeps_previous_set() {
        let (store, _) = registered();
        let metrics = Metrics::new().unwrap();
        let store = store.with_metrics(metrics.clone());
        let repo = RepoBuilder::new(gun()).build().unwrap();
        push(&store, &repo, &signer()).await;

        let roles = [
            RoleName::root(),
            RoleName::targets(),
            RoleName::releases(),
            RoleName::snapshot(),
            RoleName::timestamp(),
        ];
        let mut before = Vec::new();
        for role in &roles {
            before.push(current(&store, role, &other()).await);
        }

        // new signer targets under a root nothing can parse
        store
            .tree_store(Tree::Signer)
            .update_many(
                &gun(),
                vec![
                    MetaUpdate::new(RoleName::root(), 2, bytes::Bytes::from_static(b"not json")),
                    MetaUpdate::new(RoleName::targets(), 2, bytes::Bytes::from_static(b"{}")),
                ],
            )
            .await
            .unwrap();

        for (role, previous) in roles.iter().zip(&before) {
            assert_eq!(&current(&store, role, &other()).await, previous);
        }
        let text = metrics.encode_text().unwrap();
        assert!(text.contains("apostille_regenerations_total{outcome=\"success\"} 1"));
        assert!(text.contains("apostille_regenerations_total{outcome=\"failure\"}"));
    }

    #[tokio::test]
    async fn test_concurrent_reads_generate_once() {
        let (store, _) = registered();
        let metrics = Metrics::new().unwrap();
        let store = store.with_metrics(metrics.clone());
        let repo = RepoBuilder::new(gun()).build().unwrap();
        push(&store, &repo, &signer()).await;

        let reads = (0..8).map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .get_current(&gun(), &RoleName::snapshot(), &other())
                    .await
            })
        });
        let results = futures::future::join_all(reads).await;
        let snapshots = results
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect::<Vec<_>>();

        assert!(snapshots.iter().all(|s| s.version == 1));
        assert!(snapshots.iter().all(|s| s.data == snapshots[0].data));
        let text = metrics.encode_text().unwrap();
        assert!(text.contains("apostille_regenerations_total{outcome=\"success\"} 1"));
    }

    #[tokio::test]
    async fn test_nothing_generated_without_signer_targets() {
        let (store, _) = registered();
        let err = store
            .get_current(&gun(), &RoleName::root(), &other())
            .await
            .unwrap_err();
        assert!(matches!(err, MultiplexError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stale_timestamp_is_resigned() {
        let store = store(RootResolver::new(vec![]));
        let repo = RepoBuilder::new(gun()).build().unwrap();
        push(&store, &repo, &signer()).await;

        // new snapshot, no new timestamp
        let next = repo.next().build().unwrap();
        let updates = next
            .updates()
            .into_iter()
            .map(ChannelUpdate::untagged)
            .collect();
        store.update_many(&gun(), updates, &signer()).await.unwrap();

        let timestamp = current(&store, &RoleName::timestamp(), &signer()).await;
        assert_eq!(timestamp.version, 2);
        let body = Signed::<TimestampMeta>::from_bytes(&timestamp.data).unwrap();
        assert!(body
            .signed
            .snapshot()
            .unwrap()
            .matches(&next.bytes(&RoleName::snapshot())));

        // and it is signed with the server's timestamp key
        let key = store
            .get_key(&gun(), &RoleName::timestamp(), &signer())
            .await
            .unwrap();
        assert_eq!(body.signatures[0].keyid, key.key_id());
    }

    #[tokio::test]
    async fn test_channel_mismatch_is_rejected() {
        let store = store(RootResolver::new(vec![]));
        let repo = RepoBuilder::new(gun()).build().unwrap();

        let tagged = repo
            .updates()
            .into_iter()
            .map(|u| ChannelUpdate::tagged(u, Channel::Alternate))
            .collect();
        let err = store
            .update_many(&gun(), tagged, &signer())
            .await
            .unwrap_err();
        assert!(matches!(err, MultiplexError::ChannelViolation { .. }));

        let tagged = repo
            .updates()
            .into_iter()
            .map(|u| ChannelUpdate::tagged(u, Channel::Signer))
            .collect();
        let err = store
            .update_many(&gun(), tagged, &other())
            .await
            .unwrap_err();
        assert!(matches!(err, MultiplexError::ChannelViolation { .. }));
    }

    #[tokio::test]
    async fn test_trees_are_isolated_without_registration() {
        let store = store(RootResolver::new(vec![]));
        let published = RepoBuilder::new(gun()).build().unwrap();
        let unrelated = RepoBuilder::new(gun()).build().unwrap();
        push(&store, &published, &signer()).await;
        push(&store, &unrelated, &other()).await;

        for role in [RoleName::root(), RoleName::targets(), RoleName::snapshot()] {
            assert_eq!(current(&store, &role, &signer()).await.data, published.bytes(&role));
            assert_eq!(current(&store, &role, &other()).await.data, unrelated.bytes(&role));
        }
        // the alternate tree falls back to the signer for pass-through roles
        assert_eq!(
            current(&store, &RoleName::releases(), &other()).await.data,
            published.bytes(&RoleName::targets())
        );
    }

    #[tokio::test]
    async fn test_registered_alternate_tree_is_read_only() {
        let (store, _) = registered();
        let repo = RepoBuilder::new(gun()).build().unwrap();
        let updates = repo
            .updates()
            .into_iter()
            .map(ChannelUpdate::untagged)
            .collect();
        let err = store
            .update_many(&gun(), updates, &other())
            .await
            .unwrap_err();
        assert!(matches!(err, MultiplexError::ChannelViolation { .. }));

        assert!(matches!(
            store.delete(&gun(), &other()).await,
            Err(MultiplexError::Forbidden(_))
        ));
        assert!(matches!(
            store.rotate_key(&gun(), &RoleName::timestamp(), &other()).await,
            Err(MultiplexError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_prefix_gate() {
        let store = store(RootResolver::new(vec!["nope".into()]));
        let repo = RepoBuilder::new(gun()).build().unwrap();
        let updates = repo
            .updates()
            .into_iter()
            .map(ChannelUpdate::untagged)
            .collect();
        assert!(matches!(
            store.update_many(&gun(), updates, &signer()).await,
            Err(MultiplexError::PrefixNotEligible(_))
        ));

        // seeding the backing store directly does not make it readable
        store
            .tree_store(Tree::Signer)
            .update_many(&gun(), repo.all_updates())
            .await
            .unwrap();
        assert!(matches!(
            store.get_current(&gun(), &RoleName::snapshot(), &signer()).await,
            Err(MultiplexError::NotFound(_))
        ));
        assert!(matches!(
            store.get_key(&gun(), &RoleName::timestamp(), &signer()).await,
            Err(MultiplexError::NotFound(_))
        ));
        assert!(matches!(
            store.delete(&gun(), &signer()).await,
            Err(MultiplexError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_key_endpoints_only_serve_server_roles() {
        let store = store(RootResolver::new(vec![]));
        for role in ["snapshot", "timestamp"] {
            let role = RoleName::parse(role).unwrap();
            let key = store.get_key(&gun(), &role, &signer()).await.unwrap();
            let rotated = store.rotate_key(&gun(), &role, &signer()).await.unwrap();
            assert_ne!(key, rotated);
        }
        for role in ["root", "targets", "targets/delegation"] {
            let role = RoleName::parse(role).unwrap();
            assert!(matches!(
                store.get_key(&gun(), &role, &signer()).await,
                Err(MultiplexError::NotFound(_))
            ));
            assert!(matches!(
                store.rotate_key(&gun(), &role, &signer()).await,
                Err(MultiplexError::NotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_signer_delete_clears_both_trees() {
        let (store, _) = registered();
        let repo = RepoBuilder::new(gun()).build().unwrap();
        push(&store, &repo, &signer()).await;
        current(&store, &RoleName::snapshot(), &other()).await;
        assert!(store.generation(&gun()).is_some());

        store.delete(&gun(), &signer()).await.unwrap();
        assert!(store.generation(&gun()).is_none());
        assert!(store
            .get_current(&gun(), &RoleName::root(), &signer())
            .await
            .is_err());
        assert!(matches!(
            store.delete(&gun(), &signer()).await,
            Err(MultiplexError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_all_resets_repository() {
        let (store, _) = registered();
        // nothing stored yet is fine
        store.delete_all(&gun()).await.unwrap();

        let repo = RepoBuilder::new(gun()).build().unwrap();
        push(&store, &repo, &signer()).await;
        current(&store, &RoleName::snapshot(), &other()).await;
        let key = store
            .get_key(&gun(), &RoleName::timestamp(), &signer())
            .await
            .unwrap();

        store.delete_all(&gun()).await.unwrap();
        assert!(store.generation(&gun()).is_none());
        for tree in [Tree::Signer, Tree::AlternateRoot] {
            assert!(store
                .tree_store(tree)
                .current_roles(&gun())
                .await
                .unwrap()
                .is_empty());
        }
        assert_ne!(
            store
                .get_key(&gun(), &RoleName::timestamp(), &signer())
                .await
                .unwrap(),
            key
        );

        // the repository can be pushed again from scratch
        push(&store, &repo, &signer()).await;
        assert_eq!(
            current(&store, &RoleName::root(), &signer()).await.data,
            repo.bytes(&RoleName::root())
        );
    }
}
