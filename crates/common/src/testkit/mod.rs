/// Test harness for building signed TUF repositories in-process
///
/// Integration tests need realistic, correctly signed metadata to push
/// through the validator and the HTTP layer. [`RepoBuilder`] produces a
/// complete repository (root, targets, optional delegations, snapshot and
/// timestamp) from freshly generated keys.
///
/// # Example
///
/// ```rust,ignore
/// use common::testkit::RepoBuilder;
///
/// let repo = RepoBuilder::new(gun.clone())
///     .delegation("targets/releases")
///     .target("app", b"v1")
///     .build()?;
///
/// store.update_many(&gun, repo.updates()).await?;
///
/// // same keys, every role one version newer
/// let next = repo.next().target("app", b"v2").build()?;
/// ```
mod repo;

pub use repo::{RepoBuilder, RepoKeys, TestRepo};
