use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use common::tuf::Gun;

use super::{Identity, RootRegistration, Tree};

/// Which tree answers a request for a repository
#[derive(Debug, Clone)]
pub enum TreeSelector {
    /// The repository is outside the eligible prefixes and is not served
    NotEligible,
    Signer,
    /// The alternate tree, generated from the registration when there is
    ///  one, otherwise a plain store of its own
    AlternateRoot(Option<Arc<RootRegistration>>),
}

impl TreeSelector {
    pub fn tree(&self) -> Option<Tree> {
        match self {
            TreeSelector::NotEligible => None,
            TreeSelector::Signer => Some(Tree::Signer),
            TreeSelector::AlternateRoot(_) => Some(Tree::AlternateRoot),
        }
    }
}

/// Maps a caller and a repository to a trust tree.
///
/// Registrations are looked up by exact repository name first, then by the
///  longest matching `host/*` wildcard.
#[derive(Debug, Clone, Default)]
pub struct RootResolver {
    prefixes: Vec<String>,
    exact: HashMap<String, Arc<RootRegistration>>,
    /// (prefix, registration), longest prefix first
    wildcards: Vec<(String, Arc<RootRegistration>)>,
    /// repository -> usernames allowed to act as its signer
    grants: HashMap<String, HashSet<String>>,
}

impl RootResolver {
    /// `prefixes` limits which repositories are served; empty means all
    pub fn new(prefixes: Vec<String>) -> Self {
        Self {
            prefixes,
            ..Default::default()
        }
    }

    pub fn with_registration(mut self, registration: RootRegistration) -> Self {
        let registration = Arc::new(registration);
        match registration.wildcard_prefix() {
            Some(prefix) => {
                let prefix = prefix.to_string();
                self.wildcards.retain(|(existing, _)| *existing != prefix);
                self.wildcards.push((prefix, registration));
                self.wildcards
                    .sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
            }
            None => {
                self.exact
                    .insert(registration.pattern().to_string(), registration);
            }
        }
        self
    }

    /// Let `username` act as the signer for `gun`
    pub fn with_grant(mut self, gun: &str, username: &str) -> Self {
        self.grants
            .entry(gun.to_string())
            .or_default()
            .insert(username.to_string());
        self
    }

    /// Prefixes match whole path segments: `quay.io` admits `quay.io/org/repo`
    ///  but not `quay.iox/org/repo`.
    pub fn is_eligible(&self, gun: &Gun) -> bool {
        self.prefixes.is_empty()
            || self
                .prefixes
                .iter()
                .any(|prefix| prefix_matches(prefix, gun.as_str()))
    }

    pub fn registration(&self, gun: &Gun) -> Option<Arc<RootRegistration>> {
        if let Some(registration) = self.exact.get(gun.as_str()) {
            return Some(registration.clone());
        }
        self.wildcards
            .iter()
            .find(|(prefix, _)| gun.as_str().starts_with(prefix.as_str()))
            .map(|(_, registration)| registration.clone())
    }

    pub fn is_signing_user(&self, gun: &Gun, identity: &Identity) -> bool {
        if let Some(tree) = identity.tree_override() {
            return tree == Tree::Signer;
        }
        if self
            .grants
            .get(gun.as_str())
            .is_some_and(|users| users.contains(identity.username()))
        {
            return true;
        }
        gun.namespace_owner() == Some(identity.username())
    }

    pub fn resolve(&self, gun: &Gun, identity: &Identity) -> TreeSelector {
        if !self.is_eligible(gun) {
            return TreeSelector::NotEligible;
        }
        if self.is_signing_user(gun, identity) {
            return TreeSelector::Signer;
        }
        TreeSelector::AlternateRoot(self.registration(gun))
    }
}

fn prefix_matches(prefix: &str, gun: &str) -> bool {
    match gun.strip_prefix(prefix) {
        Some(rest) => prefix.ends_with('/') || rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
