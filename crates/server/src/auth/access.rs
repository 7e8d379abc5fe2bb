use std::fmt::Debug;
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName};
use parking_lot::RwLock;

use super::{Identity, Tree};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing credentials: no {0} header")]
    MissingCredentials(String),
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("invalid access controller configuration: {0}")]
    Config(String),
}

/// Resolves a request to the identity making it
pub trait AccessController: Send + Sync + Debug + 'static {
    fn authorize(&self, headers: &HeaderMap) -> Result<Identity, AuthError>;
}

/// Trusts a username header set by an authenticating proxy in front of
///  the server.
#[derive(Debug, Clone)]
pub struct HeaderAccessController {
    header: HeaderName,
}

impl HeaderAccessController {
    pub fn new(header: &str) -> Result<Self, AuthError> {
        let header = HeaderName::from_bytes(header.as_bytes())
            .map_err(|e| AuthError::Config(format!("bad header name {:?}: {}", header, e)))?;
        Ok(Self { header })
    }
}

impl AccessController for HeaderAccessController {
    fn authorize(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        let value = headers
            .get(&self.header)
            .ok_or_else(|| AuthError::MissingCredentials(self.header.to_string()))?;
        let username = value
            .to_str()
            .map_err(|_| AuthError::InvalidCredentials("username is not valid ascii".into()))?
            .trim();
        if username.is_empty() {
            return Err(AuthError::MissingCredentials(self.header.to_string()));
        }
        Ok(Identity::new(username))
    }
}

/// Authorizes every request as a fixed, switchable user
#[derive(Debug, Clone)]
pub struct TestingAccessController {
    identity: Arc<RwLock<Identity>>,
}

impl TestingAccessController {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            identity: Arc::new(RwLock::new(Identity::new(username))),
        }
    }

    pub fn set_username(&self, username: impl Into<String>) {
        let mut identity = self.identity.write();
        let tree = identity.tree_override();
        *identity = Identity::new(username);
        if let Some(tree) = tree {
            *identity = identity.clone().with_tree_override(tree);
        }
    }

    pub fn set_tree_override(&self, tree: Option<Tree>) {
        let mut identity = self.identity.write();
        let base = Identity::new(identity.username());
        *identity = match tree {
            Some(tree) => base.with_tree_override(tree),
            None => base,
        };
    }
}

impl AccessController for TestingAccessController {
    fn authorize(&self, _headers: &HeaderMap) -> Result<Identity, AuthError> {
        Ok(self.identity.read().clone())
    }
}
