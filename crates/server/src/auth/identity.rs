use serde::{Deserialize, Serialize};

/// One of the two trust trees a repository can be served from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tree {
    /// Rooted at the publisher's own root key
    Signer,
    /// Rooted at an operator root key, re-wrapping the signer's content
    AlternateRoot,
}

impl std::fmt::Display for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tree::Signer => write!(f, "signer"),
            Tree::AlternateRoot => write!(f, "alternate_root"),
        }
    }
}

/// An authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    username: String,
    tree_override: Option<Tree>,
}

impl Identity {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            tree_override: None,
        }
    }

    /// Pin the caller to a tree regardless of who they are.
    ///  Only test access controllers set this.
    pub fn with_tree_override(mut self, tree: Tree) -> Self {
        self.tree_override = Some(tree);
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn tree_override(&self) -> Option<Tree> {
        self.tree_override
    }
}
