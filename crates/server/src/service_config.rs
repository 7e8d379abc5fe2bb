use std::path::PathBuf;

use crate::http_server::CacheControlConfig;
use crate::state::{AppState, SignerGrant, StateError};

/// Everything needed to run the notary service, resolved from the state
///  directory and command line overrides
#[derive(Debug, Clone)]
pub struct Config {
    // http server configuration
    /// address to listen on, e.g. `0.0.0.0:4443`
    pub listen_addr: String,
    pub cache_control: CacheControlConfig,

    // access control
    /// header the access controller reads the username from
    pub auth_header: String,

    // trust multiplexing
    /// GUN prefixes eligible for multiplexing, empty means every GUN
    pub repo_prefixes: Vec<String>,
    pub signers: Vec<SignerGrant>,
    /// (pattern, absolute key directory) per operator root
    pub alternate_roots: Vec<(String, PathBuf)>,

    // logging
    pub log_level: tracing::Level,
    /// Directory for log files (optional, logs to stdout only if not set)
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_state(state: &AppState) -> Result<Self, StateError> {
        let config = &state.config;
        Ok(Self {
            listen_addr: config.listen_addr.clone(),
            cache_control: config.cache,
            auth_header: config.auth_header.clone(),
            repo_prefixes: config.repo_prefixes.clone(),
            signers: config.signers.clone(),
            alternate_roots: config
                .alternate_roots
                .iter()
                .map(|root| (root.pattern.clone(), state.resolve_path(&root.key_dir)))
                .collect(),
            log_level: state.log_level()?,
            log_dir: config.log_dir.as_deref().map(|dir| state.resolve_path(dir)),
        })
    }
}
