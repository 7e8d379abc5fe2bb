use clap::Args;

use apostille::state::{AppConfig, AppState, StateError};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Notary listen address
    #[arg(long, default_value = "0.0.0.0:4443")]
    pub listen_addr: String,

    /// GUN prefix eligible for trust multiplexing (repeatable, all GUNs if omitted)
    #[arg(long = "repo-prefix")]
    pub repo_prefixes: Vec<String>,

    /// Request header carrying the authenticated username
    #[arg(long, default_value = apostille::state::DEFAULT_AUTH_HEADER)]
    pub auth_header: String,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] StateError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let config = AppConfig {
            listen_addr: self.listen_addr.clone(),
            repo_prefixes: self.repo_prefixes.clone(),
            auth_header: self.auth_header.clone(),
            ..AppConfig::default()
        };

        let state = AppState::init(ctx.config_path.clone(), Some(config))?;

        let prefixes = if state.config.repo_prefixes.is_empty() {
            "all".to_string()
        } else {
            state.config.repo_prefixes.join(", ")
        };

        Ok(format!(
            "Initialized apostille directory at: {}\n\
             - Keys: {}\n\
             - Config: {}\n\
             - Listen address: {}\n\
             - Eligible prefixes: {}",
            state.app_dir.display(),
            state.keys_path.display(),
            state.config_path.display(),
            state.config.listen_addr,
            prefixes
        ))
    }
}
