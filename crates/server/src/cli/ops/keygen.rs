use std::path::PathBuf;

use clap::Args;

use apostille::auth::{OperatorKeys, RegistrationError, RootRegistration};
use apostille::state::{AlternateRootConfig, AppState, StateError};

#[derive(Args, Debug, Clone)]
pub struct Keygen {
    /// Name of the key directory under the state directory's keys/
    #[arg(long)]
    pub name: String,

    /// Register the keys as the alternate root for this GUN or `host/*`
    #[arg(long)]
    pub register: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum KeygenError {
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("key directory {0} already exists")]
    Exists(PathBuf),
    #[error("{0}")]
    Registration(#[from] RegistrationError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Keygen {
    type Error = KeygenError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut state = AppState::load(ctx.config_path.clone())?;

        let relative = PathBuf::from(apostille::state::KEYS_DIR_NAME).join(&self.name);
        let key_dir = state.resolve_path(&relative);
        if key_dir.exists() {
            return Err(KeygenError::Exists(key_dir));
        }
        std::fs::create_dir_all(&key_dir)?;

        let keys = OperatorKeys::generate();
        keys.write_pem(&key_dir)?;

        let mut output = format!("Wrote operator keys to {}", key_dir.display());

        if let Some(pattern) = &self.register {
            // fail before touching the config if the pattern is unusable
            let registration = RootRegistration::new(pattern, keys)?;
            state.config.alternate_roots.push(AlternateRootConfig {
                pattern: pattern.clone(),
                key_dir: relative,
            });
            state.save()?;
            output.push_str(&format!(
                "\nRegistered alternate root for {} (root checksum {})",
                registration.pattern(),
                registration.root_checksum()
            ));
        }

        Ok(output)
    }
}
