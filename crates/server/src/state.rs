use std::{fs, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::http_server::CacheControlConfig;

pub const APP_NAME: &str = "apostille";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const KEYS_DIR_NAME: &str = "keys";
pub const LOGS_DIR_NAME: &str = "logs";

/// Header carrying the authenticated username, set by the fronting proxy
pub const DEFAULT_AUTH_HEADER: &str = "x-apostille-user";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Address the notary server listens on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// One of trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory for rolling log files, stdout only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// GUN prefixes eligible for trust multiplexing; empty means all
    #[serde(default)]
    pub repo_prefixes: Vec<String>,
    /// Request header the access controller reads the username from
    #[serde(default = "default_auth_header")]
    pub auth_header: String,
    #[serde(default)]
    pub cache: CacheControlConfig,
    /// Users allowed to sign a GUN besides its namespace owner
    #[serde(default)]
    pub signers: Vec<SignerGrant>,
    /// Operator roots of trust served to non-signing users
    #[serde(default)]
    pub alternate_roots: Vec<AlternateRootConfig>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:4443".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_auth_header() -> String {
    DEFAULT_AUTH_HEADER.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            log_level: default_log_level(),
            log_dir: None,
            repo_prefixes: Vec::new(),
            auth_header: default_auth_header(),
            cache: CacheControlConfig::default(),
            signers: Vec::new(),
            alternate_roots: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerGrant {
    pub gun: String,
    pub users: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlternateRootConfig {
    /// Exact GUN or `host/*`
    pub pattern: String,
    /// Directory holding the operator PEM keys, relative to the state directory
    ///  unless absolute
    pub key_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the state directory (~/.apostille)
    pub app_dir: PathBuf,
    /// Path to the operator keys directory
    pub keys_path: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Loaded configuration
    pub config: AppConfig,
}

impl AppState {
    /// Get the state directory path (custom or default ~/.apostille)
    pub fn app_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Initialize a new state directory
    pub fn init(
        custom_path: Option<PathBuf>,
        config: Option<AppConfig>,
    ) -> Result<Self, StateError> {
        let app_dir = Self::app_dir(custom_path)?;

        if app_dir.exists() {
            return Err(StateError::AlreadyInitialized);
        }

        fs::create_dir_all(&app_dir)?;

        let keys_path = app_dir.join(KEYS_DIR_NAME);
        fs::create_dir_all(&keys_path)?;

        let config = config.unwrap_or_default();
        let config_path = app_dir.join(CONFIG_FILE_NAME);
        let state = Self {
            app_dir,
            keys_path,
            config_path,
            config,
        };
        state.save()?;

        Ok(state)
    }

    /// Load existing state from the state directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let app_dir = Self::app_dir(custom_path)?;

        if !app_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let keys_path = app_dir.join(KEYS_DIR_NAME);
        let config_path = app_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Err(StateError::MissingFile(CONFIG_FILE_NAME.to_string()));
        }

        let config_toml = fs::read_to_string(&config_path)?;
        let config: AppConfig = toml::from_str(&config_toml)?;

        Ok(Self {
            app_dir,
            keys_path,
            config_path,
            config,
        })
    }

    /// Write the current config back to disk
    pub fn save(&self) -> Result<(), StateError> {
        let config_toml = toml::to_string_pretty(&self.config)?;
        fs::write(&self.config_path, config_toml)?;
        Ok(())
    }

    /// Resolve a configured path against the state directory
    pub fn resolve_path(&self, path: &std::path::Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.app_dir.join(path)
        }
    }

    pub fn log_level(&self) -> Result<tracing::Level, StateError> {
        self.config
            .log_level
            .parse()
            .map_err(|_| StateError::InvalidLogLevel(self.config.log_level.clone()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("apostille directory not initialized. Run 'apostille init' first")]
    NotInitialized,

    #[error("apostille directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}
