// Identity, access control and root-of-trust resolution
pub mod auth;
pub mod http_server;
pub mod metrics;
pub mod process;
pub mod service_config;
pub mod service_state;
pub mod storage;

// App state (configuration, paths)
pub mod state;

pub use process::{spawn_service, start_service, ShutdownHandle};
pub use service_config::Config as ServiceConfig;
pub use service_state::State as ServiceState;
pub use state::{AppConfig, AppState, StateError};
