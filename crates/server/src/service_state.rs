use std::sync::Arc;

use common::storage::MemStorage;

use crate::auth::{
    AccessController, AuthError, HeaderAccessController, RegistrationError, RootRegistration,
    RootResolver,
};
use crate::http_server::CacheControlConfig;
use crate::metrics::{Metrics, MetricsError};
use crate::storage::MultiplexingStore;
use crate::ServiceConfig;

#[derive(Clone, Debug)]
pub struct State {
    store: MultiplexingStore,
    access: Arc<dyn AccessController>,
    metrics: Metrics,
    cache_control: CacheControlConfig,
}

impl State {
    pub fn new(
        store: MultiplexingStore,
        access: Arc<dyn AccessController>,
        metrics: Metrics,
        cache_control: CacheControlConfig,
    ) -> Self {
        Self {
            store: store.with_metrics(metrics.clone()),
            access,
            metrics,
            cache_control,
        }
    }

    pub async fn from_config(config: &ServiceConfig) -> Result<Self, StateSetupError> {
        let mut resolver = RootResolver::new(config.repo_prefixes.clone());
        for grant in &config.signers {
            for user in &grant.users {
                resolver = resolver.with_grant(&grant.gun, user);
            }
        }
        for (pattern, key_dir) in &config.alternate_roots {
            tracing::info!(
                "loading alternate root {} from {}",
                pattern,
                key_dir.display()
            );
            resolver = resolver.with_registration(RootRegistration::from_key_dir(pattern, key_dir)?);
        }

        let store = MultiplexingStore::new(
            Arc::new(MemStorage::new()),
            Arc::new(MemStorage::new()),
            resolver,
        );
        let access = Arc::new(HeaderAccessController::new(&config.auth_header)?);
        let metrics = Metrics::new()?;

        Ok(Self::new(store, access, metrics, config.cache_control))
    }

    pub fn store(&self) -> &MultiplexingStore {
        &self.store
    }

    pub fn access(&self) -> &dyn AccessController {
        &*self.access
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn cache_control(&self) -> &CacheControlConfig {
        &self.cache_control
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateSetupError {
    #[error("failed to load alternate root: {0}")]
    Registration(#[from] RegistrationError),
    #[error("invalid access control configuration: {0}")]
    Auth(#[from] AuthError),
    #[error("failed to set up metrics: {0}")]
    Metrics(#[from] MetricsError),
}
