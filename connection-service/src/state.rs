//! Application state for connection service.

use std::sync::Arc;

use common::config::AppConfig;
use common::errors::AppResult;

use crate::performance::HotSqlTracker;
use crate::registry::ConnectionRegistry;
use crate::store::ConfigStore;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub registry: Arc<ConnectionRegistry>,
    pub hot_sql: Arc<HotSqlTracker>,
}

impl AppState {
    pub fn new(config: AppConfig, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            config,
            registry,
            hot_sql: Arc::new(HotSqlTracker::new()),
        }
    }

    /// Opens the configuration store and loads every saved connection.
    pub async fn bootstrap(config: AppConfig) -> AppResult<Self> {
        let store = ConfigStore::open(config.storage_path()).await?;
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(store)));
        registry.initialize().await;
        Ok(Self::new(config, registry))
    }
}
