use crate::config::ConnectionConfig;
use crate::error::{DataError, Result};
use crate::traits::DataSource;
use crate::types::BackendKind;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Factory trait for creating data sources from configurations
pub trait DataSourceFactory: Send + Sync {
    /// Get the backend type this factory handles
    fn backend_type(&self) -> BackendKind;

    /// Validate the configuration and build an unconnected adapter
    fn create_source(&self, config: ConnectionConfig) -> Result<Box<dyn DataSource>>;
}

/// Registry mapping backend identifiers to their factories
#[derive(Clone)]
pub struct QueryRegistry {
    factories: Arc<RwLock<HashMap<BackendKind, Arc<dyn DataSourceFactory>>>>,
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self {
            factories: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a factory for a backend type
    pub async fn register_factory(&self, factory: Arc<dyn DataSourceFactory>) -> Result<()> {
        let backend = factory.backend_type();
        let mut factories = self.factories.write().await;

        if factories.contains_key(&backend) {
            warn!("Overwriting existing factory for backend: {}", backend);
        }

        factories.insert(backend, factory);
        debug!("Registered factory for backend: {}", backend);
        Ok(())
    }

    /// Build an adapter for `config.backend`
    ///
    /// The configuration is validated here; no connection is opened.
    pub async fn create_source(&self, config: ConnectionConfig) -> Result<Box<dyn DataSource>> {
        let factories = self.factories.read().await;

        let factory = factories
            .get(&config.backend)
            .ok_or_else(|| {
                DataError::InvalidConfiguration(format!(
                    "No factory registered for backend: {}",
                    config.backend
                ))
            })?
            .clone();

        drop(factories);

        debug!("Creating source for {}", config.connection_string());

        factory.create_source(config)
    }

    /// Build and connect an adapter in one step
    pub async fn open(&self, config: ConnectionConfig) -> Result<Box<dyn DataSource>> {
        let mut source = self.create_source(config).await?;
        source.connect().await?;
        Ok(source)
    }

    /// List registered backend types
    pub async fn list_backends(&self) -> Vec<BackendKind> {
        let factories = self.factories.read().await;
        let mut backends: Vec<BackendKind> = factories.keys().copied().collect();
        backends.sort();
        backends
    }

    /// Check if a backend is registered
    pub async fn has_backend(&self, backend: BackendKind) -> bool {
        let factories = self.factories.read().await;
        factories.contains_key(&backend)
    }
}

impl Default for QueryRegistry {
    fn default() -> Self {
        Self::new()
    }
}
