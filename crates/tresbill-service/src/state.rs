//! Application state.

use std::sync::Arc;

use tresbill_store::Store;

use crate::config::ServiceConfig;
use crate::providers::{DummyProvider, ProviderRegistry};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Payment providers by name.
    pub providers: ProviderRegistry,
}

impl AppState {
    /// Create a new application state with the built-in providers.
    #[must_use]
    pub fn new(store: Arc<Store>, config: ServiceConfig) -> Self {
        let mut providers = ProviderRegistry::default();
        providers.register(Arc::new(DummyProvider::new(config.webhook_secret.clone())));

        if config.webhook_secret.is_none() {
            tracing::warn!("Webhook secret not configured - provider deliveries are unverified");
        }

        Self {
            store,
            config,
            providers,
        }
    }
}
