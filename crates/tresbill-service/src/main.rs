//! TresBill Service - HTTP API for cluster chargeback and billing
//!
//! This is the main entry point for the tresbill service.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tresbill_service::{create_router, AppState, ServiceConfig};
use tresbill_store::Store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tresbill=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting TresBill Service");

    // Load configuration from environment
    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        database_url = %config.database_url,
        provider = %config.payment_provider,
        vat_enabled = config.vat.enabled,
        audit_signing = config.audit_secret.is_some(),
        "Service configuration loaded"
    );

    // Open the store and run migrations
    let mut store = Store::connect(&config.database_url)
        .await?
        .with_vat(config.vat.clone());
    if let Some(secret) = &config.audit_secret {
        store = store.with_audit_signing(secret.clone(), config.audit_key_id.clone());
    }
    let store = Arc::new(store);

    // Seed published rates and the bootstrap admin
    store.seed_default_rates().await?;
    if let (Some(username), Some(password)) = (
        &config.bootstrap_admin_username,
        &config.bootstrap_admin_password,
    ) {
        store.ensure_admin(username, password).await?;
    }

    // Make sure every month touched by existing data has a period row
    let periods = store.bootstrap_periods("system").await?;
    if periods > 0 {
        tracing::info!(periods, "Accounting periods bootstrapped");
    }

    // Build app state
    let state = AppState::new(store, config.clone());

    // Create the router
    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    // Start HTTP server
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
