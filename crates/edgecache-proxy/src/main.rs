//! Edgecache proxy - multi-tenant caching proxy for static assets
//!
//! Sits between clients and an upstream origin, serving scripts and
//! stylesheets cache-first with per-tenant policy, version supersession and
//! capacity-bounded eviction.

mod error;
mod origin;
mod server;
mod types;

use crate::error::Result;
use crate::origin::{tenant_from_origin, FixedTenantResolver, OriginFetcher};
use crate::server::{start_server, ServerState, SharedState};
use crate::types::ProxyConfig;
use chrono::Utc;
use edgecache_core::{run_maintenance, CacheEngine, MemoryStore, PolicyUpdate};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};
use url::Url;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env().add_directive("edgecache=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting edgecache proxy...");

    // Load configuration from environment
    let config = load_config()?;
    info!("Port: {}", config.port);
    info!("Serving origin: {}", config.serving_origin);
    info!("Upstream: {}", config.upstream_url);

    // Resolve the tenant and activate the engine: namespace reconciliation
    // runs here, destroying namespaces left behind by other tenants.
    let tenant = config
        .tenant_id
        .clone()
        .unwrap_or_else(|| tenant_from_origin(&config.serving_origin));
    let resolver = FixedTenantResolver::new(tenant);

    let store = MemoryStore::new();
    let engine = Arc::new(CacheEngine::activate(store, &resolver).await?);

    // Apply configured policy overrides to the active tenant.
    let overrides = PolicyUpdate {
        max_age_secs: config.max_age_secs,
        max_entries: config.max_entries,
        ..Default::default()
    };
    if overrides != PolicyUpdate::default() {
        engine.apply_config(None, &overrides).await;
    }

    let ctx = engine.context().await;
    info!("Tenant: {}", ctx.tenant_id);
    info!("Namespace: {}", ctx.namespace);
    info!("Freshness window: {} seconds", ctx.policy.max_age_secs);
    info!("Capacity: {} entries", ctx.policy.max_entries);

    // Maintenance commands and config broadcasts drive the engine from a
    // dedicated task.
    let (commands, command_rx) = mpsc::channel(32);
    let (config_tx, config_rx) = broadcast::channel(16);
    tokio::spawn(run_maintenance(engine.clone(), command_rx, config_rx));

    let fetcher = OriginFetcher::new(config.upstream_url.clone());

    // Create shared state
    let state: SharedState = Arc::new(ServerState {
        engine,
        fetcher: Arc::new(fetcher),
        commands,
        config_tx,
        serving_origin: config.serving_origin.clone(),
        started_at: Utc::now(),
    });

    // Start HTTP server (blocking)
    start_server(state, config.port).await?;

    Ok(())
}

fn load_config() -> Result<ProxyConfig> {
    let defaults = ProxyConfig::default();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(defaults.port);

    let serving_origin = match std::env::var("SERVING_ORIGIN") {
        Ok(s) => Url::parse(&s)?,
        Err(_) => defaults.serving_origin,
    };

    let upstream_url = match std::env::var("UPSTREAM_URL") {
        Ok(s) => Url::parse(&s)?,
        Err(_) => serving_origin.clone(),
    };

    let tenant_id = std::env::var("TENANT_ID").ok().filter(|s| !s.is_empty());

    let max_age_secs = std::env::var("CACHE_MAX_AGE_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok());

    let max_entries = std::env::var("CACHE_MAX_ENTRIES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok());

    Ok(ProxyConfig {
        port,
        serving_origin,
        upstream_url,
        tenant_id,
        max_age_secs,
        max_entries,
    })
}
