//! Relay server binary: load config, wire the cache-backed session store to
//! the broadcast hub, and serve until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use relay_cache::CacheStore;
use relay_core::RelayConfig;
use relay_events::EventBus;
use relay_server::RelayServer;
use relay_session::SessionStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::var("RELAY_CONFIG")
        .map_or_else(|_| PathBuf::from("relay.json"), PathBuf::from);
    let config =
        RelayConfig::load_from_path(&config_path).context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    let cache =
        Arc::new(CacheStore::connect(&config.cache.url).context("failed to open cache client")?);
    let sessions = Arc::new(SessionStore::new(cache, &config.security));
    let bus = Arc::new(EventBus::new());

    let server = RelayServer::new(config.server.clone(), sessions, &bus);
    server.shutdown().shutdown_on_ctrl_c();

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "relay server listening");

    server.serve(listener).await.context("server error")?;
    info!("relay server stopped");
    Ok(())
}
