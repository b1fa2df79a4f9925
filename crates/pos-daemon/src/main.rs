//! pos-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, loads config,
//! builds the shared state, wires middleware, and starts the HTTP server.
//! All route handlers live in `routes.rs`; all shared state types live in
//! `state.rs`.

use std::net::SocketAddr;

use anyhow::Context;
use pos_daemon::{jobs, routes, state::AppState};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist — production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let loaded = load_config()?;
    let config = loaded.typed()?;
    let config_hash = loaded.config_hash.clone();
    info!(config_hash = %config_hash, "configuration loaded");

    let pool = pos_store::connect_from_env().await?;
    pos_store::migrate(&pool).await?;

    let shared = AppState::build(pool, config, config_hash)?;
    let _jobs = jobs::spawn_all(shared.clone());

    let app = routes::build_router(shared)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8990)));
    info!("pos-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// Layered config paths from POS_CONFIG (comma-separated, merge order);
/// defaults apply when unset or when no file is readable.
fn load_config() -> anyhow::Result<pos_config::LoadedConfig> {
    match std::env::var("POS_CONFIG") {
        Ok(paths) => {
            let parts: Vec<&str> = paths.split(',').map(str::trim).collect();
            pos_config::load_layered_yaml(&parts)
        }
        Err(_) => {
            // No files: canonical empty document, defaults everywhere.
            let canonical = "{}".to_string();
            Ok(pos_config::LoadedConfig {
                config_json: serde_json::json!({}),
                canonical_json: canonical,
                config_hash: "default".to_string(),
            })
        }
    }
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("POS_BIND_ADDR").ok()?.parse().ok()
}
