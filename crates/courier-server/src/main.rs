//! # courier-server
//!
//! Real-time chat backend.
//!
//! This binary provides:
//! - **WebSocket gateway** (axum) with per-user multi-device presence and
//!   room-based event routing
//! - **Delivery engine** that records live deliveries and queues unread
//!   counts plus pending deliveries for offline participants
//! - **Scheduled-release sweeper** that publishes withheld messages when
//!   their time arrives, exactly once
//! - **Retention sweeper** that hides expired messages for opted-in users
//! - **Call signaling relay** for WebRTC offer/answer/ICE exchange
//! - **REST API** for health checks, registration, and history reads

mod api;
mod calls;
mod config;
mod delivery;
mod error;
mod gateway;
mod groups;
mod messages;
mod presence;
mod push;
mod release;
mod retention;
mod state;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use courier_store::Database;

use crate::config::ServerConfig;
use crate::push::LogNotifier;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,courier_server=debug")),
        )
        .init();

    info!("Starting Courier server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the database
    // -----------------------------------------------------------------------
    let db = match &config.db_path {
        Some(path) => Database::open_at(path)?,
        None => Database::open_default()?,
    };
    if let Some(path) = db.path() {
        info!(path = %path.display(), "Database ready");
    }

    let state = AppState::new(db, config.clone(), Arc::new(LogNotifier));

    // -----------------------------------------------------------------------
    // 4. Spawn background sweepers
    // -----------------------------------------------------------------------
    release::spawn_release_sweeper(state.clone());
    retention::spawn_retention_sweeper(state.clone());

    // -----------------------------------------------------------------------
    // 5. Run the HTTP/WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(state, config.http_addr) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, exiting");
        }
    }

    Ok(())
}
