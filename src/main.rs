//! Match server - authoritative multiplayer match backend
//!
//! This is the main entry point for the match server. It handles:
//! - WebSocket connections for real-time gameplay
//! - HTTP endpoints for queue status, stats and anti-cheat review
//! - Background matchmaking and zone progression

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use match_core::app::AppState;
use match_core::config::{Config, StoreBackend};
use match_core::http::build_router;
use match_core::store::{
    KvStore, MemoryKvStore, Persistence, RestKvStore, RestRoster, RetryPolicy, RosterProvider,
    StaticRoster,
};
use match_core::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting match server");
    info!("Server address: {}", config.server_addr);

    let cancel = CancellationToken::new();

    // Key-value mirror, chosen explicitly by configuration
    let store: Arc<dyn KvStore> = match &config.store {
        StoreBackend::Memory => {
            info!("Using in-memory store; state will not survive a restart");
            Arc::new(MemoryKvStore::new())
        }
        StoreBackend::Rest { url, token } => {
            info!(url = %url, "Using REST key-value store");
            Arc::new(RestKvStore::new(url.clone(), token.clone())?)
        }
    };
    let (persistence, writer) = Persistence::spawn(store, RetryPolicy::default(), cancel.clone());

    let roster: Arc<dyn RosterProvider> = match &config.social {
        Some(social) => Arc::new(RestRoster::new(social)),
        None => {
            warn!("SOCIAL_API_URL not set, friend and party broadcasts disabled");
            Arc::new(StaticRoster::new())
        }
    };

    // Create application state
    let state = AppState::new(config.clone(), persistence, roster);
    state.matchmaking.restore(Utc::now()).await;

    // Spawn matchmaking and zone loops
    let background = state.spawn_background(cancel.clone());

    // Build router
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop background loops, then let the writer flush
    cancel.cancel();
    for handle in background {
        let _ = handle.await;
    }
    let _ = writer.await;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
