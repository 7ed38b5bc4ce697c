use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use musick_relay::{config::RelayConfig, routes, server::RelayServer, state::RelayState, status};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "musick_relay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting musick-relay...");

    let config = RelayConfig::from_env();
    let listen_addr = config.listen_addr;
    let status_addr = config.status_addr;

    let state = match RelayState::from_config(config) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            tracing::error!("Failed to initialize backends: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!(
        "Backend: {}, identity: {}",
        state.backend.name(),
        state.verifier.name()
    );

    let router = match routes::router() {
        Ok(router) => Arc::new(router),
        Err(e) => {
            tracing::error!("Failed to build route table: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!("Registered {} routes", router.len());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if let Some(addr) = status_addr {
        let state = state.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = status::serve_status(addr, state, shutdown).await {
                tracing::error!("Status endpoint failed: {}", e);
            }
        });
    }

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl-C"),
            Err(e) => {
                tracing::error!("Failed to listen for Ctrl-C, graceful shutdown disabled: {}", e);
                // Dropping the sender would read as a shutdown
                std::future::pending::<()>().await;
            }
        }
        let _ = shutdown_tx.send(true);
    });

    let server = match RelayServer::bind(listen_addr, state, router).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.serve(shutdown_rx).await {
        tracing::error!("Relay stopped: {}", e);
        std::process::exit(1);
    }
    tracing::info!("Relay stopped");
}
