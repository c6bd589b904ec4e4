use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use undercover_dash::{
    api::{self, ApiState},
    client::{push, HttpGameClient},
    config::DashConfig,
    protocol::DashboardView,
    runtime::{Inputs, Runtime},
    state::{
        persist::{FileStore, Persistence},
        sequencer::RoundSequencer,
        Dashboard,
    },
};

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
                .unwrap_or_else(|_| "undercover_dash=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting undercover dashboard...");

    let config = DashConfig::from_env();
    tracing::info!(
        server = %config.server_url,
        push = %config.push_url,
        state_dir = %config.state_dir.display(),
        "Configuration loaded"
    );

    let client = match HttpGameClient::new(
        config.server_url.clone(),
        config.admin_token.clone(),
        config.request_timeout,
    ) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!(error = %e, "Failed to build game server client");
            std::process::exit(1);
        }
    };

    let persistence = Persistence::new(Arc::new(FileStore::new(config.state_dir.clone())));
    let (advance_tx, advances) = mpsc::unbounded_channel();
    let sequencer = RoundSequencer::new(config.advance_delay, advance_tx);
    let dashboard = Dashboard::load(persistence, sequencer).await;

    let (view_tx, view) = watch::channel(DashboardView::default());
    let (commands_tx, commands) = mpsc::channel(16);
    let (inbound_tx, inbound) = mpsc::channel(256);
    let stop = CancellationToken::new();

    // Push channel listener
    tokio::spawn(push::run(config.push_url.clone(), inbound_tx, stop.clone()));

    // Event loop owning all dashboard state
    let runtime = Runtime::new(
        dashboard,
        client.clone(),
        client,
        config.poll_interval,
        view_tx,
    );
    let event_loop = tokio::spawn(runtime.run(
        Inputs {
            commands,
            inbound,
            advances,
        },
        stop.clone(),
    ));

    let app = api::router(Arc::new(ApiState {
        commands: commands_tx,
        view,
    }))
    .layer(CorsLayer::permissive())
    .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    tracing::info!("Listening on http://{}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "Failed to bind listener");
            std::process::exit(1);
        }
    };

    let shutdown = stop.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutting down...");
            shutdown.cancel();
        })
        .await;

    if let Err(e) = served {
        tracing::error!(error = %e, "Server error");
    }

    stop.cancel();
    if let Err(e) = event_loop.await {
        tracing::error!(error = %e, "Event loop task failed");
    }
}
