use axum::{routing::get, Router};
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use podium::{
    cli::{Cli, Commands},
    config::Config,
    coordinator::Coordinator,
    handlers::{get_status, health_check, list_sessions, server_info, MonitorState},
    websocket::websocket_handler,
};

#[tokio::main]
async fn main() {
    // Default to INFO level if RUST_LOG is not set
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    // Check if running as debug client
    if let Some(Commands::Client { url, role }) = cli.command {
        if let Err(e) = podium::cli::run_debug_client(url, role).await {
            error!("Debug client error: {}", e);
            std::process::exit(1);
        }
        return;
    }

    // Otherwise, run as server
    let config = Config::from_env();
    info!("Starting Podium session server on port {}", config.port);
    info!(
        "Countdown {}ms, position sync every {}ms, composer grace {}s",
        config.countdown_ms, config.sync_interval_ms, config.composer_grace_secs
    );

    let coordinator = Coordinator::new(config.timing());
    let monitor_state = MonitorState::new(coordinator.clone());

    // Split the router: monitoring reads snapshots, the socket route
    // owns the coordinator
    let http_routes = Router::new()
        .route("/", get(server_info))
        .route("/health", get(health_check))
        .route("/api/status", get(get_status))
        .route("/api/sessions", get(list_sessions))
        .with_state(monitor_state);

    let ws_routes = Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(coordinator);

    let app = Router::new()
        .merge(http_routes)
        .merge(ws_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Podium listening on {}", addr);

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
