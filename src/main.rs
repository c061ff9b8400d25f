//! # Speech Relay Backend - Main Application Entry Point
//!
//! An Actix-web server that relays audio between clients and the
//! Speechmatics transcription APIs:
//!
//! - `GET /ws/transcribe`: realtime relay — each client WebSocket is paired
//!   with one upstream recognition session
//! - `POST /api/transcribe`: batch transcription of a complete audio file
//! - `GET /api/health`: liveness probe with session occupancy
//!
//! ## Application Architecture:
//! - **config**: configuration loading and validation (TOML + environment)
//! - **state**: shared application state handed to every handler
//! - **session**: language resolution and the session admission registry
//! - **upstream**: realtime and batch clients for the Speechmatics APIs
//! - **websocket**: the realtime relay session actor and its acceptor
//! - **handlers**: REST endpoints
//! - **error**: error types and their HTTP responses

mod config;
mod error;
mod handlers;
mod health;
mod session;
mod state;
mod upstream;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown flag, set by the signal handler task and polled by main.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## Startup sequence:
/// 1. Load `.env`, initialize tracing
/// 2. Load and validate configuration — a missing Speechmatics API key
///    stops the process here, before the server binds
/// 3. Build shared state (session registry, batch client)
/// 4. Serve until a shutdown signal arrives
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e);
    }

    info!("Starting speech-relay-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Realtime endpoint: {}, session cap: {}",
        config.speechmatics.realtime_url, config.session.max_concurrent_sessions
    );

    let app_state = AppState::new(config.clone())?;
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .service(
                web::scope("/api")
                    .route("/health", web::get().to(health::health_check))
                    .route("/transcribe", web::post().to(handlers::transcribe_file)),
            )
            .route("/ws/transcribe", web::get().to(websocket::ws_transcribe))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize structured logging.
///
/// `RUST_LOG` controls the filter; the default keeps this crate at debug
/// and the framework at info.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "speech_relay_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM/SIGINT and set the global shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Resolve once the shutdown flag has been set.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
