//! # Vox Backend - Main Application Entry Point
//!
//! HTTP service that accepts audio recordings, persists them, and transcribes
//! them one at a time on a background worker.
//!
//! ## Application Architecture:
//! - **config**: Layered configuration (defaults + `APP_*` environment variables)
//! - **state**: Shared application state, request metrics, the recording service
//! - **queue**: Single-worker FIFO job queue with graceful drain on stop
//! - **recording**: Recording lifecycle, persistence, submission, job handler
//! - **transcription**: Speech-to-text engine abstraction (external command)
//! - **health**: Health and metrics endpoints
//! - **middleware**: Per-route request metrics
//! - **handlers**: HTTP request handlers for API endpoints
//! - **error**: Error type and JSON error responses
//!
//! ## Lifecycle:
//! 1. Load and validate configuration
//! 2. Open stores, start the transcription worker
//! 3. Reconcile recordings left over from a previous run
//! 4. Serve HTTP until SIGINT/SIGTERM
//! 5. Stop accepting requests, then drain the queue before exiting
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: HTTP handling and the queue worker share one tokio runtime
//! - **Arc**: `AppState` is cloned into every actix worker; clones share one queue
//! - **spawn_blocking**: the engine call blocks, so it runs off the async threads
//! - **tokio::select!**: race the server against the shutdown signal

// Module declarations
mod config;         // Layered configuration (config.rs)
mod error;          // HTTP error type (error.rs)
mod handlers;       // Route handlers (handlers/ directory)
mod health;         // Health and metrics endpoints (health.rs)
mod middleware;     // Request metrics middleware (middleware/ directory)
mod queue;          // Single-worker job queue (queue/ directory)
mod recording;      // Recording lifecycle and persistence (recording/ directory)
mod state;          // Shared application state (state.rs)
mod transcription;  // Engine abstraction (transcription/ directory)

use actix_cors::Cors;                  // Cross-Origin Resource Sharing support
use actix_web::{web, App, HttpServer};  // Web framework
use anyhow::Result;                    // Startup errors with context
use config::AppConfig;
use state::AppState;
use tracing::{error, info, warn};       // Structured logging
use tracing_actix_web::TracingLogger;  // Per-request tracing span
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from defaults, `config.toml` and the environment
/// 2. **Builds application state**: record store, audio store, engine, queue
/// 3. **Starts the worker** and re-enqueues work left by a previous run
/// 4. **Serves HTTP** with CORS, request metrics and request tracing
/// 5. **Shuts down in order**: HTTP first, then the queue drains
///
/// ## Error Handling:
/// Any startup failure (bad config, unwritable directories, port in use)
/// returns an error and the process exits before accepting requests.
#[actix_web::main]
async fn main() -> Result<()> {
    // Load environment variables from .env (a missing file is fine)
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting vox-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let reconcile_on_startup = config.queue.reconcile_on_startup;
    let app_state = AppState::build(config).await?;

    // The worker must be running before recovered jobs are re-enqueued
    app_state.recordings.queue().start();

    if reconcile_on_startup {
        if let Err(e) = app_state.recordings.reconcile().await {
            warn!(error = %e, "Startup reconciliation failed");
        }
    }

    info!("Starting HTTP server on {}", bind_addr);

    let server_state = app_state.clone();
    let server = HttpServer::new(move || {
        // CORS: only the configured browser origins
        let cors = server_state
            .config
            .server
            .allowed_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);  // Cache preflight results for 1 hour

        App::new()
            // Share application state with all request handlers
            .app_data(web::Data::new(server_state.clone()))
            // Middleware runs in reverse registration order for requests
            .wrap(cors)
            .wrap(middleware::RequestMetrics)
            .wrap(TracingLogger::default())
            // /api (recordings) and /api/v1 (operations)
            .configure(handlers::configure_api)
            // Also provide health check at root level for convenience
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .disable_signals()  // We handle signals ourselves so the queue can drain after
    .run();

    // Keep a handle to stop the server, and run it on its own task
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Whichever finishes first wins: the server (usually an error) or a signal
    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        signal = shutdown_signal() => {
            match signal {
                Ok(name) => info!("Received {}, stopping server...", name),
                Err(e) => error!("Signal handler failed, stopping server: {}", e),
            }
            server_handle.stop(true).await;
        }
    }

    // No new submissions can arrive now; finish whatever is already queued.
    let queue = app_state.recordings.queue();
    if !queue.is_empty() {
        info!(pending = queue.len(), "Draining transcription queue");
    }
    if let Err(e) = queue.stop().await {
        error!("Transcription worker did not shut down cleanly: {}", e);
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Structured logging to stdout.
///
/// ## Environment Variables:
/// - `RUST_LOG`: filter directives, e.g. `vox_backend=trace`
/// - If not set, defaults to `vox_backend=debug,actix_web=info`
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vox_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Resolve with the name of the first termination signal received.
#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        _ = sigint.recv() => Ok("SIGINT"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl+C")
}
