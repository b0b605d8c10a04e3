//! Modelconv server: 3D model conversion service
//!
//! Main entry point that wires the crates together and starts the server.

use std::time::Duration;

use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, fmt};

use modelconv_api::router::build_router;
use modelconv_api::state::AppState;
use modelconv_core::config::AppConfig;
use modelconv_core::error::AppError;
use modelconv_pipeline::RequestOrchestrator;

#[tokio::main]
async fn main() {
    let env = std::env::var("MODELCONV_ENV").unwrap_or_else(|_| "development".to_string());

    let config = match AppConfig::load(&env) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config);
    tracing::info!(env = %env, "Configuration loaded");

    if let Err(e) = run(config).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main server run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting modelconv v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Conversion pipeline ──────────────────────────────
    let orchestrator = RequestOrchestrator::new(
        &config.converter,
        config.auth.effective_api_key().map(String::from),
    )?;

    tracing::info!(
        temp_root = %orchestrator.temp_root().display(),
        program = %config.converter.program,
        timeout_seconds = config.converter.timeout_seconds,
        max_concurrent = config.converter.max_concurrent_conversions,
        "Conversion pipeline initialized"
    );

    if orchestrator.invoker().check_available().await {
        tracing::info!("Converter program found");
    } else {
        tracing::warn!(
            program = %config.converter.program,
            "Converter program not found; conversions will fail until it is installed"
        );
    }

    if !orchestrator.requires_key() {
        tracing::warn!("No API key configured; conversion endpoints are open");
    }

    // ── Step 2: Build and start HTTP server ──────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let grace = Duration::from_secs(config.server.shutdown_grace_seconds);

    let app = build_router(AppState::new(config, orchestrator));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::internal(format!("Failed to bind {}: {}", addr, e)))?;

    tracing::info!("Modelconv server listening on {}", addr);

    // ── Step 3: Graceful shutdown ────────────────────────────────
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received, starting graceful shutdown...");
        let _ = shutdown_tx.send(true);
    });
    let mut server = tokio::spawn(async move { server.await });

    let drain_deadline = async {
        if shutdown_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = &mut server => {
            result
                .map_err(|e| AppError::internal(format!("Server task failed: {}", e)))?
                .map_err(|e| AppError::internal(format!("Server error: {}", e)))?;
        }
        _ = drain_deadline => {
            tracing::warn!(
                grace_seconds = grace.as_secs(),
                "In-flight requests did not finish in time, aborting"
            );
            server.abort();
        }
    }

    tracing::info!("Modelconv server shut down");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
