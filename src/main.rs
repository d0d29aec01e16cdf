// src/main.rs
// Process entrypoint: parse flags, stand up the storage engine, run legacy
// migration if present, spawn the capture pipeline, and serve the HTTP API
// (spec §6). Exit codes: 0 clean, 1 startup error.

use clap::Parser;
use rand::RngCore;
use tracing_subscriber::EnvFilter;
use waddle::config::{CliArgs, Config};
use waddle::crypto::EncryptionService;
use waddle::error::AppResult;
use waddle::{api, AppState};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        tracing::error!("startup failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> AppResult<()> {
    let args = CliArgs::parse();
    let config = Config::from(args);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tokio::fs::create_dir_all(&config.data_dir).await?;

    let crypto = EncryptionService::load_or_create(&config.data_dir)?;
    let api_secret = load_or_create_api_secret(&config, &crypto).await?;

    let state = AppState::new(&config, api_secret).await?;

    run_migration_if_present(&state, &config).await?;

    state.spawn_capture_pipeline(&config).await;

    let router = api::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", config.port)).await?;
    tracing::info!("listening on port {}", config.port);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.stop_capture_pipeline().await;
    Ok(())
}

/// Scans the legacy tree and, if any date directories are found, backs it
/// up, migrates it through the storage engine, and verifies the result
/// before the capture pipeline is allowed to start (spec §4.6).
async fn run_migration_if_present(state: &AppState, _config: &Config) -> AppResult<()> {
    let mut migration = state.migration.write().await;
    let dates = migration.detect().await?;
    if dates.is_empty() {
        return Ok(());
    }

    tracing::info!("migrating {} legacy session(s)", dates.len());
    migration.backup().await?;
    migration.migrate(&dates, &state.engine).await?;
    migration.verify(&dates, &state.engine).await?;
    tracing::info!("migration complete");
    Ok(())
}

const API_SECRET_ASSOCIATED_DATA: &[u8] = b"waddle-api-secret";

/// Loads the bearer token clients must present, generating and encrypting a
/// fresh one on first run (spec §6 on-disk layout: `api_secret.dat`).
async fn load_or_create_api_secret(config: &Config, crypto: &EncryptionService) -> AppResult<String> {
    let path = config.api_secret_path();

    if let Ok(ciphertext) = tokio::fs::read(&path).await {
        let plaintext = crypto
            .decrypt(&ciphertext, API_SECRET_ASSOCIATED_DATA)
            .map_err(|_| waddle::error::AppError::encryption("corrupt api_secret.dat"))?;
        return Ok(String::from_utf8_lossy(&plaintext).to_string());
    }

    let mut raw = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut raw);
    let secret = hex_encode(&raw);

    let ciphertext = crypto.encrypt(secret.as_bytes(), API_SECRET_ASSOCIATED_DATA)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, &ciphertext).await?;
    tracing::info!("generated a new API bearer token at {}", path.display());

    Ok(secret)
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        signal.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
