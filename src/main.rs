use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};

use menu_forecast as app;
use app::middleware_helpers::retry::RetryConfig;
use app::ml::{ModelTrainer, RecursiveForecaster, RidgeFitter};
use app::repositories::{FileModelStore, FirestoreClient};
use app::services::{ForecastSink, ForecastingService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = app::config::load_config().context("failed to load configuration")?;
    app::config::init_tracing(&cfg.log_level, cfg.log_json);

    let firestore = Arc::new(FirestoreClient::from_config(&cfg)?);
    let credentials_path = firestore.credentials_path().map(|p| p.to_path_buf());
    match &credentials_path {
        Some(path) if !path.exists() => warn!(
            path = %path.display(),
            "service account key not found; training requests will fail until it is present"
        ),
        Some(path) => info!(path = %path.display(), "using service account key"),
        None => info!("using Firestore emulator without credentials"),
    }

    let sink = ForecastSink::new(
        firestore.clone(),
        cfg.batch_size,
        RetryConfig::new(cfg.commit_max_attempts, cfg.commit_initial_backoff()),
    )?;
    let service = ForecastingService::new(
        firestore,
        Arc::new(FileModelStore::new(cfg.models_dir.clone())),
        sink,
        ModelTrainer::new(cfg.min_history_rows, RidgeFitter::new(cfg.ridge_alpha)),
        RecursiveForecaster::new(cfg.horizon_days),
    );

    let state = app::AppState::new(Arc::new(service), credentials_path);
    let router = app::app_router(state).layer(app::cors_layer(&cfg.cors_origins()));

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cfg.host, cfg.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, models_dir = %cfg.models_dir.display(), "menu-forecast listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
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
    info!("shutting down");
}
