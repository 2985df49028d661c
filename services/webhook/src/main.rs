use anyhow::{Context, Result};
use reel_webhook::api::{start_api_server, AppState};
use reel_webhook::{
    Config, InstagramClient, Ledger, MemoryLedger, PgLedger, PipelineSettings, R2Store,
    ReelPipeline, Resolver, UploadQueue,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // A local .env is optional
    let _ = dotenvy::dotenv();

    let config = Config::load().context("Failed to load configuration")?;

    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        mode = ?config.pipeline.mode,
        "Starting reel webhook service"
    );

    init_metrics(config.service.metrics_port)?;

    let ledger: Arc<dyn Ledger> = if config.uses_memory_ledger() {
        warn!("Using in-memory ledger, records are lost on restart");
        Arc::new(MemoryLedger::new())
    } else {
        let ledger = PgLedger::new(&config.database)
            .await
            .context("Failed to initialize reel ledger")?;
        if config.database.run_migrations {
            ledger
                .run_migrations()
                .await
                .context("Failed to run database migrations")?;
        }
        Arc::new(ledger)
    };

    let store = R2Store::new(&config.s3)
        .await
        .context("Failed to initialize object store")?;
    if let Err(e) = store.check_connection().await {
        warn!(error = %e, "Object store not reachable yet");
    }

    let instagram =
        InstagramClient::new(&config.scraper).context("Failed to initialize Instagram client")?;

    let pipeline = Arc::new(ReelPipeline::new(
        Resolver::new(Arc::new(instagram)),
        Arc::new(store),
        ledger,
        PipelineSettings {
            retention_days: config.pipeline.retention_days,
            temp_dir: config.pipeline.temp_dir.clone(),
        },
    ));
    let queue = Arc::new(UploadQueue::new(pipeline.clone(), config.pipeline.workers));

    let api_state = AppState {
        pipeline,
        queue: queue.clone(),
        mode: config.pipeline.mode,
    };

    if let Err(e) = start_api_server(api_state, &config.api, shutdown_signal()).await {
        error!(error = %e, "API server error");
    }

    info!(in_flight = queue.in_flight(), "Draining upload queue");
    queue.drain().await;

    info!("Reel webhook service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
