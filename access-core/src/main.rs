use access_core::{config::AccessConfig, services::metrics, AccessCoreBuilder};
use service_core::error::AppError;
use service_core::observability::{custom_span, init_tracing, shutdown_tracing};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::Instrument;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = AccessConfig::from_env()?;

    init_tracing(&config.tracing_settings())?;
    metrics::init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = config.environment.as_str(),
        "Starting access core"
    );

    // Role graph problems surface here as configuration errors
    let core = Arc::new(AccessCoreBuilder::from_config(&config).build()?);

    if let Some(admin) = &config.bootstrap_admin {
        let span = custom_span("bootstrap_admin", &[("identifier", admin.identifier.clone())]);
        let principal_id = core
            .bootstrap_admin(&admin.identifier, &admin.secret)
            .instrument(span)
            .await?;
        tracing::info!(principal_id = %principal_id, "Bootstrap administrator ready");
    }

    let reaper = (config.reaper_interval_seconds > 0).then(|| {
        tracing::info!(interval_seconds = config.reaper_interval_seconds, "Starting reaper");
        core.spawn_reaper(Duration::from_secs(config.reaper_interval_seconds))
    });

    shutdown_signal().await;

    if let Some(reaper) = reaper {
        reaper.abort();
    }
    tracing::info!("Access core shutdown complete");
    shutdown_tracing();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
