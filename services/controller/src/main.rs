//! Metal controller
//!
//! Keeps Device and Assignment records converged with the provider API.
//! Records are held in an in-memory store seeded from `METAL_MANIFEST`.

use std::sync::Arc;

use anyhow::{Context, Result};
use metal_api::DynamicObject;
use metal_controller::{
    config::{self, AUTH_TOKEN_VAR},
    provider::HttpProvider,
    reconciler::ControllerWorker,
    secrets::{EnvCredentials, StaticDataSource},
    store::{MemoryStore, ObjectStore},
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Prefer RUST_LOG, fall back to METAL_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting metal controller");
    info!(
        api_url = %config.provider.api_url,
        project_id = %config.provider.project_id,
        workers = config.controller.workers,
        "Configuration loaded"
    );

    let store = Arc::new(MemoryStore::new());
    if let Some(path) = &config.manifest {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading manifest {}", path.display()))?;
        let records: Vec<DynamicObject> =
            serde_json::from_str(&raw).context("parsing manifest")?;
        let count = records.len();
        for record in records {
            let key = record.key();
            if let Err(e) = store.create(record).await {
                warn!(key = %key, error = %e, "skipping manifest record");
            }
        }
        info!(count, path = %path.display(), "Seeded store from manifest");
    }

    let provider = Arc::new(HttpProvider::new(
        &config.provider,
        Arc::new(EnvCredentials::new(AUTH_TOKEN_VAR)),
    )?);

    let worker = Arc::new(ControllerWorker::new(
        store,
        provider.clone(),
        provider,
        Arc::new(StaticDataSource::new()),
        config.controller.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut worker_handle = tokio::spawn(worker.run(shutdown_rx));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut worker_handle => {
            if let Err(e) = result {
                error!(error = %e, "Controller task failed");
            }
            return Ok(());
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for in-flight reconciles to finish...");
    let shutdown_timeout = config.controller.provider_timeout + std::time::Duration::from_secs(5);
    if tokio::time::timeout(shutdown_timeout, worker_handle).await.is_err() {
        warn!("Controller did not shut down in time");
    }

    info!("Metal controller shutdown complete");
    Ok(())
}
