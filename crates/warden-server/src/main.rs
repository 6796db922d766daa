//! Main entry point for the Warden server.
//!
//! Loads configuration, connects the shared store, seeds the stock and runs
//! the contention driver, then reports what happened.

use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use warden_server::driver::ContentionDriver;
use warden_server::model::{Configuration, StoreBackend};
use warden_server::startup::{self, SharedStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let configuration = Configuration::new()?;

    let logging_config = configuration.logging_config();
    let _logging_guard = startup::init_logging(&logging_config)?;

    let metrics = warden_server::metrics::init_metrics()?;

    let backend = configuration.store_backend()?;
    let lock_config = configuration.lock_config()?;
    let stock_config = configuration.stock_config()?;
    let driver_config = configuration.driver_config()?;

    info!(
        %backend,
        product = %stock_config.product,
        ttl_ms = lock_config.ttl_ms,
        workers = driver_config.workers,
        requests = driver_config.requests,
        "Starting Warden"
    );

    let store = SharedStore::connect(
        backend,
        &configuration.redis_url(),
        Duration::from_millis(configuration.memory_cleanup_interval_ms()),
    )
    .await?;

    let seed = backend == StoreBackend::Memory || stock_config.seed;
    let driver = ContentionDriver::new(
        store.locks.clone(),
        store.values.clone(),
        lock_config,
        stock_config,
        driver_config,
    );

    if seed {
        driver.seed().await.context("Failed to seed stock")?;
    }

    let report = driver.run().await?;

    info!(
        requests = report.requests,
        deducted = report.deducted,
        insufficient = report.insufficient,
        busy = report.busy,
        lost = report.lost,
        failed = report.failed,
        final_stock = ?report.final_stock,
        elapsed_ms = report.elapsed_ms,
        "Contention run finished"
    );
    info!(
        lock_stats = %serde_json::to_string(&report.lock_stats)?,
        "Lock statistics"
    );
    if report.lost > 0 || report.failed > 0 {
        warn!(
            lost = report.lost,
            failed = report.failed,
            "Some deductions did not complete, see lock.log"
        );
    }

    if configuration.metrics_report_enabled() {
        info!("Metrics:\n{}", metrics.render());
    }

    Ok(())
}
