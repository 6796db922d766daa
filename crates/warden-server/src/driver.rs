//! Contention driver
//!
//! Spreads deduction requests over concurrent workers. Each worker owns its
//! own `LockManager` and so behaves like a separate process: the only thing
//! the workers share is the store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use warden_lock::{KeyValueStore, LockConfig, LockError, LockManager, LockStats, ValueStore};

use crate::service::{DeductOutcome, StockConfig, StockError, StockService};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub workers: usize,
    pub requests: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            requests: 200,
        }
    }
}

/// Outcome counts of one driver run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriverReport {
    pub requests: u64,
    pub deducted: u64,
    pub insufficient: u64,
    /// Lock not acquired within the wait budget
    pub busy: u64,
    /// Lock lost while deducting
    pub lost: u64,
    pub failed: u64,
    pub final_stock: Option<i64>,
    pub elapsed_ms: u64,
    pub lock_stats: LockStats,
}

impl DriverReport {
    fn absorb(&mut self, other: DriverReport) {
        self.requests += other.requests;
        self.deducted += other.deducted;
        self.insufficient += other.insufficient;
        self.busy += other.busy;
        self.lost += other.lost;
        self.failed += other.failed;
        self.lock_stats.merge(&other.lock_stats);
    }

    fn record(&mut self, result: Result<DeductOutcome, StockError>) {
        self.requests += 1;
        match result {
            Ok(DeductOutcome::Deducted { .. }) => self.deducted += 1,
            Ok(DeductOutcome::Insufficient) => self.insufficient += 1,
            Err(StockError::Lock(LockError::AcquireTimeout { .. })) => self.busy += 1,
            Err(StockError::Lock(LockError::LockLost { .. })) => self.lost += 1,
            Err(e) => {
                warn!(error = %e, "Deduction failed");
                self.failed += 1;
            }
        }
    }
}

pub struct ContentionDriver {
    locks: Arc<dyn KeyValueStore>,
    values: Arc<dyn ValueStore>,
    lock_config: LockConfig,
    stock_config: StockConfig,
    config: DriverConfig,
}

impl ContentionDriver {
    pub fn new(
        locks: Arc<dyn KeyValueStore>,
        values: Arc<dyn ValueStore>,
        lock_config: LockConfig,
        stock_config: StockConfig,
        config: DriverConfig,
    ) -> Self {
        Self {
            locks,
            values,
            lock_config,
            stock_config,
            config,
        }
    }

    /// A stock service backed by a fresh manager, i.e. a new simulated process.
    pub fn process(&self) -> Result<StockService, StockError> {
        let manager = LockManager::new(self.locks.clone(), self.lock_config.clone());
        StockService::new(manager, self.values.clone(), &self.stock_config)
    }

    pub async fn seed(&self) -> Result<(), StockError> {
        self.process()?
            .seed(self.stock_config.initial_stock)
            .await
    }

    /// Requests handled by worker `index`; the remainder goes to the first workers.
    fn share(&self, index: usize) -> usize {
        let workers = self.config.workers.max(1);
        self.config.requests / workers + usize::from(index < self.config.requests % workers)
    }

    pub async fn run(&self) -> anyhow::Result<DriverReport> {
        let workers = self.config.workers.max(1);
        info!(
            workers,
            requests = self.config.requests,
            product = %self.stock_config.product,
            "Starting contention run"
        );

        let started = Instant::now();
        let mut tasks = JoinSet::new();
        for index in 0..workers {
            let service = self.process()?;
            let share = self.share(index);
            tasks.spawn(async move {
                let mut report = DriverReport::default();
                for _ in 0..share {
                    report.record(service.deduct_stock().await);
                }
                report.lock_stats = service.locks().stats();
                debug!(worker = index, ?report, "Worker finished");
                report
            });
        }

        let mut report = DriverReport::default();
        while let Some(joined) = tasks.join_next().await {
            report.absorb(joined.context("Driver worker panicked")?);
        }

        report.elapsed_ms = elapsed_millis(started.elapsed());
        report.final_stock = self.process()?.current_stock().await?;
        Ok(report)
    }
}

fn elapsed_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
