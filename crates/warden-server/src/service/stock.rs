//! Stock deduction under the product lock
//!
//! The counter itself lives in the shared store as a plain decimal string and
//! is read and written with unguarded get/set. Only the product lock makes the
//! read-modify-write safe across processes.

use std::sync::Arc;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use warden_lock::{LockError, LockManager, LockName, Ownership, StoreError, ValueStore};

use crate::metrics::{STOCK_DEDUCTED, STOCK_INSUFFICIENT};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StockConfig {
    /// Lock name guarding the counter
    pub product: String,
    /// Store key holding the remaining stock
    pub stock_key: String,
    pub initial_stock: i64,
    /// Overwrite the counter with `initial_stock` at startup
    pub seed: bool,
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            product: "product_001".to_string(),
            stock_key: "stock".to_string(),
            initial_stock: 100,
            seed: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeductOutcome {
    Deducted { remaining: i64 },
    Insufficient,
}

#[derive(thiserror::Error, Debug)]
pub enum StockError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("stock store error: {0}")]
    Store(#[from] StoreError),

    #[error("no stock recorded under '{0}'")]
    NotSeeded(String),

    #[error("stock under '{key}' is not an integer: {value:?}")]
    Corrupt { key: String, value: String },
}

pub struct StockService {
    locks: LockManager,
    values: Arc<dyn ValueStore>,
    product: LockName,
    stock_key: String,
}

impl StockService {
    pub fn new(
        locks: LockManager,
        values: Arc<dyn ValueStore>,
        config: &StockConfig,
    ) -> Result<Self, StockError> {
        Ok(Self {
            locks,
            values,
            product: LockName::new(config.product.as_str())?,
            stock_key: config.stock_key.clone(),
        })
    }

    pub fn product(&self) -> &LockName {
        &self.product
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Overwrite the counter, under the product lock.
    pub async fn seed(&self, stock: i64) -> Result<(), StockError> {
        let values = &self.values;
        let key = self.stock_key.as_str();
        self.locks
            .run_exclusive(&self.product, |_| async move {
                values.set(key, &stock.to_string()).await
            })
            .await??;
        info!(product = %self.product, stock, "Stock seeded");
        Ok(())
    }

    pub async fn current_stock(&self) -> Result<Option<i64>, StockError> {
        match self.values.get(&self.stock_key).await? {
            Some(raw) => parse_stock(&self.stock_key, &raw).map(Some),
            None => Ok(None),
        }
    }

    /// Take one unit of stock if any is left.
    ///
    /// Lock failures (busy, lost, store down) surface as `StockError::Lock`
    /// and leave the counter untouched.
    pub async fn deduct_stock(&self) -> Result<DeductOutcome, StockError> {
        let values = self.values.as_ref();
        let key = self.stock_key.as_str();
        let product = &self.product;
        self.locks
            .run_exclusive(&self.product, |ownership| async move {
                deduct_one(values, key, product, &ownership).await
            })
            .await?
    }
}

async fn deduct_one(
    values: &dyn ValueStore,
    key: &str,
    product: &LockName,
    ownership: &Ownership,
) -> Result<DeductOutcome, StockError> {
    let raw = values
        .get(key)
        .await?
        .ok_or_else(|| StockError::NotSeeded(key.to_string()))?;
    let stock = parse_stock(key, &raw)?;

    if stock <= 0 {
        counter!(STOCK_INSUFFICIENT).increment(1);
        warn!(product = %product, stock, "insufficient stock");
        return Ok(DeductOutcome::Insufficient);
    }

    if !ownership.is_held() {
        return Err(LockError::LockLost {
            name: product.to_string(),
        }
        .into());
    }

    let remaining = stock - 1;
    values.set(key, &remaining.to_string()).await?;
    counter!(STOCK_DEDUCTED).increment(1);
    info!(product = %product, remaining, "deducted, remaining stock: {}", remaining);
    Ok(DeductOutcome::Deducted { remaining })
}

fn parse_stock(key: &str, raw: &str) -> Result<i64, StockError> {
    raw.trim().parse().map_err(|_| StockError::Corrupt {
        key: key.to_string(),
        value: raw.to_string(),
    })
}
