//! Business services that run under a distributed lock

pub mod stock;

pub use stock::{DeductOutcome, StockConfig, StockError, StockService};
