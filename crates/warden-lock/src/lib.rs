//! Warden Lock - fenced, self-expiring mutual exclusion over a shared key-value store
//!
//! This crate provides:
//! - Lock data model: names, fencing tokens, handles
//! - The `KeyValueStore` contract plus in-memory and Redis stores
//! - `LockManager`: atomic acquire with expiry, owner-checked release
//! - Watchdog renewal at a third of the TTL
//! - `run_exclusive`: scoped execution of protected work under a held lock

mod error;
mod manager;
mod model;
mod runner;
mod stats;
pub mod store;
mod watchdog;

pub use error::LockError;
pub use manager::LockManager;
pub use model::*;
pub use stats::{LockStats, describe_metrics};
pub use store::{KeyValueStore, MemoryStore, StoreError, ValueStore};
pub use watchdog::RenewerTask;

#[cfg(feature = "redis")]
pub use store::RedisStore;
