//! Store contracts
//!
//! `KeyValueStore` is everything the lock protocol needs from the shared
//! store: three operations, each atomic at the store. Lock records are never
//! read outside of them. `ValueStore` is plain get/set for the data the
//! protected work manipulates.

mod memory;
#[cfg(feature = "redis")]
mod redis;
#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

use async_trait::async_trait;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached (connection refused, dropped, timed out)
    #[error("store unreachable: {0}")]
    Unavailable(String),

    /// The store answered with something the client could not use
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Atomic primitives backing the lock protocol.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Write `value` under `key` with an expiry of `ttl`, only if no live entry
    /// exists. Returns whether the write happened.
    async fn set_if_absent_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Delete `key` only if its live value equals `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    /// Reset the expiry of `key` to `ttl` from now, only if its live value
    /// equals `expected`. The value itself is left unchanged.
    async fn compare_and_extend_expiry(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;
}

/// Unguarded reads and writes for data protected by a lock.
#[async_trait]
pub trait ValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}
