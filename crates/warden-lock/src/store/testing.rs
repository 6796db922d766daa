//! Store wrappers for fault scenarios in unit tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{KeyValueStore, MemoryStore, StoreError};

/// Delegates to a `MemoryStore`, except that renewals never get an answer.
pub(crate) struct UnansweredRenewals {
    pub(crate) inner: Arc<MemoryStore>,
}

#[async_trait]
impl KeyValueStore for UnansweredRenewals {
    async fn set_if_absent_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.inner.set_if_absent_with_expiry(key, value, ttl).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        self.inner.compare_and_delete(key, expected).await
    }

    async fn compare_and_extend_expiry(
        &self,
        _key: &str,
        _expected: &str,
        _ttl: Duration,
    ) -> Result<bool, StoreError> {
        std::future::pending().await
    }
}
