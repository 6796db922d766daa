//! Lock acquisition and release
//!
//! Acquire is a single `set_if_absent_with_expiry` per attempt, retried at a
//! fixed interval until the wait budget runs out. Release is a single
//! `compare_and_delete` against the handle's token.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::LockError;
use crate::model::{
    AcquireOptions, FencingToken, LockConfig, LockHandle, LockName, ReleaseOutcome,
};
use crate::stats::{LockStats, LockStatsCollector};
use crate::store::KeyValueStore;
use crate::watchdog::RenewerTask;

/// Acquires and releases named locks against one shared store.
///
/// Cheap to clone; clones share statistics.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn KeyValueStore>,
    config: LockConfig,
    stats: Arc<LockStatsCollector>,
}

impl LockManager {
    pub fn new(store: Arc<dyn KeyValueStore>, config: LockConfig) -> Self {
        info!(
            key_prefix = %config.key_prefix,
            ttl_ms = config.ttl_ms,
            max_wait_ms = config.max_wait_ms,
            retry_interval_ms = config.retry_interval_ms,
            watchdog = config.watchdog,
            "LockManager initialized"
        );
        Self {
            store,
            config,
            stats: Arc::new(LockStatsCollector::default()),
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn default_options(&self) -> AcquireOptions {
        self.config.acquire_options()
    }

    pub fn stats(&self) -> LockStats {
        self.stats.snapshot()
    }

    /// Acquire `name` with the configured defaults.
    pub async fn acquire(&self, name: &LockName) -> Result<LockHandle, LockError> {
        self.acquire_with(name, self.default_options()).await
    }

    /// Acquire `name`, polling every `retry_interval` while another holder
    /// owns it. A last attempt is made when `max_wait` runs out; after that
    /// the call fails with `AcquireTimeout`. A store failure ends the call
    /// immediately.
    pub async fn acquire_with(
        &self,
        name: &LockName,
        options: AcquireOptions,
    ) -> Result<LockHandle, LockError> {
        options.validate()?;

        let key = name.store_key(&self.config.key_prefix);
        let token = FencingToken::generate();
        let started = Instant::now();
        let deadline = started + options.max_wait;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let sent = Instant::now();
            let acquired = self
                .store
                .set_if_absent_with_expiry(&key, token.as_str(), options.ttl)
                .await
                .inspect_err(|e| {
                    warn!(lock = %name, error = %e, "Store unavailable while acquiring lock")
                })?;

            if acquired {
                self.stats.record_acquired();
                debug!(
                    lock = %name,
                    token = %token,
                    ttl = ?options.ttl,
                    attempts,
                    "Lock acquired"
                );
                return Ok(LockHandle::new(
                    name.clone(),
                    key,
                    token,
                    options.ttl,
                    sent,
                    self.store.clone(),
                    self.stats.clone(),
                ));
            }

            self.stats.record_contended();
            let now = Instant::now();
            if now >= deadline {
                self.stats.record_timeout();
                let waited = now.duration_since(started);
                debug!(lock = %name, ?waited, attempts, "Lock acquisition timed out");
                return Err(LockError::AcquireTimeout {
                    name: name.to_string(),
                    waited,
                });
            }

            tokio::time::sleep(options.retry_interval.min(deadline - now)).await;
        }
    }

    /// Single acquisition attempt with the configured TTL.
    pub async fn try_acquire(&self, name: &LockName) -> Result<Option<LockHandle>, LockError> {
        let options = self.default_options().with_max_wait(std::time::Duration::ZERO);
        match self.acquire_with(name, options).await {
            Ok(handle) => Ok(Some(handle)),
            Err(LockError::AcquireTimeout { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete the lock record if it still carries this handle's token.
    ///
    /// `NotOwner` means the record expired (and was possibly taken by someone
    /// else) before the release; nothing is deleted in that case.
    pub async fn release(&self, mut handle: LockHandle) -> Result<ReleaseOutcome, LockError> {
        let result = handle
            .store()
            .compare_and_delete(handle.key(), handle.token().as_str())
            .await;
        handle.disarm();
        handle.state().mark_released();

        let deleted = result.inspect_err(|e| {
            warn!(
                lock = %handle.name(),
                error = %e,
                "Store unavailable while releasing lock, record will expire on its own"
            )
        })?;

        if deleted {
            self.stats.record_released(handle.held_for());
            debug!(lock = %handle.name(), token = %handle.token(), "Lock released");
            Ok(ReleaseOutcome::Released)
        } else {
            self.stats.record_not_owner();
            warn!(
                lock = %handle.name(),
                token = %handle.token(),
                held_for = ?handle.held_for(),
                "Lock expired or was reassigned before release, nothing deleted"
            );
            Ok(ReleaseOutcome::NotOwner)
        }
    }

    /// Start a watchdog that keeps `handle`'s record alive until stopped.
    pub fn start_renewer(&self, handle: &LockHandle) -> RenewerTask {
        RenewerTask::spawn(handle, self.stats.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn manager_with_store() -> (LockManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let manager = LockManager::new(store.clone(), LockConfig::default());
        (manager, store)
    }

    fn name(value: &str) -> LockName {
        LockName::new(value).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_writes_token_with_ttl() {
        let (manager, store) = manager_with_store();
        let lock = name("product_001");

        let handle = manager.acquire(&lock).await.unwrap();
        assert!(handle.is_held());
        assert_eq!(
            store.peek("lock:product_001").as_deref(),
            Some(handle.token().as_str())
        );
        assert_eq!(
            store.remaining_ttl("lock:product_001"),
            Some(Duration::from_secs(30))
        );

        assert_eq!(
            manager.release(handle).await.unwrap(),
            ReleaseOutcome::Released
        );
        assert_eq!(store.peek("lock:product_001"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_returns_none_when_held() {
        let (manager, _store) = manager_with_store();
        let lock = name("product_001");

        let first = manager.try_acquire(&lock).await.unwrap();
        assert!(first.is_some());
        assert!(manager.try_acquire(&lock).await.unwrap().is_none());

        let stats = manager.stats();
        assert_eq!(stats.acquisitions, 1);
        assert_eq!(stats.contended_attempts, 1);
        assert_eq!(stats.timeouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_timeout_after_max_wait() {
        let (manager, _store) = manager_with_store();
        let lock = name("product_001");
        let _holder = manager.acquire(&lock).await.unwrap();

        let options = AcquireOptions::default()
            .with_max_wait(Duration::from_millis(500))
            .with_retry_interval(Duration::from_millis(100));
        let started = Instant::now();
        let err = manager.acquire_with(&lock, options).await.unwrap_err();

        match err {
            LockError::AcquireTimeout { name, waited } => {
                assert_eq!(name, "product_001");
                assert!(waited >= Duration::from_millis(500));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert!(started.elapsed() < Duration::from_millis(600));
        // Attempts at 0, 100, 200, 300, 400 and 500ms
        assert_eq!(manager.stats().contended_attempts, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_sleep_is_clamped_to_deadline() {
        let (manager, _store) = manager_with_store();
        let lock = name("product_001");
        let _holder = manager.acquire(&lock).await.unwrap();

        let options = AcquireOptions::default()
            .with_max_wait(Duration::from_millis(150))
            .with_retry_interval(Duration::from_millis(100));
        let started = Instant::now();
        assert!(manager.acquire_with(&lock, options).await.is_err());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(150));
        assert!(elapsed < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_after_expiry_is_not_owner() {
        let (manager, store) = manager_with_store();
        let lock = name("product_001");
        let options = AcquireOptions::default().with_ttl(Duration::from_secs(1));

        let stale = manager.acquire_with(&lock, options).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;

        let current = manager.acquire_with(&lock, options).await.unwrap();
        assert_ne!(stale.token(), current.token());

        assert_eq!(
            manager.release(stale).await.unwrap(),
            ReleaseOutcome::NotOwner
        );
        assert_eq!(
            store.peek("lock:product_001").as_deref(),
            Some(current.token().as_str())
        );
        assert_eq!(manager.stats().not_owner_releases, 1);
    }

    #[tokio::test]
    async fn test_store_outage_is_not_contention() {
        let (manager, store) = manager_with_store();
        store.set_available(false);

        let err = manager.acquire(&name("product_001")).await.unwrap_err();
        assert!(matches!(err, LockError::StoreUnavailable(_)));
        assert_eq!(manager.stats().contended_attempts, 0);
    }

    #[tokio::test]
    async fn test_release_propagates_store_outage() {
        let (manager, store) = manager_with_store();
        let handle = manager.acquire(&name("product_001")).await.unwrap();

        store.set_available(false);
        let err = manager.release(handle).await.unwrap_err();
        assert!(matches!(err, LockError::StoreUnavailable(_)));

        store.set_available(true);
        assert!(store.peek("lock:product_001").is_some());
    }

    #[tokio::test]
    async fn test_invalid_ttl_rejected() {
        let (manager, _store) = manager_with_store();
        let options = AcquireOptions::default().with_ttl(Duration::ZERO);

        let err = manager
            .acquire_with(&name("product_001"), options)
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::InvalidOptions(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handle_releases_lock() {
        let (manager, store) = manager_with_store();
        let handle = manager.acquire(&name("product_001")).await.unwrap();

        drop(handle);
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(store.peek("lock:product_001"), None);
    }

    #[tokio::test]
    async fn test_key_prefix_from_config() {
        let store = Arc::new(MemoryStore::new());
        let config = LockConfig {
            key_prefix: String::new(),
            ..Default::default()
        };
        let manager = LockManager::new(store.clone(), config);

        let handle = manager.acquire(&name("product_001")).await.unwrap();
        assert_eq!(
            store.peek("product_001").as_deref(),
            Some(handle.token().as_str())
        );
    }
}
