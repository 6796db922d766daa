//! Lock data model
//!
//! `LockName` and `FencingToken` are the two values that identify a lock record
//! in the store. `LockHandle` is the process-local view of one successful
//! acquisition; it is shared with the watchdog only through `HandleState`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::LockError;
use crate::stats::LockStatsCollector;
use crate::store::KeyValueStore;

/// Name of a contended resource, e.g. a product id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LockName(String);

impl LockName {
    pub fn new(name: impl Into<String>) -> Result<Self, LockError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(LockError::InvalidOptions(
                "lock name must not be blank".to_string(),
            ));
        }
        if name.chars().any(char::is_control) {
            return Err(LockError::InvalidOptions(format!(
                "lock name {:?} contains control characters",
                name
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key under which the lock record for this name lives in the store.
    pub fn store_key(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.0)
    }
}

impl TryFrom<String> for LockName {
    type Error = LockError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<LockName> for String {
    fn from(value: LockName) -> Self {
        value.0
    }
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Value identifying one acquisition attempt; stored as the record's value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FencingToken(String);

impl FencingToken {
    /// Fresh token for a new acquisition attempt.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for FencingToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for FencingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lock settings as they appear in configuration files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Prepended to every lock name to form the store key
    pub key_prefix: String,
    /// Record time-to-live in milliseconds
    pub ttl_ms: u64,
    /// Maximum time to wait for a contended lock (0 = single attempt)
    pub max_wait_ms: u64,
    /// Pause between acquisition attempts in milliseconds
    pub retry_interval_ms: u64,
    /// Keep held locks alive with a background renewer
    pub watchdog: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            key_prefix: "lock:".to_string(),
            ttl_ms: 30_000,
            max_wait_ms: 10_000,
            retry_interval_ms: 100,
            watchdog: true,
        }
    }
}

impl LockConfig {
    pub fn acquire_options(&self) -> AcquireOptions {
        AcquireOptions {
            ttl: Duration::from_millis(self.ttl_ms),
            max_wait: Duration::from_millis(self.max_wait_ms),
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            watchdog: self.watchdog,
        }
    }
}

/// Per-call acquisition parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireOptions {
    pub ttl: Duration,
    pub max_wait: Duration,
    pub retry_interval: Duration,
    pub watchdog: bool,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        LockConfig::default().acquire_options()
    }
}

impl AcquireOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn with_watchdog(mut self, watchdog: bool) -> Self {
        self.watchdog = watchdog;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), LockError> {
        // Stores expire records with millisecond resolution
        if self.ttl < Duration::from_millis(1) {
            return Err(LockError::InvalidOptions(format!(
                "ttl must be at least 1ms, got {:?}",
                self.ttl
            )));
        }
        if self.retry_interval.is_zero() {
            return Err(LockError::InvalidOptions(
                "retry interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of a guarded release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseOutcome {
    /// The record carried our token and was deleted
    Released,
    /// The record was gone or belonged to another acquisition; nothing deleted
    NotOwner,
}

/// Held/lost flag shared between a handle and its watchdog.
#[derive(Debug)]
pub(crate) struct HandleState {
    held: watch::Sender<bool>,
}

impl HandleState {
    fn new() -> Self {
        let (held, _) = watch::channel(true);
        Self { held }
    }

    pub(crate) fn is_held(&self) -> bool {
        *self.held.borrow()
    }

    /// Returns true if this call flipped the flag.
    pub(crate) fn mark_lost(&self) -> bool {
        self.held.send_if_modified(|held| std::mem::replace(held, false))
    }

    /// The owner gave the lock up; observers see it as no longer held.
    pub(crate) fn mark_released(&self) {
        self.held.send_replace(false);
    }

    fn subscribe(&self) -> Ownership {
        Ownership {
            rx: self.held.subscribe(),
        }
    }
}

/// Read-only view of whether a handle still owns its lock.
///
/// Handed to protected work so it can stop early once exclusivity is gone.
#[derive(Debug, Clone)]
pub struct Ownership {
    rx: watch::Receiver<bool>,
}

impl Ownership {
    pub fn is_held(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once ownership is lost or the owning handle is gone.
    pub async fn lost(&mut self) {
        let _ = self.rx.wait_for(|held| !*held).await;
    }
}

/// One successful acquisition of a named lock.
///
/// Dropping a handle that is still held and was never released issues the
/// guarded release on the current tokio runtime, so cancelled callers do not
/// keep the record alive until its TTL runs out.
pub struct LockHandle {
    name: LockName,
    key: String,
    token: FencingToken,
    ttl: Duration,
    /// When the winning acquisition request was sent. The record cannot
    /// outlive `lease_start + ttl` unless renewed.
    lease_start: Instant,
    acquired_at: Instant,
    state: Arc<HandleState>,
    store: Arc<dyn KeyValueStore>,
    stats: Arc<LockStatsCollector>,
    armed: bool,
}

impl LockHandle {
    pub(crate) fn new(
        name: LockName,
        key: String,
        token: FencingToken,
        ttl: Duration,
        lease_start: Instant,
        store: Arc<dyn KeyValueStore>,
        stats: Arc<LockStatsCollector>,
    ) -> Self {
        Self {
            name,
            key,
            token,
            ttl,
            lease_start,
            acquired_at: Instant::now(),
            state: Arc::new(HandleState::new()),
            store,
            stats,
            armed: true,
        }
    }

    pub fn name(&self) -> &LockName {
        &self.name
    }

    /// Store key of the lock record.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &FencingToken {
        &self.token
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// False once the watchdog has observed that the record is no longer ours.
    pub fn is_held(&self) -> bool {
        self.state.is_held()
    }

    pub fn ownership(&self) -> Ownership {
        self.state.subscribe()
    }

    pub(crate) fn lease_start(&self) -> Instant {
        self.lease_start
    }

    pub(crate) fn state(&self) -> Arc<HandleState> {
        self.state.clone()
    }

    pub(crate) fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Stop the drop path from touching the store; used once the release has
    /// been handled explicitly.
    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("token", &self.token)
            .field("ttl", &self.ttl)
            .field("held", &self.is_held())
            .finish()
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if !self.armed || !self.state.is_held() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                lock = %self.name,
                ttl = ?self.ttl,
                "Lock handle dropped outside a runtime, record will expire on its own"
            );
            return;
        };

        let store = self.store.clone();
        let key = std::mem::take(&mut self.key);
        let token = self.token.clone();
        let name = self.name.clone();
        let stats = self.stats.clone();
        let held_for = self.held_for();
        runtime.spawn(async move {
            match store.compare_and_delete(&key, token.as_str()).await {
                Ok(true) => {
                    stats.record_released(held_for);
                    debug!(lock = %name, "Released lock from dropped handle");
                }
                Ok(false) => {
                    stats.record_not_owner();
                    debug!(lock = %name, "Dropped handle no longer owned its lock");
                }
                Err(e) => warn!(
                    lock = %name,
                    error = %e,
                    "Failed to release lock from dropped handle, record will expire on its own"
                ),
            }
        });
    }
}
