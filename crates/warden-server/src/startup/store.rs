//! Shared store bootstrap
//!
//! Both store contracts are served by one backend instance so that lock
//! records and the protected data live in the same place.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;
use tracing::info;
use warden_lock::{KeyValueStore, MemoryStore, RedisStore, ValueStore};

use crate::model::config::StoreBackend;

pub struct SharedStore {
    pub locks: Arc<dyn KeyValueStore>,
    pub values: Arc<dyn ValueStore>,
    cleanup: Option<JoinHandle<()>>,
}

impl SharedStore {
    /// In-process store with a background sweep of expired records.
    pub fn memory(cleanup_every: Duration) -> Self {
        let store = Arc::new(MemoryStore::new());
        let cleanup = store.start_cleanup(cleanup_every);
        info!(?cleanup_every, "Using in-memory store");
        Self {
            locks: store.clone(),
            values: store,
            cleanup: Some(cleanup),
        }
    }

    pub async fn redis(url: &str) -> anyhow::Result<Self> {
        let store = Arc::new(
            RedisStore::connect(url)
                .await
                .with_context(|| format!("Failed to connect to redis at {}", url))?,
        );
        info!(url, "Using redis store");
        Ok(Self {
            locks: store.clone(),
            values: store,
            cleanup: None,
        })
    }

    pub async fn connect(
        backend: StoreBackend,
        redis_url: &str,
        cleanup_every: Duration,
    ) -> anyhow::Result<Self> {
        match backend {
            StoreBackend::Memory => Ok(Self::memory(cleanup_every)),
            StoreBackend::Redis => Self::redis(redis_url).await,
        }
    }
}

impl Drop for SharedStore {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup.abort();
        }
    }
}
