//! Configuration management for the Warden server
//!
//! Values are layered: `conf/application.yml` (optional), then `WARDEN_*`
//! environment variables (`__` separates nested keys, e.g.
//! `WARDEN_LOCK__TTL_MS=5000`), then command line flags.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use config::{Config, ConfigError, Environment};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use warden_lock::LockConfig;

use crate::driver::DriverConfig;
use crate::service::StockConfig;
use crate::startup::LoggingConfig;

pub const DEFAULT_CONFIG_FILE: &str = "conf/application.yml";
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/0";

/// Command line arguments for the server
#[derive(Debug, Clone, Parser)]
#[command(name = "warden-server", version, about)]
pub struct Cli {
    /// Configuration file; missing files are ignored
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,
    /// Store backend: memory or redis
    #[arg(short = 'b', long = "backend")]
    pub backend: Option<String>,
    #[arg(long = "redis-url", env = "REDIS_URL")]
    pub redis_url: Option<String>,
    /// Concurrent workers, each acting as a separate process
    #[arg(short = 'w', long = "workers")]
    pub workers: Option<u32>,
    /// Total deduction requests across all workers
    #[arg(short = 'n', long = "requests")]
    pub requests: Option<u32>,
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: PathBuf::from(DEFAULT_CONFIG_FILE),
            backend: None,
            redis_url: None,
            workers: None,
            requests: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

impl std::str::FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "redis" => Ok(StoreBackend::Redis),
            other => anyhow::bail!("unknown store backend '{}', expected memory or redis", other),
        }
    }
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::Memory => write!(f, "memory"),
            StoreBackend::Redis => write!(f, "redis"),
        }
    }
}

/// Application configuration loaded from config files, environment and flags
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    /// Load configuration using the process's command line.
    pub fn new() -> anyhow::Result<Self> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        let mut builder = Config::builder()
            .add_source(config::File::from(cli.config.as_path()).required(false))
            .add_source(
                Environment::with_prefix("WARDEN")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Some(v) = cli.backend {
            builder = builder.set_override("store.backend", v)?;
        }
        if let Some(v) = cli.redis_url {
            builder = builder.set_override("store.redis_url", v)?;
        }
        if let Some(v) = cli.workers {
            builder = builder.set_override("driver.workers", i64::from(v))?;
        }
        if let Some(v) = cli.requests {
            builder = builder.set_override("driver.requests", i64::from(v))?;
        }

        let config = builder.build().with_context(|| {
            format!(
                "Failed to build configuration - check {}",
                cli.config.display()
            )
        })?;

        Ok(Configuration { config })
    }

    /// Deserialize a whole section, falling back to its defaults when absent.
    fn section<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: DeserializeOwned + Default,
    {
        match self.config.get::<T>(key) {
            Ok(value) => Ok(value),
            Err(ConfigError::NotFound(_)) => Ok(T::default()),
            Err(e) => Err(e).with_context(|| format!("Invalid '{}' configuration", key)),
        }
    }

    // ========================================================================
    // Lock Configuration
    // ========================================================================

    pub fn lock_config(&self) -> anyhow::Result<LockConfig> {
        self.section("lock")
    }

    // ========================================================================
    // Store Configuration
    // ========================================================================

    pub fn store_backend(&self) -> anyhow::Result<StoreBackend> {
        self.config
            .get_string("store.backend")
            .unwrap_or("memory".to_string())
            .parse()
    }

    pub fn redis_url(&self) -> String {
        self.config
            .get_string("store.redis_url")
            .unwrap_or(DEFAULT_REDIS_URL.to_string())
    }

    /// Sweep interval for expired records in the memory backend
    pub fn memory_cleanup_interval_ms(&self) -> u64 {
        self.config
            .get_int("store.cleanup_interval_ms")
            .unwrap_or(1000)
            .max(1) as u64
    }

    // ========================================================================
    // Stock / Driver Configuration
    // ========================================================================

    pub fn stock_config(&self) -> anyhow::Result<StockConfig> {
        self.section("stock")
    }

    pub fn driver_config(&self) -> anyhow::Result<DriverConfig> {
        self.section("driver")
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::from_config(
            self.config.get_string("logging.path").ok(),
            self.config.get_bool("logging.console").unwrap_or(true),
            self.config.get_bool("logging.file").unwrap_or(true),
            &self
                .config
                .get_string("logging.level")
                .unwrap_or("info".to_string()),
            &self
                .config
                .get_string("logging.rotation")
                .unwrap_or("daily".to_string()),
        )
    }

    // ========================================================================
    // Metrics Configuration
    // ========================================================================

    /// Log the Prometheus exposition once the run completes
    pub fn metrics_report_enabled(&self) -> bool {
        self.config.get_bool("metrics.report").unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("application.yml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn cli_for(path: PathBuf) -> Cli {
        Cli {
            config: path,
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Configuration::from_cli(cli_for(dir.path().join("absent.yml"))).unwrap();

        let lock = config.lock_config().unwrap();
        assert_eq!(lock, LockConfig::default());
        assert_eq!(config.store_backend().unwrap(), StoreBackend::Memory);
        assert_eq!(config.redis_url(), DEFAULT_REDIS_URL);

        let stock = config.stock_config().unwrap();
        assert_eq!(stock.product, "product_001");
        assert_eq!(stock.stock_key, "stock");
    }

    #[test]
    fn test_yaml_sections_are_deserialized() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
lock:
  ttl_ms: 5000
  retry_interval_ms: 20
store:
  backend: redis
  redis_url: redis://cache:6379/2
stock:
  initial_stock: 7
  seed: true
driver:
  workers: 3
  requests: 12
logging:
  level: debug
  console: false
"#,
        );
        let config = Configuration::from_cli(cli_for(path)).unwrap();

        let lock = config.lock_config().unwrap();
        assert_eq!(lock.ttl_ms, 5000);
        assert_eq!(lock.retry_interval_ms, 20);
        // Unset fields keep their defaults
        assert_eq!(lock.max_wait_ms, 10_000);
        assert_eq!(
            lock.acquire_options().ttl,
            Duration::from_millis(5000)
        );

        assert_eq!(config.store_backend().unwrap(), StoreBackend::Redis);
        assert_eq!(config.redis_url(), "redis://cache:6379/2");

        let stock = config.stock_config().unwrap();
        assert_eq!(stock.initial_stock, 7);
        assert!(stock.seed);
        assert_eq!(stock.product, "product_001");

        let driver = config.driver_config().unwrap();
        assert_eq!(driver.workers, 3);
        assert_eq!(driver.requests, 12);

        let logging = config.logging_config();
        assert!(!logging.console_output);
        assert_eq!(logging.console_level, tracing::Level::DEBUG);
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "store:\n  backend: redis\ndriver:\n  workers: 3\n  requests: 12\n",
        );
        let cli = Cli {
            config: path,
            backend: Some("memory".to_string()),
            redis_url: Some("redis://other:6379/0".to_string()),
            workers: Some(8),
            requests: Some(100),
        };
        let config = Configuration::from_cli(cli).unwrap();

        assert_eq!(config.store_backend().unwrap(), StoreBackend::Memory);
        assert_eq!(config.redis_url(), "redis://other:6379/0");
        let driver = config.driver_config().unwrap();
        assert_eq!(driver.workers, 8);
        assert_eq!(driver.requests, 100);
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let dir = TempDir::new().unwrap();
        let cli = Cli {
            config: dir.path().join("absent.yml"),
            backend: Some("etcd".to_string()),
            ..Default::default()
        };
        let config = Configuration::from_cli(cli).unwrap();
        assert!(config.store_backend().is_err());
    }

    #[test]
    fn test_invalid_section_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "lock:\n  ttl_ms: soon\n");
        let config = Configuration::from_cli(cli_for(path)).unwrap();
        assert!(config.lock_config().is_err());
    }

    #[test]
    fn test_backend_parse_and_display() {
        assert_eq!("Redis".parse::<StoreBackend>().unwrap(), StoreBackend::Redis);
        assert_eq!(StoreBackend::Memory.to_string(), "memory");
    }
}
