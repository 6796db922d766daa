//! Application startup utilities

pub mod logging;
pub mod store;

pub use logging::{LogRotation, LoggingConfig, LoggingGuard, init_logging};
pub use store::SharedStore;
