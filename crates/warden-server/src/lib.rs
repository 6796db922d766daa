// Main library module for Warden - stock deduction guarded by a distributed lock
// The binary wires these together into a contention run against one shared store

pub mod driver; // Concurrent deduction workers
pub mod metrics; // Prometheus recorder and metric descriptions
pub mod model; // Configuration
pub mod service; // Business services
pub mod startup; // Logging and store bootstrap

pub use model::Configuration;
