// Metrics module for observability
// Installs the Prometheus recorder and describes lock and stock metrics

use anyhow::Context;
use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const STOCK_DEDUCTED: &str = "warden_stock_deducted_total";
pub const STOCK_INSUFFICIENT: &str = "warden_stock_insufficient_total";

/// Register stock metric descriptions alongside the lock crate's.
pub fn describe_metrics() {
    warden_lock::describe_metrics();

    describe_counter!(STOCK_DEDUCTED, "Units of stock successfully deducted");
    describe_counter!(
        STOCK_INSUFFICIENT,
        "Deduction requests that found no stock left"
    );
}

/// Install the global Prometheus recorder.
/// Should be called once at application startup
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;
    describe_metrics();
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::counter;

    #[test]
    fn test_stock_counters_render() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            describe_metrics();
            counter!(STOCK_DEDUCTED).increment(3);
            counter!(STOCK_INSUFFICIENT).increment(1);
        });

        let rendered = handle.render();
        assert!(rendered.contains("warden_stock_deducted_total 3"));
        assert!(rendered.contains("warden_stock_insufficient_total 1"));
        assert!(rendered.contains("# HELP warden_stock_deducted_total"));
    }
}
