//! Prometheus metrics for deployment runs
//!
//! Exposes metrics for:
//! - Submissions dispatched, confirmed and failed
//! - Steps skipped through recorded history
//! - Pending transactions resumed after an interrupted run
//! - Confirmation latency

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::path::Path;
use tracing::info;

lazy_static! {
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "tesseract_deploy_transactions_submitted_total",
        "Total transactions dispatched",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "tesseract_deploy_transactions_confirmed_total",
        "Total transactions confirmed",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "tesseract_deploy_transactions_failed_total",
        "Total submissions that failed",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_SKIPPED: CounterVec = register_counter_vec!(
        "tesseract_deploy_steps_skipped_total",
        "Total steps answered from recorded history",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_RESUMED: CounterVec = register_counter_vec!(
        "tesseract_deploy_transactions_resumed_total",
        "Total pending transactions picked up from a previous run",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_LATENCY: HistogramVec = register_histogram_vec!(
        "tesseract_deploy_confirmation_latency_seconds",
        "Time from dispatch (or resume) to confirmation",
        &["chain_id"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();
}

/// Render all registered metrics in the Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Write metrics for a node exporter textfile collector
pub fn write_textfile(path: &Path) -> std::io::Result<()> {
    std::fs::write(path, render())?;
    info!("Wrote metrics to {:?}", path);
    Ok(())
}

// Helper functions to record metrics

pub fn record_tx_submitted(chain_id: u64) {
    TX_SUBMITTED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_tx_confirmed(chain_id: u64) {
    TX_CONFIRMED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_tx_failed(chain_id: u64) {
    TX_FAILED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_step_skipped(chain_id: u64) {
    TX_SKIPPED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_tx_resumed(chain_id: u64) {
    TX_RESUMED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_tx_latency(chain_id: u64, latency_secs: f64) {
    TX_LATENCY
        .with_label_values(&[&chain_id.to_string()])
        .observe(latency_secs);
}
