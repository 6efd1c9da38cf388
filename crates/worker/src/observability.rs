use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

const ENTRIES_PROCESSED_TOTAL: &str = "questflow_worker_entries_processed_total";
const ENTRY_PROCESSING_DURATION_MS: &str = "questflow_worker_entry_processing_duration_ms";
const DEAD_LETTERS_TOTAL: &str = "questflow_worker_dead_letters_total";
const FETCH_ERRORS_TOTAL: &str = "questflow_worker_fetch_errors_total";
const ACK_ERRORS_TOTAL: &str = "questflow_worker_ack_errors_total";
const RECLAIMED_ENTRIES_TOTAL: &str = "questflow_worker_reclaimed_entries_total";
const ACTIVE_CONSUMERS_GAUGE: &str = "questflow_worker_active_consumers";

/// Installs the global recorder and serves `/metrics` on `metrics_addr`.
pub fn init_metrics(metrics_addr: &str) -> Result<()> {
    let addr: SocketAddr = metrics_addr
        .parse()
        .with_context(|| format!("invalid metrics_addr '{metrics_addr}'"))?;
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    Ok(())
}

pub fn register_entry_processed(result: &str, duration_ms: f64) {
    counter!(ENTRIES_PROCESSED_TOTAL, "result" => result.to_string()).increment(1);
    histogram!(ENTRY_PROCESSING_DURATION_MS, "result" => result.to_string())
        .record(duration_ms.max(0.0));
}

pub fn register_dead_letter(reason: &str) {
    counter!(DEAD_LETTERS_TOTAL, "reason" => reason.to_string()).increment(1);
}

pub fn register_fetch_error() {
    counter!(FETCH_ERRORS_TOTAL).increment(1);
}

pub fn register_ack_error() {
    counter!(ACK_ERRORS_TOTAL).increment(1);
}

pub fn register_reclaimed(count: usize) {
    counter!(RECLAIMED_ENTRIES_TOTAL).increment(count as u64);
}

pub fn set_active_consumers(count: usize) {
    gauge!(ACTIVE_CONSUMERS_GAUGE).set(count as f64);
}
