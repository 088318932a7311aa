//! Operational telemetry (C6): job outcome counters, a latency
//! histogram, and stream-lag gauges, exposed in Prometheus exposition
//! format.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// `jobs_processed_total{result}` label values.
pub const RESULT_SUCCESS: &str = "success";
pub const RESULT_INVALID: &str = "invalid";
pub const RESULT_SKIPPED: &str = "skipped";
pub const RESULT_RETRY: &str = "retry";
pub const RESULT_DEAD_LETTER: &str = "dead_letter";
pub const RESULT_FAILURE: &str = "failure";

const LATENCY_BUCKETS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0];

/// Starts the Prometheus HTTP exporter on `0.0.0.0:{port}`.
///
/// # Errors
///
/// Returns an error if the exporter cannot bind the listener.
pub fn install(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full("job_processing_seconds".to_string()),
            LATENCY_BUCKETS,
        )?
        .install()?;

    info!(%addr, "metrics exporter listening");
    Ok(())
}

/// Increments `jobs_processed_total{result}`.
pub fn record_result(result: &'static str) {
    counter!("jobs_processed_total", "result" => result).increment(1);
}

/// Records one observation of `job_processing_seconds`.
pub fn record_latency(seconds: f64) {
    histogram!("job_processing_seconds").record(seconds);
}

/// Sets `pending_jobs` and `stream_lag_seconds` after a processed entry.
pub fn set_stream_gauges(pending: u64, lag_seconds: f64) {
    gauge!("pending_jobs").set(pending as f64);
    gauge!("stream_lag_seconds").set(lag_seconds);
}
