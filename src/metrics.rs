// Prometheus metrics for the webhook engine
//
// Exposes metrics on /metrics HTTP endpoint:
// - Records created per source (counter)
// - Attempt outcomes and durations (counter, histogram)
// - Skipped attempts by reason (counter)
// - Sweep runs, processed records and errors (counters, gauge)
// - Replays and retention cleanups (counters)

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder,
};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    // Record metrics
    pub static ref RECORDS_CREATED_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("webhook_records_created_total", "Total number of webhook records created"),
        &["source"]
    ).expect("Failed to create records created metric");

    pub static ref REPLAYS_TOTAL: IntCounter = IntCounter::new(
        "webhook_replays_total",
        "Total number of operator replays"
    ).expect("Failed to create replays metric");

    pub static ref RECORDS_CLEANED_TOTAL: IntCounter = IntCounter::new(
        "webhook_records_cleaned_total",
        "Total number of terminal records removed by retention cleanup"
    ).expect("Failed to create records cleaned metric");

    // Attempt metrics
    pub static ref ATTEMPTS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("webhook_attempts_total", "Total number of completed processing attempts"),
        &["outcome"]
    ).expect("Failed to create attempts metric");

    pub static ref ATTEMPTS_SKIPPED_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("webhook_attempts_skipped_total", "Attempts skipped because the record was not eligible"),
        &["reason"]
    ).expect("Failed to create skipped attempts metric");

    pub static ref ATTEMPT_DURATION_SECONDS: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new("webhook_attempt_duration_seconds", "Handler duration per attempt"),
    ).expect("Failed to create attempt duration metric");

    // Sweep metrics
    pub static ref SWEEPS_TOTAL: IntCounter = IntCounter::new(
        "webhook_sweeps_total",
        "Total number of retry sweeps run"
    ).expect("Failed to create sweeps metric");

    pub static ref SWEEP_PROCESSED_TOTAL: IntCounter = IntCounter::new(
        "webhook_sweep_processed_total",
        "Total number of records attempted by sweeps"
    ).expect("Failed to create sweep processed metric");

    pub static ref SWEEP_ERRORS_TOTAL: IntCounter = IntCounter::new(
        "webhook_sweep_errors_total",
        "Total number of sweeps aborted by store errors"
    ).expect("Failed to create sweep errors metric");

    pub static ref SWEEP_LAST_DUE: IntGauge = IntGauge::new(
        "webhook_sweep_last_due",
        "Records found due by the most recent sweep"
    ).expect("Failed to create sweep last due metric");
}

/// Initialize metrics registry - must be called once at startup
pub fn init() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(RECORDS_CREATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REPLAYS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECORDS_CLEANED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ATTEMPTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ATTEMPTS_SKIPPED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ATTEMPT_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(SWEEPS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SWEEP_PROCESSED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SWEEP_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SWEEP_LAST_DUE.clone()))?;
    Ok(())
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_counters() {
        let before = ATTEMPTS_TOTAL.with_label_values(&["success"]).get();
        ATTEMPTS_TOTAL.with_label_values(&["success"]).inc();
        assert!(ATTEMPTS_TOTAL.with_label_values(&["success"]).get() > before);
    }

    #[test]
    fn test_gather_after_init() {
        // May fail if another test registered first, which is fine
        let _ = init();

        SWEEPS_TOTAL.inc();
        let text = gather_metrics().unwrap();
        assert!(text.contains("webhook_sweeps_total"));
    }
}
