//! Observability infrastructure for the analysis engine
//!
//! Provides:
//! - Prometheus metrics (benchmark duration, roofline cache hits, extraction misses, verdicts)
//! - Structured event logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for micro-benchmark runs (in seconds)
const BENCHMARK_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

struct EngineMetricsInner {
    benchmark_duration_seconds: Histogram,
    roofline_cache_hits: IntCounter,
    roofline_cache_misses: IntCounter,
    benchmark_failures: IntCounter,
    extraction_misses: IntCounter,
    classifications: IntCounterVec,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            benchmark_duration_seconds: register_histogram!(
                "perfcore_benchmark_duration_seconds",
                "Wall time of roofline micro-benchmark runs",
                BENCHMARK_BUCKETS.to_vec()
            )
            .expect("Failed to register benchmark_duration_seconds"),

            roofline_cache_hits: register_int_counter!(
                "perfcore_roofline_cache_hits_total",
                "Roofline lookups served from the node cache"
            )
            .expect("Failed to register roofline_cache_hits_total"),

            roofline_cache_misses: register_int_counter!(
                "perfcore_roofline_cache_misses_total",
                "Roofline lookups that required measurement"
            )
            .expect("Failed to register roofline_cache_misses_total"),

            benchmark_failures: register_int_counter!(
                "perfcore_benchmark_failures_total",
                "Micro-benchmark runs that produced no usable figure"
            )
            .expect("Failed to register benchmark_failures_total"),

            extraction_misses: register_int_counter!(
                "perfcore_extraction_misses_total",
                "Known metrics that could not be extracted from any report"
            )
            .expect("Failed to register extraction_misses_total"),

            classifications: register_int_counter_vec!(
                "perfcore_classifications_total",
                "Classification verdicts by rule",
                &["rule", "verdict"]
            )
            .expect("Failed to register classifications_total"),
        }
    }
}

/// Handle to the process-wide engine metrics.
///
/// Clones share the same underlying collectors.
#[derive(Clone)]
pub struct EngineMetrics {
    _private: (),
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EngineMetricsInner {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new)
    }

    pub fn observe_benchmark_duration(&self, duration_secs: f64) {
        self.inner().benchmark_duration_seconds.observe(duration_secs);
    }

    pub fn inc_cache_hit(&self) {
        self.inner().roofline_cache_hits.inc();
    }

    pub fn inc_cache_miss(&self) {
        self.inner().roofline_cache_misses.inc();
    }

    pub fn inc_benchmark_failure(&self) {
        self.inner().benchmark_failures.inc();
    }

    pub fn add_extraction_misses(&self, count: u64) {
        self.inner().extraction_misses.inc_by(count);
    }

    pub fn inc_classification(&self, rule: &str, verdict: &str) {
        self.inner()
            .classifications
            .with_label_values(&[rule, verdict])
            .inc();
    }

    /// Render the default registry in the Prometheus text format
    pub fn export_text(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// Structured logger for engine events
///
/// Every record carries an `event` field and the node it ran on so runs
/// from many hosts can be filtered after aggregation.
#[derive(Clone)]
pub struct StructuredLogger {
    node: String,
}

impl StructuredLogger {
    pub fn new(node: impl Into<String>) -> Self {
        Self { node: node.into() }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn log_analysis_started(&self, run_label: &str, reports: usize, measure_roofline: bool) {
        info!(
            event = "analysis_started",
            node = %self.node,
            run_label = %run_label,
            reports = reports,
            measure_roofline = measure_roofline,
            "Starting counter analysis"
        );
    }

    pub fn log_roofline_cache_hit(&self, signature: &str) {
        info!(
            event = "roofline_cache_hit",
            node = %self.node,
            signature = %signature,
            "Using cached roofline record"
        );
    }

    pub fn log_roofline_measured(&self, signature: Option<&str>, measured: usize, failed: usize, persisted: bool) {
        info!(
            event = "roofline_measured",
            node = %self.node,
            signature = ?signature,
            measured = measured,
            failed = failed,
            persisted = persisted,
            "Measured roofline bounds"
        );
    }

    pub fn log_benchmark_failed(&self, target: &str, kernel: &str, reason: &str) {
        warn!(
            event = "benchmark_failed",
            node = %self.node,
            target = %target,
            kernel = %kernel,
            reason = %reason,
            "Roofline benchmark failed, roof recorded as absent"
        );
    }

    pub fn log_classification(
        &self,
        run_label: &str,
        rule: &str,
        verdict: &str,
        confidence: Option<f64>,
        unavailable: &[&str],
    ) {
        info!(
            event = "classification",
            node = %self.node,
            run_label = %run_label,
            rule = %rule,
            verdict = %verdict,
            confidence = ?confidence,
            unavailable = ?unavailable,
            "Classified run"
        );
    }

    pub fn log_aggregate(&self, rule: &str, runs: usize, fraction: Option<f64>, confirmed: bool) {
        info!(
            event = "aggregate_verdict",
            node = %self.node,
            rule = %rule,
            runs = runs,
            fraction = ?fraction,
            confirmed = confirmed,
            "Aggregated cross-run verdicts"
        );
    }

    pub fn log_summary_written(&self, run_label: &str, path: &str, rows: usize) {
        info!(
            event = "summary_written",
            node = %self.node,
            run_label = %run_label,
            path = %path,
            rows = rows,
            "Wrote summary record"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_metrics_export() {
        let metrics = EngineMetrics::new();
        metrics.observe_benchmark_duration(1.5);
        metrics.inc_cache_hit();
        metrics.inc_cache_miss();
        metrics.inc_benchmark_failure();
        metrics.add_extraction_misses(2);
        metrics.inc_classification("strict", "memory_bound");

        let text = metrics.export_text();
        assert!(text.contains("perfcore_roofline_cache_hits_total"));
        assert!(text.contains("perfcore_classifications_total{rule=\"strict\",verdict=\"memory_bound\"}"));
        assert!(text.contains("perfcore_benchmark_duration_seconds_bucket"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-node");
        assert_eq!(logger.node(), "test-node");
    }
}
