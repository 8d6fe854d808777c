//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions.

use metrics::{
    counter, describe_counter, describe_histogram, histogram, Unit,
};
use std::time::Instant;

/// Metrics prefix for all Factweave metrics
pub const METRICS_PREFIX: &str = "factweave";

/// SLO-aligned histogram buckets for query latency (in seconds).
/// The structured fast path targets P99 < 100ms; semantic queries are
/// dominated by the engine and embedding round trips.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001,  // 1ms
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms - structured P99 target
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
];

/// Buckets for engine and embedding calls (typically slower)
pub const UPSTREAM_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Query metrics
    describe_counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total queries by route"
    );

    describe_histogram!(
        format!("{}_query_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Query latency in seconds by route"
    );

    // Attribution metrics
    describe_counter!(
        format!("{}_attribution_resolutions_total", METRICS_PREFIX),
        Unit::Count,
        "Chunk attribution resolutions by tier"
    );

    describe_counter!(
        format!("{}_unattributed_sentences_total", METRICS_PREFIX),
        Unit::Count,
        "Answer sentences with no qualifying source"
    );

    // Engine metrics
    describe_counter!(
        format!("{}_engine_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total retrieval engine requests"
    );

    describe_histogram!(
        format!("{}_engine_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Retrieval engine latency in seconds"
    );

    // Embedding metrics
    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    // Ingestion metrics
    describe_counter!(
        format!("{}_documents_ingested_total", METRICS_PREFIX),
        Unit::Count,
        "Total documents ingested"
    );

    describe_counter!(
        format!("{}_signal_writes_total", METRICS_PREFIX),
        Unit::Count,
        "Signal store writes by outcome"
    );

    describe_histogram!(
        format!("{}_ingestion_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Document ingestion latency in seconds"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record query metrics
pub fn record_query(duration_secs: f64, route: &str) {
    counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        "route" => route.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_query_duration_seconds", METRICS_PREFIX),
        "route" => route.to_string()
    )
    .record(duration_secs);
}

/// Helper to record a chunk attribution resolution
pub fn record_attribution(tier: &str) {
    counter!(
        format!("{}_attribution_resolutions_total", METRICS_PREFIX),
        "tier" => tier.to_string()
    )
    .increment(1);
}

/// Helper to record unattributed sentences in an answer
pub fn record_unattributed_sentences(count: usize) {
    if count > 0 {
        counter!(format!("{}_unattributed_sentences_total", METRICS_PREFIX))
            .increment(count as u64);
    }
}

/// Helper to record engine call metrics
pub fn record_engine_call(duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_engine_requests_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(format!("{}_engine_duration_seconds", METRICS_PREFIX))
            .record(duration_secs);
    }
}

/// Helper to record a signal store write outcome
pub fn record_signal_write(success: bool) {
    let outcome = if success { "written" } else { "failed" };

    counter!(
        format!("{}_signal_writes_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Helper to record document ingestion
pub fn record_ingestion(duration_secs: f64) {
    counter!(format!("{}_documents_ingested_total", METRICS_PREFIX)).increment(1);

    histogram!(format!("{}_ingestion_duration_seconds", METRICS_PREFIX))
        .record(duration_secs);
}
