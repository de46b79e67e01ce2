//! Metrics and observability utilities
//!
//! Prometheus metrics for the story pipeline. Vendor calls are slow
//! (tens of seconds for a chapter image), so stage histograms use
//! coarse buckets.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Fairytale metrics
pub const METRICS_PREFIX: &str = "fairytale";

/// Buckets for HTTP request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.00,
];

/// Buckets for pipeline stages (in seconds)
pub const STAGE_BUCKETS: &[f64] = &[
    0.5,   // snapshot, persist
    1.0,
    2.0,
    5.0,
    10.0,
    20.0,  // typical chapter image
    30.0,
    60.0,
    120.0, // story text
    300.0,
    600.0, // whole run
];

/// Name of the HTTP latency histogram
pub fn request_duration_metric() -> String {
    format!("{}_request_duration_seconds", METRICS_PREFIX)
}

/// Name of the pipeline stage histogram
pub fn stage_duration_metric() -> String {
    format!("{}_pipeline_stage_duration_seconds", METRICS_PREFIX)
}

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        request_duration_metric(),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    describe_counter!(
        format!("{}_stories_generated_total", METRICS_PREFIX),
        Unit::Count,
        "Stories generated and persisted"
    );

    describe_histogram!(
        stage_duration_metric(),
        Unit::Seconds,
        "Duration of each story pipeline stage"
    );

    describe_counter!(
        format!("{}_vendor_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Calls to text, image, speech and storage vendors"
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
            request_duration_metric(),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Times one pipeline stage; records on `finish`
pub struct StageTimer {
    start: Instant,
    stage: &'static str,
}

impl StageTimer {
    pub fn start(stage: &'static str) -> Self {
        Self {
            start: Instant::now(),
            stage,
        }
    }

    /// Record the elapsed time and return it in seconds
    pub fn finish(self) -> f64 {
        let elapsed = self.start.elapsed().as_secs_f64();
        record_stage(self.stage, elapsed);
        elapsed
    }
}

/// Record a pipeline stage duration
pub fn record_stage(stage: &str, duration_secs: f64) {
    histogram!(
        stage_duration_metric(),
        "stage" => stage.to_string()
    )
    .record(duration_secs);
}

/// Count one call to an external vendor
pub fn record_vendor_request(vendor: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_vendor_requests_total", METRICS_PREFIX),
        "vendor" => vendor.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Count a story that made it all the way to persistence
pub fn record_story_generated(backend: &str) {
    counter!(
        format!("{}_stories_generated_total", METRICS_PREFIX),
        "backend" => backend.to_string()
    )
    .increment(1);
}
