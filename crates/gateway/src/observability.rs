//! Prometheus exporter setup

use fairytale_common::metrics::{
    request_duration_metric, stage_duration_metric, LATENCY_BUCKETS, STAGE_BUCKETS,
};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};

/// Exporter with bucketed histograms for request latency and pipeline stages.
///
/// Everything else keeps the exporter default (summaries).
pub fn prometheus_builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(request_duration_metric()), LATENCY_BUCKETS)?
        .set_buckets_for_metric(Matcher::Full(stage_duration_metric()), STAGE_BUCKETS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fairytale_common::metrics::{record_stage, RequestMetrics};

    #[test]
    fn test_stage_durations_render_as_buckets() {
        let recorder = prometheus_builder().unwrap().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_stage("chapter_image", 18.0);
            RequestMetrics::start("GET", "/health").finish(200);
        });

        let rendered = handle.render();
        assert!(rendered.contains("fairytale_pipeline_stage_duration_seconds_bucket"));
        assert!(rendered.contains("fairytale_request_duration_seconds_bucket"));
    }
}
