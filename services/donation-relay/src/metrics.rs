//! Prometheus metrics exposition
//!
//! - `relay_requests_total` (counter): labels `endpoint`, `status`
//! - `relay_request_duration_seconds` (histogram): label `endpoint`
//! - `relay_upstream_errors_total` (counter): label `error_type`
//! - `token_refresh_total` (counter, recorded in payments-auth): label `outcome`

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Configures `relay_request_duration_seconds` with explicit buckets so it
/// renders as a histogram (with `_bucket` lines) rather than a summary.
/// The upper buckets cover the configurable upstream timeout range.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                "relay_request_duration_seconds".to_string(),
            ),
            &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
        )
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed request with endpoint and status labels.
pub fn record_request(endpoint: &'static str, status: u16, duration_secs: f64) {
    metrics::counter!(
        "relay_requests_total",
        "endpoint" => endpoint,
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("relay_request_duration_seconds", "endpoint" => endpoint)
        .record(duration_secs);
}

/// Record an upstream error with a classification label.
pub fn record_upstream_error(error_type: &'static str) {
    metrics::counter!("relay_upstream_errors_total", "error_type" => error_type).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        // When no recorder is installed, metrics calls are no-ops.
        record_request("checkout", 200, 0.05);
        record_upstream_error("transaction");
    }

    /// Create an isolated recorder/handle pair for unit tests. Only one
    /// global recorder can exist per process, so tests must not call
    /// install_recorder().
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_request_increments_counter_and_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request("checkout", 200, 0.042);
        record_request("auth_callback", 500, 1.5);

        let output = handle.render();
        assert!(
            output.contains("relay_requests_total"),
            "rendered output must contain relay_requests_total counter"
        );
        assert!(
            output.contains("endpoint=\"checkout\""),
            "counter must carry endpoint label"
        );
        assert!(
            output.contains("status=\"500\""),
            "second request status label must appear"
        );
        assert!(
            output.contains("relay_request_duration_seconds"),
            "histogram must be recorded"
        );
    }

    #[test]
    fn record_upstream_error_increments_counter_with_label() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_upstream_error("transaction");
        record_upstream_error("token_exchange");

        let output = handle.render();
        assert!(output.contains("relay_upstream_errors_total"));
        assert!(
            output.contains("error_type=\"transaction\""),
            "error_type label must be recorded"
        );
        assert!(
            output.contains("error_type=\"token_exchange\""),
            "distinct error_type values must appear separately"
        );
    }
}
