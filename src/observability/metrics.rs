//! # Metrics Collection
//!
//! Counters emitted through the `metrics` facade. No exporter is installed
//! here; embedders wire up whichever recorder they use.

use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;

static DESCRIBED: OnceCell<()> = OnceCell::new();

/// Register metric descriptions with the installed recorder (once)
pub fn describe_metrics() {
    DESCRIBED.get_or_init(|| {
        describe_counter!("secrets_cache_lookups_total", "Cache lookups by result (hit/miss)");
        describe_counter!("secrets_remote_calls_total", "Remote GetSecretValue calls by endpoint and outcome");
        describe_counter!("secrets_fetch_failures_total", "Fetches that failed on every endpoint");
        describe_counter!("secrets_refreshes_total", "Cache refreshes by trigger and outcome");
    });
}

/// Records client metrics
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    pub fn new() -> Self {
        describe_metrics();
        Self
    }

    /// Record a cache lookup
    pub fn record_cache_lookup(&self, hit: bool) {
        let labels = [("result", if hit { "hit" } else { "miss" }.to_string())];
        counter!("secrets_cache_lookups_total", &labels).increment(1);
    }

    /// Record one remote call against an endpoint
    pub fn record_remote_call(&self, endpoint: &str, success: bool) {
        let labels = [
            ("endpoint", endpoint.to_string()),
            ("outcome", if success { "success" } else { "failure" }.to_string()),
        ];
        counter!("secrets_remote_calls_total", &labels).increment(1);
    }

    /// Record a fetch that exhausted every endpoint
    pub fn record_fetch_failure(&self) {
        counter!("secrets_fetch_failures_total").increment(1);
    }

    /// Record a refresh; `trigger` is one of `miss`, `manual`, `scheduled`, `init`
    pub fn record_refresh(&self, trigger: &'static str, success: bool) {
        let labels = [
            ("trigger", trigger.to_string()),
            ("outcome", if success { "success" } else { "failure" }.to_string()),
        ];
        counter!("secrets_refreshes_total", &labels).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let recorder = MetricsRecorder::new();
        recorder.record_cache_lookup(true);
        recorder.record_cache_lookup(false);
        recorder.record_remote_call("kms.cn-hangzhou.aliyuncs.com", false);
        recorder.record_fetch_failure();
        recorder.record_refresh("scheduled", true);
    }
}
