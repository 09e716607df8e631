//! Prometheus metrics exposition
//!
//! - `relay_requests_total` (counter): labels `flow`, `outcome`
//! - `relay_duration_seconds` (histogram): label `flow`
//! - `staging_cleanup_failures_total` (counter)
//! - `token_refresh_total` (counter): labels `provider`, `result`, emitted by
//!   the token cache

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// Relay duration buckets, from a cached-token fast path up to slow uploads
/// near the outbound timeout.
const DURATION_BUCKETS: &[f64] = &[
    0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
];

/// Counters served on `/health`.
#[derive(Clone)]
pub struct ServiceMetrics {
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }
}

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("relay_duration_seconds".to_string()),
        DURATION_BUCKETS,
    )
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// `relay_duration_seconds` gets explicit buckets so it renders as a
/// histogram with `_bucket` lines rather than a summary.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record a finished relay. `outcome` is `success` or the error kind.
pub fn record_relay(flow: &'static str, outcome: &'static str, duration_secs: f64) {
    metrics::counter!("relay_requests_total", "flow" => flow, "outcome" => outcome).increment(1);
    metrics::histogram!("relay_duration_seconds", "flow" => flow).record(duration_secs);
}

/// Record a staging file that could not be deleted.
pub fn record_cleanup_failure() {
    metrics::counter!("staging_cleanup_failures_total").increment(1);
}
