//! Prometheus metrics for the proxy pipeline.
//!
//! The recorder is installed once per process; [`init`] is safe to call from
//! every router build (tests build many routers).

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::warn;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// How a proxied request was answered
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    /// Playlist buffered and rewritten
    Rewritten,
    /// 200 body streamed unchanged
    Passthrough,
    /// Non-200 upstream response relayed as-is
    Relayed,
    /// Request failed before anything was relayed
    Failed,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Rewritten => "rewritten",
            Outcome::Passthrough => "passthrough",
            Outcome::Relayed => "relayed",
            Outcome::Failed => "failed",
        }
    }
}

/// Install the global Prometheus recorder (first call only) and return its handle.
pub fn init() -> PrometheusHandle {
    HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if ::metrics::set_global_recorder(recorder).is_err() {
                warn!("A global metrics recorder was already installed");
            }
            handle
        })
        .clone()
}

pub fn record_request(outcome: Outcome, status: u16) {
    ::metrics::counter!(
        "hls_relay_requests_total",
        "outcome" => outcome.as_str(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_duration(outcome: Outcome, start: Instant) {
    ::metrics::histogram!(
        "hls_relay_request_duration_seconds",
        "outcome" => outcome.as_str()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_error() {
    ::metrics::counter!("hls_relay_upstream_errors_total").increment(1);
}

pub fn record_redirects(hops: u32) {
    if hops > 0 {
        ::metrics::counter!("hls_relay_redirects_followed_total").increment(u64::from(hops));
    }
}

pub fn record_rewritten_references(count: usize) {
    ::metrics::counter!("hls_relay_rewritten_references_total").increment(count as u64);
}

pub fn record_decode_fallback() {
    ::metrics::counter!("hls_relay_decode_fallbacks_total").increment(1);
}

pub fn record_streamed_bytes(bytes: usize) {
    ::metrics::counter!("hls_relay_streamed_bytes_total").increment(bytes as u64);
}

pub fn record_oversized_playlist() {
    ::metrics::counter!("hls_relay_oversized_playlists_total").increment(1);
}
