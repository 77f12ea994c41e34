//! Prometheus Metrics Module
//!
//! Counters and gauges for the streaming data plane.
//!
//! # Metrics Categories
//!
//! - **Frames**: inbound frames and bytes, undecodable frames
//! - **Connections**: open connections, keepalive timeouts, reconnects
//! - **Bus**: messages published per topic
//! - **Order books**: applied updates and dropped stale deltas
//!
//! # Integration
//!
//! The host exposes the rendered output at `/metrics` on the health port.
//! Recording without an installed recorder is a no-op.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder, or return the installed handle.
///
/// # Errors
///
/// Returns an error if another recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Prometheus handle for rendering, `None` before [`init_metrics`].
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

const FRAMES_RECEIVED: &str = "realtime_client_frames_received_total";
const BYTES_RECEIVED: &str = "realtime_client_bytes_received_total";
const DECODE_ERRORS: &str = "realtime_client_decode_errors_total";
const CONNECTIONS_OPEN: &str = "realtime_client_connections_open";
const KEEPALIVE_TIMEOUTS: &str = "realtime_client_keepalive_timeouts_total";
const RECONNECTS: &str = "realtime_client_reconnects_total";
const MESSAGES_PUBLISHED: &str = "realtime_client_messages_published_total";
const BOOK_UPDATES: &str = "realtime_client_orderbook_updates_total";
const STALE_DELTAS: &str = "realtime_client_orderbook_stale_deltas_total";

fn register_metrics() {
    describe_counter!(FRAMES_RECEIVED, "Inbound frames received from venues");
    describe_counter!(BYTES_RECEIVED, "Inbound frame bytes before decompression");
    describe_counter!(DECODE_ERRORS, "Inbound frames that failed to decode");

    describe_gauge!(CONNECTIONS_OPEN, "Connections currently open");
    describe_counter!(KEEPALIVE_TIMEOUTS, "Connections closed by a missed keepalive");
    describe_counter!(RECONNECTS, "Reconnection attempts scheduled by supervisors");

    describe_counter!(MESSAGES_PUBLISHED, "Messages published on the topic bus");

    describe_counter!(BOOK_UPDATES, "Order book changes applied, by kind");
    describe_counter!(STALE_DELTAS, "Order book deltas dropped as stale");
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Kind of order book change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookUpdateKind {
    /// Full snapshot.
    Snapshot,
    /// Incremental delta.
    Delta,
}

impl BookUpdateKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Delta => "delta",
        }
    }
}

/// Record an inbound frame.
pub fn record_frame_received(bytes: usize) {
    counter!(FRAMES_RECEIVED).increment(1);
    counter!(BYTES_RECEIVED).increment(u64::try_from(bytes).unwrap_or(u64::MAX));
}

/// Record a frame that failed to decode.
pub fn record_decode_error() {
    counter!(DECODE_ERRORS).increment(1);
}

/// Record a connection reaching the open state.
pub fn connection_opened() {
    gauge!(CONNECTIONS_OPEN).increment(1.0);
}

/// Record an open connection closing.
pub fn connection_closed() {
    gauge!(CONNECTIONS_OPEN).decrement(1.0);
}

/// Record a keepalive deadline miss.
pub fn record_keepalive_timeout() {
    counter!(KEEPALIVE_TIMEOUTS).increment(1);
}

/// Record a scheduled reconnection attempt.
pub fn record_reconnect(url: &str) {
    counter!(RECONNECTS, "url" => url.to_string()).increment(1);
}

/// Record a message published on the bus.
pub fn record_published(topic: &str) {
    counter!(MESSAGES_PUBLISHED, "topic" => topic.to_string()).increment(1);
}

/// Record an applied order book change.
pub fn record_book_update(symbol: &str, kind: BookUpdateKind) {
    counter!(
        BOOK_UPDATES,
        "symbol" => symbol.to_string(),
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a dropped stale delta.
pub fn record_stale_delta(symbol: &str) {
    counter!(STALE_DELTAS, "symbol" => symbol.to_string()).increment(1);
}

// =============================================================================
// Tests
// =============================================================================
