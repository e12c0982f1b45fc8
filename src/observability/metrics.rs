//! Metrics recording.
//!
//! # Metrics
//! - `tls_pipe_handshakes_total` (counter): handshakes by outcome
//! - `tls_pipe_handshake_duration_seconds` (histogram): handshake latency
//! - `tls_pipe_bytes_total` (counter): bytes by direction and layer
//! - `tls_pipe_io_errors_total` (counter): sticky read/write failures

use std::time::Instant;

use crate::net::pipe::{Direction, Layer};

/// Record a finished handshake attempt.
pub fn record_handshake(outcome: &'static str, start: Instant) {
    metrics::counter!("tls_pipe_handshakes_total", "outcome" => outcome).increment(1);
    metrics::histogram!("tls_pipe_handshake_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_bytes(direction: Direction, layer: Layer, bytes: usize) {
    metrics::counter!(
        "tls_pipe_bytes_total",
        "direction" => direction.as_str(),
        "layer" => layer.as_str()
    )
    .increment(bytes as u64);
}

/// Record the transition of a pipe into its permanent error state.
pub fn record_io_error(operation: &'static str) {
    metrics::counter!("tls_pipe_io_errors_total", "operation" => operation).increment(1);
}
