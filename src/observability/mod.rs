//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! TLS pipe / TCP pipe:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (handshake outcomes, byte counters, sticky errors)
//! ```
//!
//! # Design Decisions
//! - Engine reason strings are logged, never returned as panics
//! - Metrics are no-ops until the embedding process installs a recorder

pub mod logging;
pub mod metrics;
