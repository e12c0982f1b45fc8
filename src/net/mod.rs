//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! TcpStream (connected, caller-owned)
//!     → tcp.rs (TcpPipe: readiness waits, byte accounting, throttling)
//!     → pipe.rs (StreamPipe trait: the contract the TLS layer consumes)
//!     → crate::tls::TlsPipe (borrows the pipe, never owns it)
//! ```
//!
//! # Design Decisions
//! - Readiness waits are the only place a caller blocks
//! - Throttlers are shared (`Arc`) so one budget can span several pipes
//! - `None` timeouts wait indefinitely

pub mod pipe;
pub mod tcp;
pub mod throttle;

pub use pipe::{timeout_from_millis, Direction, Layer, RawSocket, StreamPipe};
pub use tcp::TcpPipe;
pub use throttle::{apply_limits, BandwidthThrottler, Throttler};
