//! TLS client layer.
//!
//! # Data Flow
//! ```text
//! TlsPipe::handshake(hostname, timeout)
//!     → rustls_engine.rs (client context: protocols, suites, trust anchors)
//!     → verifier.rs (hostname pinning, chain depth, verdict capture)
//!     → handshake.rs (state machine + deadline)
//!     → pipe.rs (record I/O reconciled with transport readiness)
//!
//! Handshake States:
//!     NotStarted → Negotiating → Established
//!                            ↘ Failed(kind)
//! ```
//!
//! # Design Decisions
//! - Certificate problems are always fatal; there is no insecure mode
//! - The engine sits behind a trait so the pipe logic can be driven by a
//!   scripted engine in tests

pub mod engine;
pub mod error;
pub mod handshake;
pub mod pipe;
pub mod rustls_engine;
mod verifier;

pub use engine::{TlsEngine, TlsSession};
pub use error::TlsError;
pub use handshake::{FailureKind, HandshakeState};
pub use pipe::TlsPipe;
pub use rustls_engine::RustlsEngine;
