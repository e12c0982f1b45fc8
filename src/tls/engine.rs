//! The TLS engine as seen by the pipe.
//!
//! An engine is an opaque capability: it performs non-blocking handshake
//! steps and record I/O on a borrowed socket and reports what it needs next.
//! It owns all of its buffers; the pipe never inspects them.

use std::fmt;

use crate::tls::error::TlsError;

/// Readiness an engine is waiting for before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Want {
    Read,
    Write,
    Either,
}

/// A hard, non-retryable engine failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineFault {
    /// Negotiation or record-layer protocol failure.
    Protocol(String),
    /// The peer certificate was rejected.
    PeerCertificate(String),
    /// The peer did not present a certificate.
    MissingCertificate,
    /// The peer closed the connection.
    Closed,
    /// The socket reported an error.
    Io(String),
}

impl fmt::Display for EngineFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineFault::Protocol(reason) => write!(f, "protocol error: {}", reason),
            EngineFault::PeerCertificate(reason) => write!(f, "peer certificate rejected: {}", reason),
            EngineFault::MissingCertificate => write!(f, "peer presented no certificate"),
            EngineFault::Closed => write!(f, "connection closed by peer"),
            EngineFault::Io(reason) => write!(f, "socket error: {}", reason),
        }
    }
}

/// Result of one non-blocking handshake step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Done,
    /// No progress is possible until the socket becomes ready.
    Pending(Want),
    Fatal(EngineFault),
}

/// Result of one non-blocking record read or write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoOutcome {
    /// Plaintext bytes moved; always greater than zero.
    Transferred(usize),
    /// Nothing moved, try again once the socket is ready.
    WouldBlock,
    Failed(EngineFault),
}

/// Engine verdict on the peer certificate chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Ok,
    /// No chain has been verified on this session.
    NotVerified,
    Rejected(String),
}

/// A per-connection engine session.
pub trait TlsSession {
    fn handshake_step(&mut self) -> Step;

    /// Decrypted bytes buffered inside the engine.
    fn pending_plaintext(&self) -> usize;

    fn read(&mut self, buf: &mut [u8]) -> IoOutcome;

    fn write(&mut self, buf: &[u8]) -> IoOutcome;

    /// Push already-encrypted records to the socket.
    ///
    /// `Done` means nothing is left buffered.
    fn flush_records(&mut self) -> Step;

    fn has_peer_certificate(&self) -> bool;

    fn verify_result(&self) -> VerifyResult;
}

/// Builds the engine context and session for one pipe.
///
/// The socket is borrowed for `'a`; the session must not close it.
pub trait TlsEngine<'a, S: ?Sized> {
    type Session: TlsSession + 'a;

    /// Create the context, bind it to `socket`, switch the socket to
    /// non-blocking mode and configure SNI and hostname verification.
    fn connect(&self, hostname: &str, socket: &'a S) -> Result<Self::Session, TlsError>;
}
