//! A TLS session layered on a borrowed [`StreamPipe`].
//!
//! # Responsibilities
//! - Drive the non-blocking engine handshake to completion within a deadline
//! - Refuse peers whose certificate is missing or fails verification
//! - Reconcile engine "would block" signals with blocking-with-timeout I/O
//! - Keep a sticky error flag once record I/O fails
//!
//! # Blocking model
//! Engine calls never block. The only suspension points are the transport's
//! readiness waits, each bounded by the caller's timeout (`None` waits
//! indefinitely).

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::net::pipe::{Direction, Layer, StreamPipe};
use crate::net::throttle::Throttler;
use crate::observability::metrics;
use crate::tls::engine::{EngineFault, IoOutcome, Step, TlsEngine, TlsSession, VerifyResult, Want};
use crate::tls::error::TlsError;
use crate::tls::handshake::{Deadline, FailureKind, HandshakeEvent, HandshakeState};
use crate::tls::rustls_engine::RustlsEngine;

/// Size of the staging buffer used by [`TlsPipe::read_chunk`].
pub const READ_CHUNK_SIZE: usize = 8192;

enum WriteFailure {
    NotWritable,
    Retry,
    Fault(EngineFault),
}

/// TLS client pipe over a transport it does not own.
///
/// The engine context and session are created by [`TlsPipe::handshake`] and
/// released together when the pipe is dropped. The transport is only borrowed
/// and is never closed here.
pub struct TlsPipe<'a, P, E = RustlsEngine>
where
    P: StreamPipe,
    E: TlsEngine<'a, P::Socket>,
{
    transport: &'a P,
    engine: E,
    session: Option<E::Session>,
    state: HandshakeState,
    hostname: String,
    error: bool,
}

impl<'a, P, E> TlsPipe<'a, P, E>
where
    P: StreamPipe,
    E: TlsEngine<'a, P::Socket>,
{
    pub fn new(transport: &'a P, engine: E) -> Self {
        Self {
            transport,
            engine,
            session: None,
            state: HandshakeState::NotStarted,
            hostname: String::new(),
            error: false,
        }
    }

    /// Negotiate TLS with `hostname`, verifying its certificate.
    ///
    /// A pipe gets exactly one attempt; a failed pipe must be discarded.
    pub fn handshake(&mut self, hostname: &str, timeout: Option<Duration>) -> Result<(), TlsError> {
        if self.state != HandshakeState::NotStarted {
            return Err(TlsError::AlreadyAttempted);
        }

        let start = Instant::now();
        self.hostname = hostname.to_string();

        match self.negotiate(hostname, timeout) {
            Ok(session) => {
                self.session = Some(session);
                self.state = self.state.on(HandshakeEvent::Verified);
                metrics::record_handshake("established", start);
                tracing::debug!(
                    hostname,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "TLS handshake complete"
                );
                Ok(())
            }
            Err(err) => {
                self.state = self.state.on(HandshakeEvent::Rejected(FailureKind::from(&err)));
                metrics::record_handshake(err.kind(), start);
                Err(err)
            }
        }
    }

    fn negotiate(&mut self, hostname: &str, timeout: Option<Duration>) -> Result<E::Session, TlsError> {
        let transport = self.transport;

        let mut session = self.engine.connect(hostname, transport.socket()).map_err(|err| {
            tracing::warn!(hostname, error = %err, "TLS setup failed");
            err
        })?;
        self.state = self.state.on(HandshakeEvent::Started);

        let deadline = Deadline::start(timeout);
        loop {
            let want = match session.handshake_step() {
                Step::Done => break,
                Step::Pending(want) => want,
                Step::Fatal(fault) => {
                    tracing::warn!(hostname, reason = %fault, "TLS handshake failed");
                    return Err(handshake_error(hostname, fault));
                }
            };
            self.state = self.state.on(HandshakeEvent::StepPending);

            let ready = wait_for(transport, want, deadline.remaining());
            let event = if !ready && deadline.timeout().is_none() {
                tracing::warn!(hostname, "Transport failed while waiting for TLS handshake");
                return Err(TlsError::HandshakeFailed {
                    hostname: hostname.to_string(),
                    reason: "transport failed while waiting for readiness".into(),
                });
            } else if !ready {
                HandshakeEvent::NotReady
            } else if deadline.expired() {
                HandshakeEvent::DeadlineExpired
            } else {
                HandshakeEvent::Ready
            };

            self.state = self.state.on(event);
            if self.state == HandshakeState::Failed(FailureKind::Timeout) {
                tracing::warn!(
                    hostname,
                    timeout_ms = deadline.timeout().map(|t| t.as_millis() as u64),
                    "TLS connect timeout"
                );
                return Err(TlsError::Timeout {
                    hostname: hostname.to_string(),
                });
            }
        }

        if !session.has_peer_certificate() {
            tracing::warn!(hostname, "Getting server certificate failed");
            return Err(TlsError::NoCertificate {
                hostname: hostname.to_string(),
            });
        }

        match session.verify_result() {
            VerifyResult::Ok => Ok(session),
            VerifyResult::Rejected(reason) => Err(verification_error(hostname, reason)),
            VerifyResult::NotVerified => Err(verification_error(
                hostname,
                "certificate chain was never verified".into(),
            )),
        }
    }

    /// Read decrypted bytes into `buf`.
    ///
    /// Returns 0 when nothing arrived within `timeout`, before the handshake,
    /// and after a failure (which also sets the sticky error flag).
    pub fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> usize {
        let transport = self.transport;
        if self.error || buf.is_empty() {
            return 0;
        }
        let Some(session) = self.session.as_mut() else {
            return 0;
        };

        let outcome = loop {
            if session.pending_plaintext() == 0 && !transport.is_readable(timeout) {
                return 0;
            }
            match session.read(buf) {
                IoOutcome::WouldBlock => continue,
                outcome => break outcome,
            }
        };

        match outcome {
            IoOutcome::Transferred(n) => {
                transport.do_throttle(n, Direction::Incoming, Layer::Tls);
                n
            }
            IoOutcome::Failed(fault) => {
                self.fail("read", &fault);
                0
            }
            IoOutcome::WouldBlock => 0,
        }
    }

    /// Read up to [`READ_CHUNK_SIZE`] bytes. `None` if nothing was read.
    pub fn read_chunk(&mut self, timeout: Option<Duration>) -> Option<Vec<u8>> {
        let mut staging = [0u8; READ_CHUNK_SIZE];
        let n = self.read(&mut staging, timeout);
        (n > 0).then(|| staging[..n].to_vec())
    }

    /// Write all of `buf`.
    ///
    /// `timeout` bounds only the first writability wait. Once the engine has
    /// accepted part of the buffer the rest is written without a deadline. If
    /// the engine accepts nothing on the first attempt the call fails without
    /// setting the error flag and the caller may retry.
    pub fn write(&mut self, buf: &[u8], timeout: Option<Duration>, flush: bool) -> bool {
        if buf.is_empty() {
            return true;
        }

        let transport = self.transport;
        if self.error {
            return false;
        }
        let Some(session) = self.session.as_mut() else {
            return false;
        };

        match push_all(session, transport, buf, timeout) {
            Ok(()) => {}
            Err(WriteFailure::NotWritable) | Err(WriteFailure::Retry) => return false,
            Err(WriteFailure::Fault(fault)) => {
                self.fail("write", &fault);
                return false;
            }
        }

        if flush {
            transport.flush(timeout)
        } else {
            true
        }
    }

    pub fn write_str(&mut self, data: &str, timeout: Option<Duration>, flush: bool) -> bool {
        self.write(data.as_bytes(), timeout, flush)
    }

    /// Decrypted data waiting in the engine counts as readable even when the
    /// transport has nothing new.
    pub fn is_readable(&self, timeout: Option<Duration>) -> bool {
        let pending = self
            .session
            .as_ref()
            .is_some_and(|session| session.pending_plaintext() > 0);
        pending || self.transport.is_readable(timeout)
    }

    pub fn is_writable(&self, timeout: Option<Duration>) -> bool {
        self.transport.is_writable(timeout)
    }

    pub fn has_error(&self) -> bool {
        self.error || self.transport.has_error()
    }

    pub fn flush(&self, timeout: Option<Duration>) -> bool {
        self.transport.flush(timeout)
    }

    pub fn shutdown(&self) {
        self.transport.shutdown();
    }

    pub fn add_throttler(&self, throttler: Arc<dyn Throttler>) {
        self.transport.add_throttler(throttler);
    }

    pub fn add_incoming_throttler(&self, throttler: Arc<dyn Throttler>) {
        self.transport.add_incoming_throttler(throttler);
    }

    pub fn add_outgoing_throttler(&self, throttler: Arc<dyn Throttler>) {
        self.transport.add_outgoing_throttler(throttler);
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.transport.transferred_bytes()
    }

    pub fn reset_transferred_bytes(&self) {
        self.transport.reset_transferred_bytes();
    }

    pub fn pending_elements(&self) -> usize {
        self.transport.pending_elements()
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == HandshakeState::Established
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn transport(&self) -> &'a P {
        self.transport
    }

    fn fail(&mut self, operation: &'static str, fault: &EngineFault) {
        if !self.error {
            metrics::record_io_error(operation);
        }
        self.error = true;
        tracing::warn!(
            hostname = %self.hostname,
            operation,
            reason = %fault,
            "TLS pipe I/O failed"
        );
    }
}

impl<'a, P, E> fmt::Debug for TlsPipe<'a, P, E>
where
    P: StreamPipe,
    E: TlsEngine<'a, P::Socket>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsPipe")
            .field("hostname", &self.hostname)
            .field("state", &self.state)
            .field("error", &self.error)
            .finish()
    }
}

fn wait_for<P: StreamPipe>(transport: &P, want: Want, timeout: Option<Duration>) -> bool {
    match want {
        Want::Read => transport.is_readable(timeout),
        Want::Write => transport.is_writable(timeout),
        Want::Either => transport.is_read_or_writable(timeout),
    }
}

/// Hand `buf` to the engine and push the resulting records to the socket.
fn push_all<S: TlsSession, P: StreamPipe>(
    session: &mut S,
    transport: &P,
    buf: &[u8],
    timeout: Option<Duration>,
) -> Result<(), WriteFailure> {
    if !transport.is_writable(timeout) {
        return Err(WriteFailure::NotWritable);
    }

    let mut written = 0;
    while written < buf.len() {
        match session.write(&buf[written..]) {
            IoOutcome::Transferred(n) => {
                transport.do_throttle(n, Direction::Outgoing, Layer::Tls);
                written += n;
            }
            IoOutcome::WouldBlock if written == 0 => return Err(WriteFailure::Retry),
            IoOutcome::WouldBlock => {}
            IoOutcome::Failed(fault) => return Err(WriteFailure::Fault(fault)),
        }
        if written < buf.len() && !transport.is_writable(None) {
            return Err(WriteFailure::NotWritable);
        }
    }

    loop {
        match session.flush_records() {
            Step::Done => return Ok(()),
            Step::Pending(_) => {
                if !transport.is_writable(None) {
                    return Err(WriteFailure::NotWritable);
                }
            }
            Step::Fatal(fault) => return Err(WriteFailure::Fault(fault)),
        }
    }
}

fn handshake_error(hostname: &str, fault: EngineFault) -> TlsError {
    match fault {
        EngineFault::PeerCertificate(reason) => verification_error(hostname, reason),
        EngineFault::MissingCertificate => TlsError::NoCertificate {
            hostname: hostname.to_string(),
        },
        other => TlsError::HandshakeFailed {
            hostname: hostname.to_string(),
            reason: other.to_string(),
        },
    }
}

fn verification_error(hostname: &str, reason: String) -> TlsError {
    tracing::warn!(hostname, reason = %reason, "Verifying certificate of hostname failed");
    TlsError::CertificateVerificationFailed {
        hostname: hostname.to_string(),
        reason,
    }
}
