//! Handshake outcomes against a local rustls server.

mod common;

use std::time::{Duration, Instant};

use common::{connect, engine_trusting, spawn_peer, Identity, Peer};
use tls_pipe::net::StreamPipe;
use tls_pipe::tls::{FailureKind, HandshakeState, TlsError, TlsPipe};

const HANDSHAKE_TIMEOUT: Option<Duration> = Some(Duration::from_secs(5));

#[test]
fn test_handshake_with_trusted_peer() {
    let identity = Identity::localhost();
    let (addr, server) = spawn_peer(&identity, Peer::Echo);
    let pipe = connect(addr);

    let mut tls = TlsPipe::new(&pipe, engine_trusting(&identity));
    tls.handshake("localhost", HANDSHAKE_TIMEOUT).unwrap();

    assert!(tls.is_established());
    assert_eq!(tls.state(), HandshakeState::Established);
    assert!(!tls.has_error());

    drop(tls);
    // The transport outlives the TLS layer and is closed by its owner.
    assert!(!pipe.has_error());
    pipe.shutdown();
    server.join().unwrap();
}

#[test]
fn test_hostname_mismatch_is_rejected() {
    let identity = Identity::for_names(&["other.example"]);
    let (addr, _server) = spawn_peer(&identity, Peer::Echo);
    let pipe = connect(addr);

    let mut tls = TlsPipe::new(&pipe, engine_trusting(&identity));
    let err = tls.handshake("localhost", HANDSHAKE_TIMEOUT).unwrap_err();

    match &err {
        TlsError::CertificateVerificationFailed { hostname, .. } => assert_eq!(hostname, "localhost"),
        other => panic!("expected verification failure, got {:?}", other),
    }
    assert_eq!(
        tls.state(),
        HandshakeState::Failed(FailureKind::CertificateRejected)
    );
    assert!(!tls.write(b"secret", HANDSHAKE_TIMEOUT, true));
}

#[test]
fn test_untrusted_anchor_is_rejected() {
    let server_identity = Identity::localhost();
    let stranger = Identity::localhost();
    let (addr, _server) = spawn_peer(&server_identity, Peer::Echo);
    let pipe = connect(addr);

    let mut tls = TlsPipe::new(&pipe, engine_trusting(&stranger));
    let err = tls.handshake("localhost", HANDSHAKE_TIMEOUT).unwrap_err();

    assert!(err.is_certificate_failure(), "{:?}", err);
    assert!(!tls.is_established());
}

#[test]
fn test_silent_peer_times_out() {
    let identity = Identity::localhost();
    let (addr, _server) = spawn_peer(&identity, Peer::Silent);
    let pipe = connect(addr);
    let timeout = Duration::from_millis(300);

    let mut tls = TlsPipe::new(&pipe, engine_trusting(&identity));
    let start = Instant::now();
    let err = tls.handshake("localhost", Some(timeout)).unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, TlsError::Timeout { .. }), "{:?}", err);
    assert!(elapsed >= Duration::from_millis(250), "returned after {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(3), "returned after {:?}", elapsed);
    assert_eq!(tls.state(), HandshakeState::Failed(FailureKind::Timeout));
}

#[test]
fn test_peer_hangup_fails_handshake() {
    let identity = Identity::localhost();
    let (addr, server) = spawn_peer(&identity, Peer::Hangup);
    let pipe = connect(addr);
    server.join().unwrap();

    let mut tls = TlsPipe::new(&pipe, engine_trusting(&identity));
    let err = tls.handshake("localhost", HANDSHAKE_TIMEOUT).unwrap_err();

    assert!(matches!(err, TlsError::HandshakeFailed { .. }), "{:?}", err);
    assert_eq!(tls.state(), HandshakeState::Failed(FailureKind::Negotiation));
}

#[test]
fn test_invalid_hostname_is_a_configuration_error() {
    let identity = Identity::localhost();
    let (addr, _server) = spawn_peer(&identity, Peer::Echo);
    let pipe = connect(addr);

    let mut tls = TlsPipe::new(&pipe, engine_trusting(&identity));
    let err = tls.handshake("not a host name", HANDSHAKE_TIMEOUT).unwrap_err();

    assert!(matches!(err, TlsError::ConfigurationRejected(_)), "{:?}", err);
    assert_eq!(tls.state(), HandshakeState::Failed(FailureKind::Configuration));
}

#[test]
fn test_handshake_is_single_shot() {
    let identity = Identity::localhost();
    let stranger = Identity::localhost();
    let (addr, _server) = spawn_peer(&identity, Peer::Echo);
    let pipe = connect(addr);

    let mut tls = TlsPipe::new(&pipe, engine_trusting(&stranger));
    assert!(tls.handshake("localhost", HANDSHAKE_TIMEOUT).is_err());
    let retry = tls.handshake("localhost", HANDSHAKE_TIMEOUT).unwrap_err();
    assert!(matches!(retry, TlsError::AlreadyAttempted));
}
