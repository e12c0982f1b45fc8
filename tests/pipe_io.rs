//! Record I/O over an established session.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{connect, engine_trusting, read_exactly, spawn_peer, Identity, Peer};
use tls_pipe::net::{BandwidthThrottler, StreamPipe};
use tls_pipe::tls::TlsPipe;

const IO_TIMEOUT: Option<Duration> = Some(Duration::from_secs(5));

#[test]
fn test_echo_round_trip_and_accounting() {
    let identity = Identity::localhost();
    let (addr, server) = spawn_peer(&identity, Peer::Echo);
    let pipe = connect(addr);
    let mut tls = TlsPipe::new(&pipe, engine_trusting(&identity));
    tls.handshake("localhost", IO_TIMEOUT).unwrap();

    let message = b"hello over tls";
    assert!(tls.write(message, IO_TIMEOUT, true));
    let echoed = read_exactly(|buf| tls.read(buf, IO_TIMEOUT), message.len());

    assert_eq!(echoed, message);
    assert_eq!(tls.transferred_bytes(), 2 * message.len() as u64);
    assert_eq!(pipe.transferred_bytes(), 2 * message.len() as u64);

    tls.reset_transferred_bytes();
    assert_eq!(tls.transferred_bytes(), 0);
    assert_eq!(tls.pending_elements(), 0);
    assert!(!tls.has_error());

    tls.shutdown();
    assert_eq!(server.join().unwrap(), message.len());
}

#[test]
fn test_string_helpers() {
    let identity = Identity::localhost();
    let (addr, _server) = spawn_peer(&identity, Peer::Echo);
    let pipe = connect(addr);
    let mut tls = TlsPipe::new(&pipe, engine_trusting(&identity));
    tls.handshake("localhost", IO_TIMEOUT).unwrap();

    assert!(tls.write_str("ping", IO_TIMEOUT, false));
    let mut echoed = Vec::new();
    while echoed.len() < 4 {
        let chunk = tls.read_chunk(IO_TIMEOUT).expect("peer stopped echoing");
        echoed.extend_from_slice(&chunk);
    }
    assert_eq!(echoed, b"ping");
}

#[test]
fn test_large_write_completes_through_partial_writes() {
    let identity = Identity::localhost();
    let (addr, server) = spawn_peer(&identity, Peer::Sink);
    let pipe = connect(addr);
    let mut tls = TlsPipe::new(&pipe, engine_trusting(&identity));
    tls.handshake("localhost", IO_TIMEOUT).unwrap();

    // Several times the engine's plaintext buffer limit.
    let payload: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
    assert!(tls.write(&payload, IO_TIMEOUT, true));
    assert_eq!(tls.transferred_bytes(), payload.len() as u64);

    tls.shutdown();
    assert_eq!(server.join().unwrap(), payload.len());
}

#[test]
fn test_zero_length_write_succeeds() {
    let identity = Identity::localhost();
    let (addr, _server) = spawn_peer(&identity, Peer::Sink);
    let pipe = connect(addr);
    let mut tls = TlsPipe::new(&pipe, engine_trusting(&identity));
    tls.handshake("localhost", IO_TIMEOUT).unwrap();

    assert!(tls.write(&[], IO_TIMEOUT, true));
    assert_eq!(tls.transferred_bytes(), 0);
}

#[test]
fn test_read_without_data_times_out_cleanly() {
    let identity = Identity::localhost();
    let (addr, _server) = spawn_peer(&identity, Peer::Echo);
    let pipe = connect(addr);
    let mut tls = TlsPipe::new(&pipe, engine_trusting(&identity));
    tls.handshake("localhost", IO_TIMEOUT).unwrap();

    let start = Instant::now();
    let mut buf = [0u8; 64];
    assert_eq!(tls.read(&mut buf, Some(Duration::from_millis(100))), 0);

    assert!(start.elapsed() < Duration::from_secs(3));
    assert!(!tls.has_error());
    assert!(!tls.is_readable(Some(Duration::ZERO)));
}

#[test]
fn test_peer_close_sets_sticky_error() {
    let identity = Identity::localhost();
    let (addr, server) = spawn_peer(&identity, Peer::CloseAfterHandshake);
    let pipe = connect(addr);
    let mut tls = TlsPipe::new(&pipe, engine_trusting(&identity));
    tls.handshake("localhost", IO_TIMEOUT).unwrap();
    server.join().unwrap();

    let mut buf = [0u8; 64];
    assert_eq!(tls.read(&mut buf, IO_TIMEOUT), 0);
    assert!(tls.has_error());
    assert!(tls.has_error());
    assert!(!tls.write(b"late", IO_TIMEOUT, false));
}

#[test]
fn test_outgoing_throttle_slows_writes() {
    let identity = Identity::localhost();
    let (addr, server) = spawn_peer(&identity, Peer::Sink);
    let pipe = connect(addr);
    let mut tls = TlsPipe::new(&pipe, engine_trusting(&identity));
    tls.handshake("localhost", IO_TIMEOUT).unwrap();

    // 40 KiB at 64 KiB/s with a 64 KiB burst passes at once; the next 64 KiB
    // must wait for the bucket to refill.
    tls.add_outgoing_throttler(Arc::new(BandwidthThrottler::new(64 * 1024)));
    let payload = vec![7u8; 40 * 1024];
    assert!(tls.write(&payload, IO_TIMEOUT, false));

    let start = Instant::now();
    let payload = vec![7u8; 64 * 1024];
    assert!(tls.write(&payload, IO_TIMEOUT, true));
    assert!(start.elapsed() >= Duration::from_millis(300), "{:?}", start.elapsed());

    tls.shutdown();
    assert_eq!(server.join().unwrap(), 104 * 1024);
}

#[test]
fn test_read_without_deadline_returns_echo() {
    let identity = Identity::localhost();
    let (addr, server) = spawn_peer(&identity, Peer::Echo);
    let pipe = connect(addr);
    let mut tls = TlsPipe::new(&pipe, engine_trusting(&identity));
    tls.handshake("localhost", None).unwrap();

    assert!(tls.write(b"no deadline", None, true));
    let echoed = read_exactly(|buf| tls.read(buf, None), 11);

    assert_eq!(echoed, b"no deadline");
    assert!(!tls.has_error());

    tls.shutdown();
    assert_eq!(server.join().unwrap(), 11);
}
