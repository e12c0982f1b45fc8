//! Shared utilities for integration testing.
//!
//! Each helper peer accepts exactly one connection on a loopback port and runs
//! on its own thread. The join handle yields the number of plaintext bytes the
//! peer received.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rustls::crypto::ring;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{RootCertStore, ServerConfig, ServerConnection, StreamOwned};

use tls_pipe::config::{TlsConfig, TrustConfig};
use tls_pipe::net::TcpPipe;
use tls_pipe::tls::RustlsEngine;

const PEER_IDLE_LIMIT: Duration = Duration::from_secs(10);

/// A self-signed server certificate and its key.
pub struct Identity {
    pub cert: CertificateDer<'static>,
    pub cert_pem: String,
    key_der: Vec<u8>,
}

impl Identity {
    pub fn for_names(names: &[&str]) -> Self {
        let names: Vec<String> = names.iter().map(|name| name.to_string()).collect();
        let generated = rcgen::generate_simple_self_signed(names).unwrap();
        Self {
            cert: generated.cert.der().clone(),
            cert_pem: generated.cert.pem(),
            key_der: generated.key_pair.serialize_der(),
        }
    }

    pub fn localhost() -> Self {
        Self::for_names(&["localhost"])
    }

    /// A trust store containing only this certificate.
    pub fn roots(&self) -> RootCertStore {
        let mut roots = RootCertStore::empty();
        roots.add(self.cert.clone()).unwrap();
        roots
    }

    fn server_config(&self) -> Arc<ServerConfig> {
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_der.clone()));
        let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![self.cert.clone()], key)
            .unwrap();
        Arc::new(config)
    }
}

/// How the helper peer behaves once a client connects.
#[derive(Debug, Clone, Copy)]
pub enum Peer {
    /// Complete the handshake and echo every byte back.
    Echo,
    /// Complete the handshake and swallow everything.
    Sink,
    /// Complete the handshake, send close_notify and hang up.
    CloseAfterHandshake,
    /// Accept TCP but never answer the ClientHello.
    Silent,
    /// Accept TCP and close it immediately.
    Hangup,
}

/// Start a peer on an ephemeral loopback port.
pub fn spawn_peer(identity: &Identity, peer: Peer) -> (SocketAddr, JoinHandle<usize>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let config = identity.server_config();

    let handle = thread::spawn(move || {
        let Ok((stream, _)) = listener.accept() else {
            return 0;
        };
        let _ = stream.set_read_timeout(Some(PEER_IDLE_LIMIT));

        match peer {
            Peer::Echo => serve(config, stream, true),
            Peer::Sink => serve(config, stream, false),
            Peer::CloseAfterHandshake => close_after_handshake(config, stream),
            Peer::Silent => drain(stream),
            Peer::Hangup => {
                drop(stream);
                0
            }
        }
    });

    (addr, handle)
}

fn serve(config: Arc<ServerConfig>, stream: TcpStream, echo: bool) -> usize {
    let conn = ServerConnection::new(config).unwrap();
    let mut tls = StreamOwned::new(conn, stream);
    let mut buf = [0u8; 16 * 1024];
    let mut received = 0;

    loop {
        match tls.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                received += n;
                if echo && (tls.write_all(&buf[..n]).is_err() || tls.flush().is_err()) {
                    break;
                }
            }
        }
    }
    received
}

fn close_after_handshake(config: Arc<ServerConfig>, mut stream: TcpStream) -> usize {
    let mut conn = ServerConnection::new(config).unwrap();
    while conn.is_handshaking() {
        if conn.complete_io(&mut stream).is_err() {
            return 0;
        }
    }
    conn.send_close_notify();
    let _ = conn.complete_io(&mut stream);
    0
}

fn drain(mut stream: TcpStream) -> usize {
    let mut buf = [0u8; 1024];
    while let Ok(n) = stream.read(&mut buf) {
        if n == 0 {
            break;
        }
    }
    0
}

/// TLS settings that never touch the system trust store.
pub fn offline_tls_config() -> TlsConfig {
    TlsConfig {
        trust: TrustConfig {
            system_roots: false,
            ..TrustConfig::default()
        },
        ..TlsConfig::default()
    }
}

/// An engine whose only trust anchor is `identity`.
pub fn engine_trusting(identity: &Identity) -> RustlsEngine {
    RustlsEngine::new(offline_tls_config()).with_roots(identity.roots())
}

pub fn connect(addr: SocketAddr) -> TcpPipe {
    TcpPipe::connect(addr, Some(Duration::from_secs(5))).unwrap()
}

/// Read from `read` until `want` bytes arrived or a read comes back empty.
pub fn read_exactly(mut read: impl FnMut(&mut [u8]) -> usize, want: usize) -> Vec<u8> {
    let mut collected = Vec::with_capacity(want);
    let mut buf = [0u8; 4096];
    while collected.len() < want {
        let n = read(&mut buf);
        if n == 0 {
            break;
        }
        collected.extend_from_slice(&buf[..n]);
    }
    collected
}
