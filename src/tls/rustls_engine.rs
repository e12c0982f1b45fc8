//! rustls behind the [`TlsEngine`] capability.
//!
//! # Policy
//! - TLS 1.2 and 1.3 only; older protocol versions and compression do not
//!   exist in rustls
//! - Cipher suites come from an explicit allow-list of suite names
//! - Peer verification is mandatory: WebPKI chain validation, hostname pinned
//!   to the requested name, bounded chain depth
//! - Session resumption is disabled; every pipe negotiates from scratch
//!
//! The crypto provider is passed explicitly, so no process-wide provider has
//! to be installed before the first handshake.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use std::sync::Arc;

use rustls::client::{Resumption, WebPkiServerVerifier};
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, SupportedCipherSuite, SupportedProtocolVersion};

use crate::config::schema::MAX_VERIFY_DEPTH;
use crate::config::TlsConfig;
use crate::net::pipe::{RawSocket, SocketIo};
use crate::tls::engine::{EngineFault, IoOutcome, Step, TlsEngine, TlsSession, VerifyResult, Want};
use crate::tls::error::TlsError;
use crate::tls::verifier::{PinnedHostVerifier, Verdict};

/// Name of a cipher suite as written in configuration files.
pub fn suite_name(suite: &SupportedCipherSuite) -> String {
    format!("{:?}", suite.suite())
}

/// Builds rustls sessions according to a [`TlsConfig`].
#[derive(Debug, Clone)]
pub struct RustlsEngine {
    config: TlsConfig,
    roots: Option<Arc<RootCertStore>>,
}

impl RustlsEngine {
    pub fn new(config: TlsConfig) -> Self {
        Self {
            config,
            roots: None,
        }
    }

    /// Use `roots` as the only trust anchors instead of the configured sources.
    pub fn with_roots(mut self, roots: RootCertStore) -> Self {
        self.roots = Some(Arc::new(roots));
        self
    }

    pub fn config(&self) -> &TlsConfig {
        &self.config
    }

    fn trust_anchors(&self) -> Result<Arc<RootCertStore>, TlsError> {
        if let Some(roots) = &self.roots {
            if roots.is_empty() {
                return Err(TlsError::EngineInitFailed("trust store is empty".into()));
            }
            return Ok(Arc::clone(roots));
        }

        let trust = &self.config.trust;
        let mut store = RootCertStore::empty();

        if trust.system_roots {
            let result = rustls_native_certs::load_native_certs();
            for error in &result.errors {
                tracing::warn!(error = %error, "Error loading some system root certificates");
            }
            let (added, ignored) = store.add_parsable_certificates(result.certs);
            tracing::debug!(added, ignored, "Loaded system root certificates");
        }

        if trust.webpki_roots {
            store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }

        for path in &trust.ca_files {
            load_ca_file(path, &mut store)?;
        }

        if store.is_empty() {
            tracing::error!("No trust anchors could be loaded");
            return Err(TlsError::EngineInitFailed(
                "no trust anchors available, peer verification impossible".into(),
            ));
        }
        Ok(Arc::new(store))
    }

    fn crypto_provider(&self) -> Result<Arc<CryptoProvider>, TlsError> {
        let base = ring::default_provider();
        let mut suites = Vec::with_capacity(self.config.cipher_suites.len());

        for name in &self.config.cipher_suites {
            let suite = base
                .cipher_suites
                .iter()
                .find(|suite| suite_name(suite) == *name)
                .ok_or_else(|| {
                    TlsError::ConfigurationRejected(format!("unknown cipher suite {}", name))
                })?;
            suites.push(*suite);
        }

        if suites.is_empty() {
            return Err(TlsError::ConfigurationRejected("cipher suite list is empty".into()));
        }

        Ok(Arc::new(CryptoProvider {
            cipher_suites: suites,
            ..base
        }))
    }

    /// Configured depth, never looser than [`MAX_VERIFY_DEPTH`] even when the
    /// config skipped validation.
    fn verify_depth(&self) -> usize {
        self.config.verify_depth.min(MAX_VERIFY_DEPTH) as usize
    }

    fn protocol_versions(&self) -> Result<Vec<&'static SupportedProtocolVersion>, TlsError> {
        match self.config.min_protocol_version.as_str() {
            "1.2" => Ok(vec![&rustls::version::TLS13, &rustls::version::TLS12]),
            "1.3" => Ok(vec![&rustls::version::TLS13]),
            other => Err(TlsError::ConfigurationRejected(format!(
                "unsupported minimum protocol version {}",
                other
            ))),
        }
    }

    fn client_config(
        &self,
        server_name: &ServerName<'static>,
        verdict: Verdict,
    ) -> Result<ClientConfig, TlsError> {
        let roots = self.trust_anchors()?;
        let provider = self.crypto_provider()?;
        let versions = self.protocol_versions()?;

        let webpki = WebPkiServerVerifier::builder_with_provider(roots, Arc::clone(&provider))
            .build()
            .map_err(|e| TlsError::EngineInitFailed(e.to_string()))?;
        let verifier = PinnedHostVerifier::new(
            webpki,
            server_name.clone(),
            self.verify_depth(),
            verdict,
        );

        let mut config = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&versions)
            .map_err(|e| TlsError::ConfigurationRejected(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth();
        config.enable_sni = true;
        config.resumption = Resumption::disabled();
        Ok(config)
    }
}

fn load_ca_file(path: &Path, store: &mut RootCertStore) -> Result<(), TlsError> {
    let file = File::open(path).map_err(|e| {
        TlsError::EngineInitFailed(format!("cannot open CA file {}: {}", path.display(), e))
    })?;
    let mut reader = BufReader::new(file);

    let mut added = 0usize;
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| {
            TlsError::EngineInitFailed(format!("cannot parse CA file {}: {}", path.display(), e))
        })?;
        store.add(cert).map_err(|e| {
            TlsError::EngineInitFailed(format!("bad CA certificate in {}: {}", path.display(), e))
        })?;
        added += 1;
    }

    tracing::debug!(path = %path.display(), added, "Loaded CA file");
    Ok(())
}

impl<'a, S: RawSocket + ?Sized + 'a> TlsEngine<'a, S> for RustlsEngine {
    type Session = RustlsSession<'a, S>;

    fn connect(&self, hostname: &str, socket: &'a S) -> Result<Self::Session, TlsError> {
        let server_name = ServerName::try_from(hostname.to_string()).map_err(|e| {
            TlsError::ConfigurationRejected(format!("invalid server name {:?}: {}", hostname, e))
        })?;

        let verdict = Verdict::new();
        let config = self.client_config(&server_name, verdict.clone())?;

        let mut conn = ClientConnection::new(Arc::new(config), server_name)
            .map_err(|e| TlsError::EngineInitFailed(e.to_string()))?;
        conn.set_buffer_limit(Some(self.config.send_buffer_limit));

        socket
            .set_nonblocking(true)
            .map_err(|e| TlsError::EngineInitFailed(format!("cannot make socket non-blocking: {}", e)))?;

        tracing::debug!(
            hostname,
            verify_depth = self.config.verify_depth,
            min_protocol_version = %self.config.min_protocol_version,
            "TLS session configured"
        );

        Ok(RustlsSession {
            conn,
            socket,
            verdict,
            plaintext: 0,
        })
    }
}

/// A rustls client connection bound to a borrowed socket.
pub struct RustlsSession<'a, S: ?Sized> {
    conn: ClientConnection,
    socket: &'a S,
    verdict: Verdict,
    plaintext: usize,
}

impl<S: RawSocket + ?Sized> RustlsSession<'_, S> {
    /// Write queued records to the socket. `Ok(true)` once nothing is queued.
    fn send_records(&mut self) -> Result<bool, EngineFault> {
        while self.conn.wants_write() {
            match self.conn.write_tls(&mut SocketIo(self.socket)) {
                Ok(0) => return Err(EngineFault::Closed),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(EngineFault::Io(e.to_string())),
            }
        }
        Ok(true)
    }

    /// Read and process records from the socket. `Ok(false)` if none arrived.
    fn receive_records(&mut self) -> Result<bool, EngineFault> {
        match self.conn.read_tls(&mut SocketIo(self.socket)) {
            Ok(0) => Err(EngineFault::Closed),
            Ok(_) => match self.conn.process_new_packets() {
                Ok(state) => {
                    self.plaintext = state.plaintext_bytes_to_read();
                    Ok(true)
                }
                Err(e) => {
                    // Best effort: get the alert rustls queued to the peer.
                    let _ = self.send_records();
                    Err(self.fault_from(e))
                }
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(false),
            Err(e) => Err(EngineFault::Io(e.to_string())),
        }
    }

    fn fault_from(&self, err: rustls::Error) -> EngineFault {
        if let VerifyResult::Rejected(reason) = self.verdict.get() {
            return EngineFault::PeerCertificate(reason);
        }
        match err {
            rustls::Error::InvalidCertificate(_) => EngineFault::PeerCertificate(err.to_string()),
            rustls::Error::NoCertificatesPresented => EngineFault::MissingCertificate,
            other => EngineFault::Protocol(other.to_string()),
        }
    }

    fn read_plaintext(&mut self, buf: &mut [u8]) -> Option<IoOutcome> {
        match self.conn.reader().read(buf) {
            Ok(0) => Some(IoOutcome::Failed(EngineFault::Closed)),
            Ok(n) => {
                self.plaintext = self.plaintext.saturating_sub(n);
                Some(IoOutcome::Transferred(n))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Some(IoOutcome::Failed(EngineFault::Closed))
            }
            Err(e) => Some(IoOutcome::Failed(EngineFault::Io(e.to_string()))),
        }
    }
}

impl<S: RawSocket + ?Sized> TlsSession for RustlsSession<'_, S> {
    fn handshake_step(&mut self) -> Step {
        match self.send_records() {
            Ok(true) => {}
            Ok(false) => return Step::Pending(Want::Write),
            Err(fault) => return Step::Fatal(fault),
        }

        if self.conn.is_handshaking() && self.conn.wants_read() {
            match self.receive_records() {
                Ok(true) => {}
                Ok(false) => return Step::Pending(Want::Read),
                Err(fault) => return Step::Fatal(fault),
            }
        }

        match self.send_records() {
            Ok(true) => {}
            Ok(false) => return Step::Pending(Want::Write),
            Err(fault) => return Step::Fatal(fault),
        }

        if self.conn.is_handshaking() {
            Step::Pending(Want::Read)
        } else {
            Step::Done
        }
    }

    fn pending_plaintext(&self) -> usize {
        self.plaintext
    }

    fn read(&mut self, buf: &mut [u8]) -> IoOutcome {
        if buf.is_empty() {
            return IoOutcome::WouldBlock;
        }
        if let Some(outcome) = self.read_plaintext(buf) {
            return outcome;
        }

        match self.receive_records() {
            Ok(true) => {}
            Ok(false) => return IoOutcome::WouldBlock,
            Err(fault) => return IoOutcome::Failed(fault),
        }

        // Post-handshake messages such as key updates may need an answer.
        if let Err(fault) = self.send_records() {
            return IoOutcome::Failed(fault);
        }

        self.read_plaintext(buf).unwrap_or(IoOutcome::WouldBlock)
    }

    fn write(&mut self, buf: &[u8]) -> IoOutcome {
        if let Err(fault) = self.send_records() {
            return IoOutcome::Failed(fault);
        }

        let accepted = match self.conn.writer().write(buf) {
            Ok(n) => n,
            Err(e) => return IoOutcome::Failed(EngineFault::Io(e.to_string())),
        };

        if let Err(fault) = self.send_records() {
            return IoOutcome::Failed(fault);
        }

        if accepted == 0 {
            IoOutcome::WouldBlock
        } else {
            IoOutcome::Transferred(accepted)
        }
    }

    fn flush_records(&mut self) -> Step {
        match self.send_records() {
            Ok(true) => Step::Done,
            Ok(false) => Step::Pending(Want::Write),
            Err(fault) => Step::Fatal(fault),
        }
    }

    fn has_peer_certificate(&self) -> bool {
        self.conn
            .peer_certificates()
            .is_some_and(|certs| !certs.is_empty())
    }

    fn verify_result(&self) -> VerifyResult {
        self.verdict.get()
    }
}
