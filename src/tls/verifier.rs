//! Peer certificate verification with a recorded verdict.
//!
//! rustls verifies the chain during the handshake and aborts it on failure.
//! The pipe additionally asks for the verdict once the handshake completes, so
//! the verifier keeps the last result where the session can read it back.

use std::sync::{Arc, Mutex, PoisonError};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, Error, SignatureScheme};

use crate::tls::engine::VerifyResult;

/// Shared slot holding the verdict of the last chain verification.
#[derive(Debug, Clone)]
pub(crate) struct Verdict(Arc<Mutex<VerifyResult>>);

impl Verdict {
    pub(crate) fn new() -> Self {
        Self(Arc::new(Mutex::new(VerifyResult::NotVerified)))
    }

    pub(crate) fn get(&self) -> VerifyResult {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set(&self, result: VerifyResult) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = result;
    }
}

/// WebPKI verification pinned to one hostname and bounded in chain depth.
///
/// Hostname matching is WebPKI's: wildcards only ever cover one whole leftmost
/// label, so partial wildcards such as `f*.example.com` never match.
#[derive(Debug)]
pub(crate) struct PinnedHostVerifier {
    inner: Arc<WebPkiServerVerifier>,
    expected: ServerName<'static>,
    max_depth: usize,
    verdict: Verdict,
}

impl PinnedHostVerifier {
    pub(crate) fn new(
        inner: Arc<WebPkiServerVerifier>,
        expected: ServerName<'static>,
        max_depth: usize,
        verdict: Verdict,
    ) -> Self {
        Self {
            inner,
            expected,
            max_depth,
            verdict,
        }
    }

    fn check(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        if *server_name != self.expected {
            return Err(Error::InvalidCertificate(CertificateError::NotValidForName));
        }
        if intermediates.len() > self.max_depth {
            return Err(Error::General(format!(
                "certificate chain has {} intermediates, verification depth is {}",
                intermediates.len(),
                self.max_depth
            )));
        }
        self.inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
    }
}

impl ServerCertVerifier for PinnedHostVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        let result = self.check(end_entity, intermediates, server_name, ocsp_response, now);
        match &result {
            Ok(_) => self.verdict.set(VerifyResult::Ok),
            Err(e) => self.verdict.set(VerifyResult::Rejected(e.to_string())),
        }
        result
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
