//! TLS pipe errors.

use thiserror::Error;

/// Why a TLS pipe could not be established.
///
/// Every variant is terminal for the connection attempt. Only [`TlsError::Timeout`]
/// suggests that a fresh connection might succeed without any change.
#[derive(Debug, Error)]
pub enum TlsError {
    /// Engine context or trust store could not be built.
    #[error("TLS engine initialization failed: {0}")]
    EngineInitFailed(String),

    /// Cipher policy, SNI or verification settings were refused.
    #[error("TLS configuration rejected: {0}")]
    ConfigurationRejected(String),

    /// The peer or the protocol refused the negotiation.
    #[error("TLS handshake with {hostname} failed: {reason}")]
    HandshakeFailed { hostname: String, reason: String },

    #[error("TLS operation with {hostname} timed out")]
    Timeout { hostname: String },

    #[error("{hostname} presented no certificate")]
    NoCertificate { hostname: String },

    #[error("verifying certificate of hostname {hostname} failed: {reason}")]
    CertificateVerificationFailed { hostname: String, reason: String },

    /// Non-retryable failure at the record layer, for callers that need a
    /// `Result`. The pipe itself reports these through its return values and
    /// sticky error flag.
    #[error("TLS I/O error: {0}")]
    IoError(String),

    /// The pipe is already established or already failed.
    #[error("handshake already attempted on this pipe")]
    AlreadyAttempted,
}

impl TlsError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TlsError::EngineInitFailed(_) => "engine_init_failed",
            TlsError::ConfigurationRejected(_) => "configuration_rejected",
            TlsError::HandshakeFailed { .. } => "handshake_failed",
            TlsError::Timeout { .. } => "timeout",
            TlsError::NoCertificate { .. } => "no_certificate",
            TlsError::CertificateVerificationFailed { .. } => "certificate_verification_failed",
            TlsError::IoError(_) => "io_error",
            TlsError::AlreadyAttempted => "already_attempted",
        }
    }

    /// Whether the failure is a security rejection of the peer.
    pub fn is_certificate_failure(&self) -> bool {
        matches!(
            self,
            TlsError::NoCertificate { .. } | TlsError::CertificateVerificationFailed { .. }
        )
    }
}
