//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (verify depth, buffer sizes)
//! - Reject configurations that could never verify a peer
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: PipeConfig → Result<(), Vec<ValidationError>>
//! - Cipher suite names are checked by the engine, which owns the suite list

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::schema::{PipeConfig, MAX_VERIFY_DEPTH};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("tls.verify_depth must be between 1 and 5, got {0}")]
    VerifyDepth(u32),

    #[error("tls.min_protocol_version must be \"1.2\" or \"1.3\", got {0:?}")]
    ProtocolVersion(String),

    #[error("tls.cipher_suites must not be empty")]
    NoCipherSuites,

    #[error("tls.send_buffer_limit must be greater than zero")]
    SendBufferLimit,

    #[error("tls.trust enables no trust anchor source")]
    NoTrustAnchors,

    #[error("observability.log_level is not a valid filter: {0:?}")]
    LogLevel(String),
}

/// Check `config` for values the pipe cannot work with.
pub fn validate_config(config: &PipeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let tls = &config.tls;

    if tls.verify_depth == 0 || tls.verify_depth > MAX_VERIFY_DEPTH {
        errors.push(ValidationError::VerifyDepth(tls.verify_depth));
    }
    if !matches!(tls.min_protocol_version.as_str(), "1.2" | "1.3") {
        errors.push(ValidationError::ProtocolVersion(tls.min_protocol_version.clone()));
    }
    if tls.cipher_suites.is_empty() {
        errors.push(ValidationError::NoCipherSuites);
    }
    if tls.send_buffer_limit == 0 {
        errors.push(ValidationError::SendBufferLimit);
    }
    if !tls.trust.system_roots && !tls.trust.webpki_roots && tls.trust.ca_files.is_empty() {
        errors.push(ValidationError::NoTrustAnchors);
    }
    if EnvFilter::try_new(&config.observability.log_level).is_err() {
        errors.push(ValidationError::LogLevel(config.observability.log_level.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
