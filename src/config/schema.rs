//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files. Every
//! section has defaults, so an empty file is a valid configuration that
//! reproduces the built-in security policy.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::pipe::timeout_from_millis;

/// Cipher suites allowed by default: forward-secure AEAD suites only.
pub const DEFAULT_CIPHER_SUITES: &[&str] = &[
    "TLS13_AES_256_GCM_SHA384",
    "TLS13_AES_128_GCM_SHA256",
    "TLS13_CHACHA20_POLY1305_SHA256",
    "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
    "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
    "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
    "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
    "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
    "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
];

/// Longest chain of intermediates any configuration may accept.
pub const MAX_VERIFY_DEPTH: u32 = 5;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct PipeConfig {
    /// TLS engine policy.
    pub tls: TlsConfig,

    /// Timeouts in milliseconds; negative means no deadline.
    pub timeouts: TimeoutConfig,

    /// Bandwidth limits applied to the transport.
    pub throttle: ThrottleConfig,

    /// Logging settings.
    pub observability: ObservabilityConfig,
}

/// TLS engine policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Maximum number of intermediate certificates accepted in a chain.
    /// May only tighten [`MAX_VERIFY_DEPTH`].
    pub verify_depth: u32,

    /// Lowest protocol version offered: "1.2" or "1.3".
    pub min_protocol_version: String,

    /// Allow-list of cipher suite names.
    pub cipher_suites: Vec<String>,

    /// Plaintext bytes the engine may buffer before writes become partial.
    pub send_buffer_limit: usize,

    /// Trust anchors.
    pub trust: TrustConfig,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            verify_depth: MAX_VERIFY_DEPTH,
            min_protocol_version: "1.2".to_string(),
            cipher_suites: DEFAULT_CIPHER_SUITES.iter().map(|s| s.to_string()).collect(),
            send_buffer_limit: 64 * 1024,
            trust: TrustConfig::default(),
        }
    }
}

/// Where trust anchors come from.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Load the operating system's certificate store.
    pub system_roots: bool,

    /// Add the bundled Mozilla root program.
    pub webpki_roots: bool,

    /// Extra PEM files with CA certificates.
    pub ca_files: Vec<PathBuf>,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            system_roots: true,
            webpki_roots: false,
            ca_files: Vec::new(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// TCP connect timeout.
    pub connect_ms: i64,

    /// Deadline for the whole TLS handshake.
    pub handshake_ms: i64,

    /// Readiness wait for each read or write.
    pub io_ms: i64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 10_000,
            handshake_ms: 30_000,
            io_ms: 30_000,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Option<Duration> {
        timeout_from_millis(self.connect_ms)
    }

    pub fn handshake(&self) -> Option<Duration> {
        timeout_from_millis(self.handshake_ms)
    }

    pub fn io(&self) -> Option<Duration> {
        timeout_from_millis(self.io_ms)
    }
}

/// Bandwidth limits. Zero disables a limit.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ThrottleConfig {
    pub incoming_bytes_per_second: u64,
    pub outgoing_bytes_per_second: u64,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log filter (trace, debug, info, warn, error or a directive list).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}
