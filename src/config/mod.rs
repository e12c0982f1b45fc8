//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → PipeConfig (validated, immutable)
//!     → RustlsEngine::new / TcpPipe throttlers / logging filter
//! ```
//!
//! # Design Decisions
//! - All fields have defaults; the defaults are the hardened policy
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{PipeConfig, ThrottleConfig, TimeoutConfig, TlsConfig, TrustConfig};
pub use validation::ValidationError;
