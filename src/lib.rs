//! Blocking TLS client pipes over caller-owned byte transports.

pub mod config;
pub mod net;
pub mod observability;
pub mod tls;

pub use config::schema::PipeConfig;
pub use net::TcpPipe;
pub use tls::{TlsError, TlsPipe};
