//! tls-pipe: open a verified TLS connection and shuttle bytes over it.
//!
//! ```text
//! tls-pipe example.com --port 443 --send $'HEAD / HTTP/1.0\r\n\r\n'
//! ```
//!
//! Connects a [`TcpPipe`], runs the TLS handshake against the host name,
//! optionally writes `--send`, then copies everything read to stdout until the
//! read timeout passes or the peer goes away.

use std::io::Write;
use std::net::ToSocketAddrs;
use std::path::PathBuf;

use clap::Parser;

use tls_pipe::config::{load_config, PipeConfig};
use tls_pipe::net::{apply_limits, timeout_from_millis, TcpPipe};
use tls_pipe::observability::logging;
use tls_pipe::tls::{RustlsEngine, TlsError, TlsPipe};

#[derive(Parser)]
#[command(name = "tls-pipe")]
#[command(about = "Open a verified TLS client connection over TCP", long_about = None)]
struct Cli {
    /// Host to connect to; also the name the certificate must match
    host: String,

    #[arg(short, long, default_value_t = 443)]
    port: u16,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Handshake timeout in milliseconds (negative waits forever)
    #[arg(long, allow_negative_numbers = true)]
    timeout_ms: Option<i64>,

    /// Text to write once the connection is established
    #[arg(short, long)]
    send: Option<String>,

    /// Read timeout in milliseconds (negative waits forever)
    #[arg(long, allow_negative_numbers = true)]
    read_ms: Option<i64>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => PipeConfig::default(),
    };

    logging::init(&config.observability.log_level);

    tracing::info!(
        host = %cli.host,
        port = cli.port,
        verify_depth = config.tls.verify_depth,
        min_protocol_version = %config.tls.min_protocol_version,
        "Configuration loaded"
    );

    let handshake_timeout = cli
        .timeout_ms
        .map(timeout_from_millis)
        .unwrap_or_else(|| config.timeouts.handshake());
    let read_timeout = cli
        .read_ms
        .map(timeout_from_millis)
        .unwrap_or_else(|| config.timeouts.io());

    let addr = (cli.host.as_str(), cli.port)
        .to_socket_addrs()?
        .next()
        .ok_or("host did not resolve to any address")?;

    let pipe = TcpPipe::connect(addr, config.timeouts.connect())?;
    apply_limits(&pipe, &config.throttle);
    tracing::info!(address = %addr, "TCP connection established");

    let mut tls = TlsPipe::new(&pipe, RustlsEngine::new(config.tls.clone()));
    tls.handshake(&cli.host, handshake_timeout)?;
    tracing::info!(host = %cli.host, "TLS session established");

    if let Some(text) = &cli.send {
        if !tls.write_str(text, config.timeouts.io(), true) {
            let reason = format!("failed to write {} bytes to {}", text.len(), cli.host);
            return Err(TlsError::IoError(reason).into());
        }
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    while let Some(chunk) = tls.read_chunk(read_timeout) {
        out.write_all(&chunk)?;
    }
    out.flush()?;

    tracing::info!(
        transferred_bytes = tls.transferred_bytes(),
        peer_error = tls.has_error(),
        "Connection finished"
    );

    tls.shutdown();
    Ok(())
}
