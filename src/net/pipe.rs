//! Transport pipe contract.
//!
//! A pipe is the raw, unencrypted byte stream the TLS layer sits on. The TLS
//! layer only ever borrows it: it waits on readiness, reports bytes to the
//! throttling accounting and hands the underlying socket to the engine, but it
//! never closes or frees the pipe.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use crate::net::throttle::Throttler;

/// Direction of a byte transfer, for throttling and accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Incoming => "incoming",
            Direction::Outgoing => "outgoing",
        }
    }
}

/// Layer that moved the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    /// Plain bytes written or read by the pipe itself.
    Raw,
    /// Plaintext moved through a TLS session layered on the pipe.
    Tls,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Raw => "raw",
            Layer::Tls => "tls",
        }
    }
}

/// The socket an engine binds to without taking ownership.
pub trait RawSocket {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn send(&self, buf: &[u8]) -> io::Result<usize>;

    fn flush_socket(&self) -> io::Result<()> {
        Ok(())
    }
}

impl RawSocket for TcpStream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&*self).read(buf)
    }

    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        (&*self).write(buf)
    }

    fn flush_socket(&self) -> io::Result<()> {
        (&*self).flush()
    }
}

/// `Read`/`Write` view over a borrowed [`RawSocket`].
pub struct SocketIo<'a, S: ?Sized>(pub &'a S);

impl<S: RawSocket + ?Sized> Read for SocketIo<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.recv(buf)
    }
}

impl<S: RawSocket + ?Sized> Write for SocketIo<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.send(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush_socket()
    }
}

/// Connection-oriented byte pipe with readiness polling and throttling.
///
/// Every timeout is an `Option<Duration>`: `None` waits indefinitely.
pub trait StreamPipe {
    type Socket: RawSocket + ?Sized;

    /// The underlying socket. The pipe stays responsible for closing it.
    fn socket(&self) -> &Self::Socket;

    fn is_readable(&self, timeout: Option<Duration>) -> bool;

    fn is_writable(&self, timeout: Option<Duration>) -> bool;

    fn is_read_or_writable(&self, timeout: Option<Duration>) -> bool;

    fn flush(&self, timeout: Option<Duration>) -> bool;

    fn shutdown(&self);

    fn has_error(&self) -> bool;

    /// Account `bytes` moved in `direction` and apply any attached throttlers.
    fn do_throttle(&self, bytes: usize, direction: Direction, layer: Layer);

    /// Attach a throttler applied to both directions.
    fn add_throttler(&self, throttler: Arc<dyn Throttler>);

    fn add_incoming_throttler(&self, throttler: Arc<dyn Throttler>);

    fn add_outgoing_throttler(&self, throttler: Arc<dyn Throttler>);

    fn transferred_bytes(&self) -> u64;

    fn reset_transferred_bytes(&self);

    /// Number of elements queued inside the pipe and not yet sent.
    fn pending_elements(&self) -> usize;
}

/// Convert a millisecond timeout to the pipe representation.
///
/// Negative values mean "no deadline".
pub fn timeout_from_millis(millis: i64) -> Option<Duration> {
    u64::try_from(millis).ok().map(Duration::from_millis)
}
