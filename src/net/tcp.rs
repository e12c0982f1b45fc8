//! TCP implementation of [`StreamPipe`].
//!
//! Readiness waits use one `mio::Poll` per pipe, created on the first wait.
//! Later waits re-register the descriptor with the interest they need, which
//! re-arms the edge-triggered registration so the current level state is
//! reported again. Registration borrows the descriptor, so the stream stays
//! owned by the pipe and is closed only when the pipe is dropped.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

use crate::net::pipe::{Direction, Layer, StreamPipe};
use crate::net::throttle::Throttler;
use crate::observability::metrics;

const SOCKET: Token = Token(0);

#[derive(Default)]
struct Throttlers {
    both: Vec<Arc<dyn Throttler>>,
    incoming: Vec<Arc<dyn Throttler>>,
    outgoing: Vec<Arc<dyn Throttler>>,
}

impl Throttlers {
    fn for_direction(&self, direction: Direction) -> Vec<Arc<dyn Throttler>> {
        let specific = match direction {
            Direction::Incoming => &self.incoming,
            Direction::Outgoing => &self.outgoing,
        };
        self.both.iter().chain(specific.iter()).cloned().collect()
    }
}

struct Poller {
    poll: Poll,
    events: Events,
    registered: bool,
}

impl Poller {
    fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(4),
            registered: false,
        })
    }
}

/// A byte pipe over a connected TCP stream.
///
/// Concurrent readiness waits on one pipe are serialized.
pub struct TcpPipe {
    stream: TcpStream,
    poller: Mutex<Option<Poller>>,
    error: AtomicBool,
    transferred: AtomicU64,
    throttlers: Mutex<Throttlers>,
}

impl TcpPipe {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            poller: Mutex::new(None),
            error: AtomicBool::new(false),
            transferred: AtomicU64::new(0),
            throttlers: Mutex::new(Throttlers::default()),
        }
    }

    /// Connect to `addr`, bounded by `timeout` when one is given.
    pub fn connect(addr: SocketAddr, timeout: Option<Duration>) -> io::Result<Self> {
        let stream = match timeout {
            Some(timeout) if !timeout.is_zero() => TcpStream::connect_timeout(&addr, timeout)?,
            _ => TcpStream::connect(addr)?,
        };
        stream.set_nodelay(true)?;

        tracing::debug!(peer = %addr, "TCP pipe connected");
        Ok(Self::new(stream))
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Read plain bytes from the socket, waiting up to `timeout` for data.
    ///
    /// Returns 0 when nothing arrived in time. End of stream and socket
    /// errors also return 0 and set the error flag.
    pub fn read(&self, buf: &mut [u8], timeout: Option<Duration>) -> usize {
        if buf.is_empty() || !self.is_readable(timeout) {
            return 0;
        }
        match (&self.stream).read(buf) {
            Ok(0) => {
                tracing::debug!("TCP peer closed the stream");
                self.error.store(true, Ordering::SeqCst);
                0
            }
            Ok(n) => {
                self.do_throttle(n, Direction::Incoming, Layer::Raw);
                n
            }
            Err(e) if is_retryable(&e) => 0,
            Err(e) => {
                tracing::warn!(error = %e, "TCP read failed");
                self.error.store(true, Ordering::SeqCst);
                0
            }
        }
    }

    /// Write all of `buf` as plain bytes.
    ///
    /// `timeout` bounds the first writability wait; once bytes have gone out
    /// the rest is written without a deadline.
    pub fn write(&self, buf: &[u8], timeout: Option<Duration>) -> bool {
        let mut written = 0;
        while written < buf.len() {
            let wait = if written == 0 { timeout } else { None };
            if !self.is_writable(wait) {
                return false;
            }
            match (&self.stream).write(&buf[written..]) {
                Ok(0) => {
                    self.error.store(true, Ordering::SeqCst);
                    return false;
                }
                Ok(n) => {
                    self.do_throttle(n, Direction::Outgoing, Layer::Raw);
                    written += n;
                }
                Err(e) if is_retryable(&e) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "TCP write failed");
                    self.error.store(true, Ordering::SeqCst);
                    return false;
                }
            }
        }
        true
    }

    fn wait(&self, interest: Interest, timeout: Option<Duration>) -> bool {
        match self.poll_ready(interest, timeout) {
            Ok(ready) => ready,
            Err(e) => {
                tracing::warn!(error = %e, "Readiness poll failed");
                self.error.store(true, Ordering::SeqCst);
                false
            }
        }
    }

    fn poll_ready(&self, interest: Interest, timeout: Option<Duration>) -> io::Result<bool> {
        let mut guard = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            *guard = Some(Poller::new()?);
        }
        let poller = guard
            .as_mut()
            .ok_or_else(|| io::Error::other("readiness poller unavailable"))?;

        let fd = self.stream.as_raw_fd();
        let mut source = SourceFd(&fd);
        if poller.registered {
            poller.poll.registry().reregister(&mut source, SOCKET, interest)?;
        } else {
            poller.poll.registry().register(&mut source, SOCKET, interest)?;
            poller.registered = true;
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            match poller.poll.poll(&mut poller.events, remaining) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        let mut ready = false;
        for event in poller.events.iter() {
            if event.is_error() {
                self.error.store(true, Ordering::SeqCst);
            }
            if interest.is_readable() && (event.is_readable() || event.is_read_closed()) {
                ready = true;
            }
            if interest.is_writable() && (event.is_writable() || event.is_write_closed()) {
                ready = true;
            }
        }
        Ok(ready)
    }

    fn lock_throttlers(&self) -> std::sync::MutexGuard<'_, Throttlers> {
        self.throttlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn is_retryable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

impl StreamPipe for TcpPipe {
    type Socket = TcpStream;

    fn socket(&self) -> &TcpStream {
        &self.stream
    }

    fn is_readable(&self, timeout: Option<Duration>) -> bool {
        self.wait(Interest::READABLE, timeout)
    }

    fn is_writable(&self, timeout: Option<Duration>) -> bool {
        self.wait(Interest::WRITABLE, timeout)
    }

    fn is_read_or_writable(&self, timeout: Option<Duration>) -> bool {
        self.wait(Interest::READABLE | Interest::WRITABLE, timeout)
    }

    fn flush(&self, timeout: Option<Duration>) -> bool {
        // Writes go straight to the kernel; there is no user-space queue.
        self.is_writable(timeout)
    }

    fn shutdown(&self) {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => tracing::debug!("TCP pipe shut down"),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
            Err(e) => {
                tracing::warn!(error = %e, "TCP shutdown failed");
                self.error.store(true, Ordering::SeqCst);
            }
        }
    }

    fn has_error(&self) -> bool {
        self.error.load(Ordering::SeqCst)
    }

    fn do_throttle(&self, bytes: usize, direction: Direction, layer: Layer) {
        self.transferred.fetch_add(bytes as u64, Ordering::SeqCst);
        metrics::record_bytes(direction, layer, bytes);

        // Throttlers may sleep; never hold the lock while they do.
        let throttlers = self.lock_throttlers().for_direction(direction);
        for throttler in throttlers {
            throttler.add_bytes(bytes, true);
        }
    }

    fn add_throttler(&self, throttler: Arc<dyn Throttler>) {
        self.lock_throttlers().both.push(throttler);
    }

    fn add_incoming_throttler(&self, throttler: Arc<dyn Throttler>) {
        self.lock_throttlers().incoming.push(throttler);
    }

    fn add_outgoing_throttler(&self, throttler: Arc<dyn Throttler>) {
        self.lock_throttlers().outgoing.push(throttler);
    }

    fn transferred_bytes(&self) -> u64 {
        self.transferred.load(Ordering::SeqCst)
    }

    fn reset_transferred_bytes(&self) {
        self.transferred.store(0, Ordering::SeqCst);
    }

    fn pending_elements(&self) -> usize {
        0
    }
}
