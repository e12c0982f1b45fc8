//! Byte-rate throttling for pipes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::config::ThrottleConfig;
use crate::net::pipe::StreamPipe;

/// Something that limits how fast bytes may move through a pipe.
pub trait Throttler: Send + Sync {
    /// Debit `bytes`. When `wait` is set, block until the rate allows them.
    ///
    /// Returns the delay the transfer incurred (or would have incurred).
    fn add_bytes(&self, bytes: usize, wait: bool) -> Duration;
}

/// A token bucket holding bytes instead of requests.
struct ByteBucket {
    tokens: f64,
    last_update: Instant,
}

impl ByteBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_update: now,
        }
    }

    /// Take `bytes` out of the bucket. The balance may go negative; the
    /// returned delay is the time needed to pay the debt back.
    fn debit(&mut self, bytes: f64, capacity: f64, refill_rate: f64, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;
        self.tokens -= bytes;

        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / refill_rate)
        }
    }
}

/// Limits throughput to a fixed number of bytes per second, with a one-second
/// burst allowance. A rate of zero disables throttling.
pub struct BandwidthThrottler {
    bytes_per_second: AtomicU64,
    bucket: Mutex<ByteBucket>,
}

impl BandwidthThrottler {
    pub fn new(bytes_per_second: u64) -> Self {
        Self {
            bytes_per_second: AtomicU64::new(bytes_per_second),
            bucket: Mutex::new(ByteBucket::new(bytes_per_second as f64, Instant::now())),
        }
    }

    pub fn bytes_per_second(&self) -> u64 {
        self.bytes_per_second.load(Ordering::Relaxed)
    }

    /// Change the rate. Takes effect on the next transfer.
    pub fn set_bytes_per_second(&self, bytes_per_second: u64) {
        self.bytes_per_second.store(bytes_per_second, Ordering::Relaxed);
    }

    fn delay_at(&self, bytes: usize, now: Instant) -> Duration {
        let rate = self.bytes_per_second();
        if rate == 0 {
            return Duration::ZERO;
        }

        let rate = rate as f64;
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.debit(bytes as f64, rate, rate, now)
    }
}

impl Throttler for BandwidthThrottler {
    fn add_bytes(&self, bytes: usize, wait: bool) -> Duration {
        let delay = self.delay_at(bytes, Instant::now());
        if wait && !delay.is_zero() {
            tracing::trace!(bytes, delay_ms = delay.as_millis() as u64, "Throttling transfer");
            std::thread::sleep(delay);
        }
        delay
    }
}

/// Install the configured per-direction limits on `pipe`.
pub fn apply_limits<P: StreamPipe + ?Sized>(pipe: &P, limits: &ThrottleConfig) {
    if limits.incoming_bytes_per_second > 0 {
        pipe.add_incoming_throttler(Arc::new(BandwidthThrottler::new(limits.incoming_bytes_per_second)));
    }
    if limits.outgoing_bytes_per_second > 0 {
        pipe.add_outgoing_throttler(Arc::new(BandwidthThrottler::new(limits.outgoing_bytes_per_second)));
    }
}
