//! Download bandwidth limiting
//!
//! A token bucket in bytes: tokens refill at the configured rate up to one
//! second's worth of burst. Unlike a try-acquire bucket, a reservation may
//! drive the balance negative; the caller then sleeps off the debt, so large
//! writes are never starved.

use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Token bucket limiting downloaded bytes per second
#[derive(Debug)]
pub struct ReadRateLimiter {
    /// Sustained rate in bytes per second
    rate: u64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    /// Available bytes; negative while callers owe time
    tokens: f64,
    last_refill: Instant,
}

impl ReadRateLimiter {
    /// Create a limiter for `rate` bytes per second; `None` for zero
    pub fn new(rate: u64) -> Option<Self> {
        (rate > 0).then(|| Self {
            rate,
            state: Mutex::new(BucketState {
                tokens: rate as f64,
                last_refill: Instant::now(),
            }),
        })
    }

    /// Create a limiter from a MB/s setting
    pub fn from_mb_per_sec(mb: u32) -> Option<Self> {
        Self::new(u64::from(mb) * BYTES_PER_MB)
    }

    pub const fn rate(&self) -> u64 {
        self.rate
    }

    /// Take `bytes` from the bucket and return how long to wait before
    /// using them
    pub fn reserve(&self, bytes: u64) -> Duration {
        self.reserve_at(bytes, Instant::now())
    }

    fn reserve_at(&self, bytes: u64, now: Instant) -> Duration {
        let mut state = self.state.lock();
        let rate = self.rate as f64;

        let elapsed = now.saturating_duration_since(state.last_refill);
        state.tokens = elapsed.as_secs_f64().mul_add(rate, state.tokens).min(rate);
        state.last_refill = now;

        state.tokens -= bytes as f64;
        if state.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-state.tokens / rate)
        }
    }
}

/// Writer that throttles everything passing through it
pub struct RateLimitedWriter<'a, W: ?Sized> {
    inner: &'a mut W,
    limiter: Option<Arc<ReadRateLimiter>>,
}

impl<'a, W: Write + ?Sized> RateLimitedWriter<'a, W> {
    pub fn new(inner: &'a mut W, limiter: Option<Arc<ReadRateLimiter>>) -> Self {
        Self { inner, limiter }
    }
}

impl<W: Write + ?Sized> Write for RateLimitedWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(limiter) = &self.limiter {
            let wait = limiter.reserve(buf.len() as u64);
            if !wait.is_zero() {
                std::thread::sleep(wait);
            }
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_rate_disables_limiting() {
        assert!(ReadRateLimiter::new(0).is_none());
        assert!(ReadRateLimiter::from_mb_per_sec(0).is_none());
        assert_eq!(
            ReadRateLimiter::from_mb_per_sec(50).unwrap().rate(),
            50 * 1024 * 1024
        );
    }

    #[test]
    fn test_burst_then_debt() {
        let limiter = ReadRateLimiter::new(1000).unwrap();
        let start = limiter.state.lock().last_refill;

        // one second of burst is free
        assert_eq!(limiter.reserve_at(1000, start), Duration::ZERO);
        // the next 500 bytes cost half a second
        let wait = limiter.reserve_at(500, start);
        assert!((wait.as_secs_f64() - 0.5).abs() < 1e-6);
        // after the debt is paid and another half second passes, 500 are free
        assert_eq!(
            limiter.reserve_at(500, start + Duration::from_secs(1)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_refill_caps_at_burst() {
        let limiter = ReadRateLimiter::new(100).unwrap();
        let start = limiter.state.lock().last_refill;

        let later = start + Duration::from_secs(60);
        assert_eq!(limiter.reserve_at(100, later), Duration::ZERO);
        assert!(limiter.reserve_at(1, later) > Duration::ZERO);
    }

    #[test]
    fn test_writer_passes_bytes_through() {
        let limiter = Arc::new(ReadRateLimiter::new(1 << 30).unwrap());
        let mut out = Vec::new();
        {
            let mut writer = RateLimitedWriter::new(&mut out, Some(limiter));
            writer.write_all(b"payload").unwrap();
            writer.flush().unwrap();
        }
        assert_eq!(out, b"payload");

        let mut out = Vec::new();
        RateLimitedWriter::new(&mut out, None).write_all(b"x").unwrap();
        assert_eq!(out, b"x");
    }
}
