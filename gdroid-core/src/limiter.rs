//! Admission control for the frame pipeline.
//!
//! [`TokenBucket`] is the default gate: it starts full, refills lazily on
//! acquire attempts (no background timer) and never holds more than its
//! capacity. [`FixedWindowLimiter`] is a simpler counter that resets at
//! window boundaries. Both are safe to share across threads; the mutable
//! counters live behind a mutex.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Reference capacity for the capture pipeline.
pub const DEFAULT_CAPACITY: u64 = 30;

/// Reference refill rate (permits per second) for the capture pipeline.
pub const DEFAULT_REFILL_PER_SEC: u64 = 15;

/// An accept/reject gate applied to a unit of work.
///
/// A rejection is not an error; callers simply drop the unit.
pub trait Limiter: Send + Sync {
    /// Try to admit one unit of work.
    fn allow(&self) -> bool;
}

// ── TokenBucket ──────────────────────────────────────────────────

#[derive(Debug)]
struct BucketState {
    tokens: u64,
    last_refill: Instant,
}

/// Lazily refilled token bucket.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u64,
    refill_per_sec: u64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket with `capacity` tokens refilling at
    /// `refill_per_sec` tokens per second.
    pub fn new(capacity: u64, refill_per_sec: u64) -> Self {
        Self::with_start(capacity, refill_per_sec, Instant::now())
    }

    /// Create a full bucket whose refill clock starts at `start`
    /// (useful for testing).
    pub fn with_start(capacity: u64, refill_per_sec: u64, start: Instant) -> Self {
        Self {
            capacity,
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: start,
            }),
        }
    }

    /// Bucket capacity.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Refill rate in permits per second.
    pub fn refill_per_sec(&self) -> u64 {
        self.refill_per_sec
    }

    /// Tokens currently in the bucket (without refilling).
    pub fn available(&self) -> u64 {
        self.lock().tokens
    }

    /// Try to take `permits` tokens now.
    pub fn try_acquire(&self, permits: u64) -> bool {
        self.try_acquire_at(permits, Instant::now())
    }

    /// Try to take `permits` tokens at an explicit instant.
    ///
    /// On rejection nothing is consumed. A refill only moves the clock
    /// forward when at least one whole token was gained, so sub-token
    /// elapsed time keeps accumulating across calls.
    pub fn try_acquire_at(&self, permits: u64, now: Instant) -> bool {
        let mut state = self.lock();

        if state.tokens >= permits {
            state.tokens -= permits;
            return true;
        }

        let elapsed = now.saturating_duration_since(state.last_refill);
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let gained = elapsed_ms.saturating_mul(self.refill_per_sec) / 1000;
        if gained > 0 {
            state.tokens = state.tokens.saturating_add(gained).min(self.capacity);
            state.last_refill = now;
        }

        if state.tokens >= permits {
            state.tokens -= permits;
            true
        } else {
            false
        }
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for TokenBucket {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_REFILL_PER_SEC)
    }
}

impl Limiter for TokenBucket {
    fn allow(&self) -> bool {
        self.try_acquire(1)
    }
}

// ── FixedWindowLimiter ───────────────────────────────────────────

#[derive(Debug)]
struct WindowState {
    count: u64,
    window_start: Instant,
}

/// Allows at most `limit` acquisitions per `window`.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    limit: u64,
    window: Duration,
    state: Mutex<WindowState>,
}

impl FixedWindowLimiter {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self::with_start(limit, window, Instant::now())
    }

    pub fn with_start(limit: u64, window: Duration, start: Instant) -> Self {
        Self {
            limit,
            window,
            state: Mutex::new(WindowState {
                count: 0,
                window_start: start,
            }),
        }
    }

    /// Admission check at an explicit instant.
    pub fn allow_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if now.saturating_duration_since(state.window_start) >= self.window {
            state.window_start = now;
            state.count = 0;
        }
        if state.count >= self.limit {
            return false;
        }
        state.count += 1;
        true
    }
}

impl Limiter for FixedWindowLimiter {
    fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn full_bucket_admits_capacity_then_rejects() {
        let t0 = Instant::now();
        let bucket = TokenBucket::with_start(30, 15, t0);
        for i in 0..30 {
            assert!(bucket.try_acquire_at(1, t0), "acquire #{i} should succeed");
        }
        assert!(!bucket.try_acquire_at(1, t0));
        assert_eq!(bucket.available(), 0);
    }

    #[test]
    fn one_token_regenerates_after_67ms() {
        let t0 = Instant::now();
        let bucket = TokenBucket::with_start(30, 15, t0);
        for _ in 0..30 {
            assert!(bucket.try_acquire_at(1, t0));
        }
        assert!(!bucket.try_acquire_at(1, t0 + Duration::from_millis(60)));
        assert!(bucket.try_acquire_at(1, t0 + Duration::from_millis(67)));
        assert!(!bucket.try_acquire_at(1, t0 + Duration::from_millis(67)));
    }

    #[test]
    fn long_idle_never_exceeds_capacity() {
        let t0 = Instant::now();
        let bucket = TokenBucket::with_start(30, 15, t0);
        for _ in 0..30 {
            assert!(bucket.try_acquire_at(1, t0));
        }
        assert!(bucket.try_acquire_at(1, t0 + Duration::from_millis(2000)));
        assert!(bucket.available() <= 30);
        assert_eq!(bucket.available(), 29);

        let later = t0 + Duration::from_secs(3600);
        assert!(bucket.try_acquire_at(30, later));
        assert!(!bucket.try_acquire_at(1, later));
    }

    #[test]
    fn rejection_consumes_nothing() {
        let t0 = Instant::now();
        let bucket = TokenBucket::with_start(5, 1, t0);
        assert!(bucket.try_acquire_at(3, t0));
        assert!(!bucket.try_acquire_at(3, t0));
        assert_eq!(bucket.available(), 2);
        assert!(bucket.try_acquire_at(2, t0));
    }

    #[test]
    fn sub_token_elapsed_time_is_kept() {
        let t0 = Instant::now();
        let bucket = TokenBucket::with_start(1, 10, t0);
        assert!(bucket.try_acquire_at(1, t0));
        // 50 ms at 10/s is half a token; the clock must not advance.
        assert!(!bucket.try_acquire_at(1, t0 + Duration::from_millis(50)));
        assert!(bucket.try_acquire_at(1, t0 + Duration::from_millis(100)));
    }

    #[test]
    fn concurrent_acquires_never_overdraw() {
        let bucket = Arc::new(TokenBucket::new(100, 0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let bucket = Arc::clone(&bucket);
                std::thread::spawn(move || (0..50).filter(|_| bucket.allow()).count())
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
    }

    #[test]
    fn fixed_window_resets() {
        let t0 = Instant::now();
        let limiter = FixedWindowLimiter::with_start(2, Duration::from_secs(1), t0);
        assert!(limiter.allow_at(t0));
        assert!(limiter.allow_at(t0));
        assert!(!limiter.allow_at(t0 + Duration::from_millis(999)));
        assert!(limiter.allow_at(t0 + Duration::from_secs(1)));
    }
}
