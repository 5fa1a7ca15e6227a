use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

/// Time source used for usage-window rollover, retry backoff, and TTL
/// sweeps. Injected everywhere so tests can drive window boundaries without
/// sleeping.
pub trait Clock: Send + Sync {
    /// Wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Monotonic instant for measuring elapsed time. Never goes backwards
    /// even when the wall clock is adjusted.
    fn monotonic(&self) -> Instant;

    fn unix_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }

    fn unix_secs(&self) -> i64 {
        self.now().timestamp()
    }
}

/// Production clock over the OS time sources.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic(&self) -> Instant {
        Instant::now()
    }
}

/// Hand-advanced clock for tests. The monotonic instant is anchored at
/// construction and offset by the same amount as the wall clock.
pub struct ManualClock {
    start_wall: DateTime<Utc>,
    start_instant: Instant,
    offset_ms: std::sync::atomic::AtomicI64,
}

impl ManualClock {
    pub fn at(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            start_wall: start,
            start_instant: Instant::now(),
            offset_ms: std::sync::atomic::AtomicI64::new(0),
        })
    }

    pub fn advance(&self, duration: chrono::Duration) {
        self.offset_ms.fetch_add(
            duration.num_milliseconds(),
            std::sync::atomic::Ordering::SeqCst,
        );
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let offset = self.offset_ms.load(std::sync::atomic::Ordering::SeqCst);
        self.start_wall + chrono::Duration::milliseconds(offset)
    }

    fn monotonic(&self) -> Instant {
        let offset = self.offset_ms.load(std::sync::atomic::Ordering::SeqCst);
        self.start_instant + std::time::Duration::from_millis(offset.max(0) as u64)
    }
}
