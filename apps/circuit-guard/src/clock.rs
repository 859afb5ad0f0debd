//! Time sources for the circuit breaker.
//!
//! The breaker never schedules timers. Every time-based decision compares a
//! stored [`Timestamp`] against the clock's current reading, so tests can
//! drive the Open → HalfOpen timeout with a [`ManualClock`] instead of
//! sleeping.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// A point in time, captured on both the monotonic and the wall clock.
///
/// Elapsed-time decisions use the monotonic reading; the wall-clock reading is
/// only carried for reporting (metrics snapshots, transition events).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    monotonic: Instant,
    wall: DateTime<Utc>,
}

impl Timestamp {
    /// Create a timestamp from its two readings.
    #[must_use]
    pub const fn new(monotonic: Instant, wall: DateTime<Utc>) -> Self {
        Self { monotonic, wall }
    }

    /// Monotonic reading.
    #[must_use]
    pub const fn monotonic(&self) -> Instant {
        self.monotonic
    }

    /// Wall-clock reading.
    #[must_use]
    pub const fn wall(&self) -> DateTime<Utc> {
        self.wall
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later.
    #[must_use]
    pub fn saturating_since(&self, earlier: Self) -> Duration {
        self.monotonic.saturating_duration_since(earlier.monotonic)
    }
}

/// Source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time.
    fn now(&self) -> Timestamp;
}

/// Clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::new(Instant::now(), Utc::now())
    }
}

/// Clock that only moves when told to.
///
/// Starts at the moment it is created and advances by explicit calls to
/// [`ManualClock::advance`].
#[derive(Debug)]
pub struct ManualClock {
    origin: Timestamp,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock frozen at the current system time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: SystemClock.now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock();
        *offset = offset.saturating_add(by);
    }

    /// Total time advanced since creation.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        let offset = *self.offset.lock();
        let wall = chrono::Duration::from_std(offset)
            .ok()
            .and_then(|delta| self.origin.wall.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Timestamp::new(self.origin.monotonic + offset, wall)
    }
}
