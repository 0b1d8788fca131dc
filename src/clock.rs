//! Time sources for the rate limiter.
//!
//! Strategies never read the system time themselves. Every decision is made
//! against a [`Timestamp`] supplied by a [`Clock`], which lets tests drive
//! time by hand with [`ManualClock`].

use parking_lot::Mutex;
use std::fmt;
use std::ops::Add;
use std::time::{Duration, Instant};

/// A point in time, measured as the offset from the owning clock's epoch.
///
/// Timestamps from different clocks are not comparable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(Duration);

impl Timestamp {
    /// The clock epoch.
    pub const ZERO: Timestamp = Timestamp(Duration::ZERO);

    /// Create a timestamp at the given offset from the epoch.
    pub const fn from_duration(offset: Duration) -> Self {
        Self(offset)
    }

    /// Create a timestamp `secs` seconds after the epoch.
    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    /// Create a timestamp `millis` milliseconds after the epoch.
    pub const fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    /// Offset from the epoch.
    pub const fn as_duration(&self) -> Duration {
        self.0
    }

    /// Offset from the epoch in nanoseconds, saturating at `u64::MAX`.
    pub fn as_nanos(&self) -> u64 {
        u64::try_from(self.0.as_nanos()).unwrap_or(u64::MAX)
    }

    /// Time elapsed since `earlier`, clamped to zero if `earlier` is in the future.
    ///
    /// This is how every strategy measures elapsed time, so a clock that
    /// steps backwards yields "no time passed" rather than a negative span.
    pub fn saturating_since(&self, earlier: Timestamp) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Self::Output {
        Timestamp(self.0.saturating_add(rhs))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// A source of [`Timestamp`]s.
pub trait Clock: Send + Sync + fmt::Debug {
    /// The current time.
    fn now(&self) -> Timestamp;
}

/// Monotonic wall clock anchored at its creation instant.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock whose epoch is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.origin.elapsed())
    }
}

/// A clock that only moves when told to.
///
/// Unlike a real monotonic clock it can also be [`set`](ManualClock::set)
/// backwards, which is how clock anomalies are exercised in tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    /// Create a clock reading `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = *now + by;
    }

    /// Set the clock to an arbitrary reading, including one in the past.
    pub fn set(&self, to: Timestamp) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}
