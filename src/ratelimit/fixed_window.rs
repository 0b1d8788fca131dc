//! Fixed window counter.

use std::time::Duration;

use crate::clock::Timestamp;

use super::decision::Decision;
use super::policy::{FixedWindowOptions, StrategyKind};
use super::strategy::{LimiterStrategy, StateSnapshot};

/// A counter that admits up to `permit_limit` requests per window.
///
/// Windows are aligned to the clock epoch: window `n` covers
/// `[n * window, (n + 1) * window)`, so a request exactly on a boundary
/// belongs to the new window.
#[derive(Debug, Clone)]
pub struct FixedWindowLimiter {
    options: FixedWindowOptions,
    /// Start of the current window
    window_start: Timestamp,
    /// Requests admitted in the current window
    count: u64,
}

impl FixedWindowLimiter {
    /// Create a counter whose first window contains `now`.
    pub fn new(options: FixedWindowOptions, now: Timestamp) -> Self {
        Self {
            window_start: Self::window_start_for(options.window, now),
            options,
            count: 0,
        }
    }

    /// Requests admitted in the current window.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Start of the current window.
    pub fn window_start(&self) -> Timestamp {
        self.window_start
    }

    fn window_start_for(window: Duration, now: Timestamp) -> Timestamp {
        let length = window.as_nanos().max(1);
        let index = now.as_duration().as_nanos() / length;
        let start = index.saturating_mul(length);
        Timestamp::from_duration(Duration::from_nanos(
            u64::try_from(start).unwrap_or(u64::MAX),
        ))
    }

    fn window_end(&self) -> Timestamp {
        self.window_start + self.options.window
    }

    /// Roll over to the window containing `now`.
    ///
    /// A reading behind the current window is treated as part of it.
    fn roll(&mut self, now: Timestamp) {
        let start = Self::window_start_for(self.options.window, now);
        if start > self.window_start {
            self.window_start = start;
            self.count = 0;
        }
    }
}

impl LimiterStrategy for FixedWindowLimiter {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FixedWindow
    }

    fn try_acquire(&mut self, now: Timestamp) -> Decision {
        self.roll(now);

        let limit = self.options.permit_limit;
        if self.count < limit {
            self.count += 1;
            Decision::admit(limit - self.count, limit)
        } else {
            Decision::reject(Some(self.window_end().saturating_since(now)), limit)
        }
    }

    fn is_idle(&self, now: Timestamp) -> bool {
        self.count == 0 || now >= self.window_end()
    }

    fn snapshot(&self, now: Timestamp) -> StateSnapshot {
        let mut current = self.clone();
        current.roll(now);
        StateSnapshot::FixedWindow {
            window_start: current.window_start,
            count: current.count,
            limit: self.options.permit_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: u64, window_secs: u64) -> FixedWindowLimiter {
        FixedWindowLimiter::new(
            FixedWindowOptions::new(limit, Duration::from_secs(window_secs)),
            Timestamp::ZERO,
        )
    }

    #[test]
    fn test_admits_up_to_limit_then_rejects() {
        let mut limiter = limiter(10, 10);

        for i in 0..10 {
            let decision = limiter.try_acquire(Timestamp::from_millis(i * 100));
            assert!(decision.is_admitted(), "request {} should be admitted", i + 1);
            assert_eq!(decision.remaining(), Some(9 - i));
        }

        let decision = limiter.try_acquire(Timestamp::from_secs(4));
        assert!(decision.is_rejected());
        assert_eq!(decision.retry_after(), Some(Duration::from_secs(6)));
        assert_eq!(limiter.count(), 10);
    }

    #[test]
    fn test_rollover_resets_count() {
        let mut limiter = limiter(10, 10);
        for _ in 0..10 {
            limiter.try_acquire(Timestamp::from_secs(1));
        }
        assert!(limiter.try_acquire(Timestamp::from_secs(9)).is_rejected());

        let decision = limiter.try_acquire(Timestamp::from_secs(12));
        assert!(decision.is_admitted());
        assert_eq!(limiter.count(), 1);
        assert_eq!(limiter.window_start(), Timestamp::from_secs(10));
    }

    #[test]
    fn test_boundary_belongs_to_new_window() {
        let mut limiter = limiter(1, 10);
        assert!(limiter.try_acquire(Timestamp::from_millis(9_999)).is_admitted());
        assert!(limiter.try_acquire(Timestamp::from_millis(9_999)).is_rejected());

        assert!(limiter.try_acquire(Timestamp::from_secs(10)).is_admitted());
        assert_eq!(limiter.window_start(), Timestamp::from_secs(10));
    }

    #[test]
    fn test_window_start_is_aligned_to_epoch() {
        let mut limiter = FixedWindowLimiter::new(
            FixedWindowOptions::new(5, Duration::from_secs(10)),
            Timestamp::from_secs(23),
        );
        assert_eq!(limiter.window_start(), Timestamp::from_secs(20));

        limiter.try_acquire(Timestamp::from_secs(57));
        assert_eq!(limiter.window_start(), Timestamp::from_secs(50));
    }

    #[test]
    fn test_backwards_clock_stays_in_current_window() {
        let mut limiter = limiter(2, 10);
        limiter.try_acquire(Timestamp::from_secs(25));
        limiter.try_acquire(Timestamp::from_secs(25));

        // Clock stepped back into an earlier window: no reset, no negative retry.
        let decision = limiter.try_acquire(Timestamp::from_secs(5));
        assert!(decision.is_rejected());
        assert_eq!(limiter.window_start(), Timestamp::from_secs(20));
        assert_eq!(decision.retry_after(), Some(Duration::from_secs(25)));
    }

    #[test]
    fn test_idle_after_window_expires() {
        let mut limiter = limiter(5, 10);
        assert!(limiter.is_idle(Timestamp::ZERO));

        limiter.try_acquire(Timestamp::from_secs(1));
        assert!(!limiter.is_idle(Timestamp::from_secs(5)));
        assert!(limiter.is_idle(Timestamp::from_secs(10)));
    }

    #[test]
    fn test_snapshot_reflects_rollover() {
        let mut limiter = limiter(5, 10);
        limiter.try_acquire(Timestamp::from_secs(1));

        assert_eq!(
            limiter.snapshot(Timestamp::from_secs(2)),
            StateSnapshot::FixedWindow {
                window_start: Timestamp::ZERO,
                count: 1,
                limit: 5,
            }
        );
        assert_eq!(
            limiter.snapshot(Timestamp::from_secs(11)),
            StateSnapshot::FixedWindow {
                window_start: Timestamp::from_secs(10),
                count: 0,
                limit: 5,
            }
        );
    }
}
