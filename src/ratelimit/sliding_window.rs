//! Segmented sliding window counter.
//!
//! The trailing window is divided into `segments_per_window` equal segments.
//! Every admit is charged to the segment containing the request time, and a
//! segment keeps counting until its newest admit is a full window old. That
//! rule bounds every half-open span of one window length to `permit_limit`
//! admits, including spans that straddle segment boundaries, while memory
//! stays at `segments_per_window + 1` segments.

use std::collections::VecDeque;
use std::time::Duration;

use crate::clock::Timestamp;

use super::decision::Decision;
use super::policy::{SlidingWindowOptions, StrategyKind};
use super::strategy::{LimiterStrategy, StateSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    /// Absolute segment number, `floor(time / segment_length)`
    index: u64,
    /// Admits charged to this segment
    count: u64,
    /// Time of the newest admit in this segment
    last_admit: Timestamp,
}

/// A sliding window counter made of fixed-length segments.
#[derive(Debug, Clone)]
pub struct SlidingWindowLimiter {
    options: SlidingWindowOptions,
    segment_nanos: u64,
    /// Segments with admits still inside the window, oldest first
    segments: VecDeque<Segment>,
}

impl SlidingWindowLimiter {
    pub fn new(options: SlidingWindowOptions) -> Self {
        let segment_nanos = u64::try_from(options.segment_length().as_nanos())
            .unwrap_or(u64::MAX)
            .max(1);
        Self {
            options,
            segment_nanos,
            segments: VecDeque::with_capacity(options.segments_per_window as usize + 1),
        }
    }

    /// Admits currently counted against the window at `now`.
    pub fn counted(&self, now: Timestamp) -> u64 {
        self.segments
            .iter()
            .filter(|segment| !self.has_exited(segment, now))
            .map(|segment| segment.count)
            .sum()
    }

    /// Number of segments held in memory.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn has_exited(&self, segment: &Segment, now: Timestamp) -> bool {
        now.saturating_since(segment.last_admit) >= self.options.window
    }

    /// Drop segments that have left the trailing window.
    ///
    /// `last_admit` never decreases from front to back, so stale segments
    /// are always at the front.
    fn purge(&mut self, now: Timestamp) {
        while let Some(front) = self.segments.front() {
            if !self.has_exited(front, now) {
                break;
            }
            self.segments.pop_front();
        }
    }

    fn charge(&mut self, now: Timestamp) {
        let index = now.as_nanos() / self.segment_nanos;
        match self.segments.back_mut() {
            // A reading behind the newest segment is charged to it.
            Some(back) if back.index >= index => {
                back.count += 1;
                back.last_admit = back.last_admit.max(now);
            }
            _ => self.segments.push_back(Segment {
                index,
                count: 1,
                last_admit: now,
            }),
        }
    }

    /// Time until the oldest counted segment leaves the window.
    fn retry_after(&self, now: Timestamp) -> Option<Duration> {
        self.segments
            .front()
            .map(|oldest| (oldest.last_admit + self.options.window).saturating_since(now))
    }
}

impl LimiterStrategy for SlidingWindowLimiter {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SlidingWindow
    }

    fn try_acquire(&mut self, now: Timestamp) -> Decision {
        self.purge(now);

        let limit = self.options.permit_limit;
        let counted: u64 = self.segments.iter().map(|segment| segment.count).sum();
        if counted < limit {
            self.charge(now);
            Decision::admit(limit - counted - 1, limit)
        } else {
            Decision::reject(self.retry_after(now), limit)
        }
    }

    fn is_idle(&self, now: Timestamp) -> bool {
        self.segments
            .iter()
            .all(|segment| self.has_exited(segment, now))
    }

    fn snapshot(&self, now: Timestamp) -> StateSnapshot {
        StateSnapshot::SlidingWindow {
            counted: self.counted(now),
            segments: self.segments.len(),
            limit: self.options.permit_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn limiter() -> SlidingWindowLimiter {
        SlidingWindowLimiter::new(SlidingWindowOptions::new(15, Duration::from_secs(15), 3))
    }

    #[test]
    fn test_admits_limit_then_rejects_until_window_passes() {
        let mut limiter = limiter();
        for _ in 0..15 {
            assert!(limiter.try_acquire(Timestamp::ZERO).is_admitted());
        }

        let decision = limiter.try_acquire(Timestamp::from_secs(7));
        assert!(decision.is_rejected());
        assert_eq!(decision.retry_after(), Some(Duration::from_secs(8)));

        assert!(limiter.try_acquire(Timestamp::from_secs(15)).is_admitted());
        assert_eq!(limiter.counted(Timestamp::from_secs(15)), 1);
    }

    #[test]
    fn test_counts_spread_across_segments() {
        let mut limiter = limiter();
        for at in [1, 6, 11] {
            for _ in 0..5 {
                assert!(limiter.try_acquire(Timestamp::from_secs(at)).is_admitted());
            }
        }
        assert_eq!(limiter.segment_count(), 3);

        let decision = limiter.try_acquire(Timestamp::from_secs(12));
        assert!(decision.is_rejected());
        assert_eq!(decision.retry_after(), Some(Duration::from_secs(4)));

        // The first segment's admits are a full window old at t=16.
        let decision = limiter.try_acquire(Timestamp::from_secs(16));
        assert!(decision.is_admitted());
        assert_eq!(decision.remaining(), Some(4));
    }

    #[test]
    fn test_late_segment_admits_are_held_a_full_window() {
        let mut limiter = limiter();
        for _ in 0..15 {
            assert!(limiter.try_acquire(Timestamp::from_millis(4_900)).is_admitted());
        }

        // Segment 0 has rotated out of the newest three, but its admits are
        // only 10.1s old.
        let decision = limiter.try_acquire(Timestamp::from_secs(15));
        assert!(decision.is_rejected());
        assert_eq!(decision.retry_after(), Some(Duration::from_millis(4_900)));

        assert!(limiter.try_acquire(Timestamp::from_millis(19_900)).is_admitted());
    }

    #[test]
    fn test_backwards_clock_charges_newest_segment() {
        let mut limiter = limiter();
        assert!(limiter.try_acquire(Timestamp::from_secs(12)).is_admitted());
        assert!(limiter.try_acquire(Timestamp::from_secs(2)).is_admitted());

        assert_eq!(limiter.segment_count(), 1);
        assert_eq!(limiter.counted(Timestamp::from_secs(12)), 2);
    }

    #[test]
    fn test_idle_once_all_segments_exit() {
        let mut limiter = limiter();
        assert!(limiter.is_idle(Timestamp::ZERO));

        limiter.try_acquire(Timestamp::from_secs(3));
        assert!(!limiter.is_idle(Timestamp::from_secs(17)));
        assert!(limiter.is_idle(Timestamp::from_secs(18)));
    }

    proptest! {
        #[test]
        fn prop_no_window_span_exceeds_limit(
            gaps in proptest::collection::vec(0u64..2_000, 1..400)
        ) {
            let window = Duration::from_secs(15);
            let mut limiter = limiter();
            let mut now = Timestamp::ZERO;
            let mut admitted = Vec::new();

            for gap in gaps {
                now = now + Duration::from_millis(gap);
                if limiter.try_acquire(now).is_admitted() {
                    admitted.push(now);
                }
            }

            // The busiest span always starts at an admit.
            for (i, start) in admitted.iter().enumerate() {
                let end = *start + window;
                let in_span = admitted[i..].iter().take_while(|t| **t < end).count();
                prop_assert!(in_span <= 15, "{} admits in span starting at {}", in_span, start);
            }

            prop_assert!(limiter.segment_count() <= 4);
        }
    }
}
