//! Token bucket with stepped replenishment.
//!
//! The bucket starts full. Every whole `replenishment_period` since the last
//! replenishment adds `tokens_per_period` tokens, capped at `token_limit`.
//! Partial periods are carried over by advancing `last_refill` only by whole
//! periods, so no refill progress is lost between requests.

use std::time::Duration;

use crate::clock::Timestamp;

use super::decision::Decision;
use super::policy::{StrategyKind, TokenBucketOptions};
use super::strategy::{LimiterStrategy, StateSnapshot};

#[derive(Debug, Clone)]
pub struct TokenBucketLimiter {
    options: TokenBucketOptions,
    tokens: u64,
    /// Start of the replenishment period in progress
    last_refill: Timestamp,
}

impl TokenBucketLimiter {
    /// Create a full bucket.
    pub fn new(options: TokenBucketOptions, now: Timestamp) -> Self {
        Self {
            options,
            tokens: options.token_limit,
            last_refill: now,
        }
    }

    /// Tokens available at `now`, without consuming any.
    pub fn tokens_at(&self, now: Timestamp) -> u64 {
        let periods = self.elapsed_periods(now);
        self.tokens_after(periods)
    }

    fn period_nanos(&self) -> u128 {
        self.options.replenishment_period.as_nanos().max(1)
    }

    fn elapsed_periods(&self, now: Timestamp) -> u128 {
        now.saturating_since(self.last_refill).as_nanos() / self.period_nanos()
    }

    fn tokens_after(&self, periods: u128) -> u64 {
        let added = periods.saturating_mul(u128::from(self.options.tokens_per_period));
        let total = u128::from(self.tokens).saturating_add(added);
        total.min(u128::from(self.options.token_limit)) as u64
    }

    fn refill(&mut self, now: Timestamp) {
        let periods = self.elapsed_periods(now);
        if periods == 0 {
            return;
        }

        self.tokens = self.tokens_after(periods);
        let advanced = periods.saturating_mul(self.period_nanos());
        self.last_refill = self.last_refill
            + Duration::from_nanos(u64::try_from(advanced).unwrap_or(u64::MAX));
    }

    /// Time from `now` until the bucket holds at least one token.
    fn retry_after(&self, now: Timestamp) -> Duration {
        let deficit = 1u64.saturating_sub(self.tokens);
        let periods = deficit.div_ceil(self.options.tokens_per_period.max(1));
        let wait_nanos = u128::from(periods).saturating_mul(self.period_nanos());
        let available_at =
            self.last_refill + Duration::from_nanos(u64::try_from(wait_nanos).unwrap_or(u64::MAX));
        available_at.saturating_since(now)
    }
}

impl LimiterStrategy for TokenBucketLimiter {
    fn kind(&self) -> StrategyKind {
        StrategyKind::TokenBucket
    }

    fn try_acquire(&mut self, now: Timestamp) -> Decision {
        self.refill(now);

        let capacity = self.options.token_limit;
        if self.tokens >= 1 {
            self.tokens -= 1;
            Decision::admit(self.tokens, capacity)
        } else {
            Decision::reject(Some(self.retry_after(now)), capacity)
        }
    }

    fn is_idle(&self, now: Timestamp) -> bool {
        self.tokens_at(now) == self.options.token_limit
    }

    fn snapshot(&self, now: Timestamp) -> StateSnapshot {
        let period = self.period_nanos();
        let into_period = now.saturating_since(self.last_refill).as_nanos() % period;
        let next = u64::try_from(period - into_period).unwrap_or(u64::MAX);
        StateSnapshot::TokenBucket {
            tokens: self.tokens_at(now),
            capacity: self.options.token_limit,
            next_refill_in: Duration::from_nanos(next),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bucket() -> TokenBucketLimiter {
        TokenBucketLimiter::new(
            TokenBucketOptions::new(5, Duration::from_secs(10), 2),
            Timestamp::ZERO,
        )
    }

    #[test]
    fn test_starts_full_and_drains() {
        let mut bucket = bucket();
        for i in 0..5 {
            let decision = bucket.try_acquire(Timestamp::from_secs(1));
            assert!(decision.is_admitted());
            assert_eq!(decision.remaining(), Some(4 - i));
        }

        let decision = bucket.try_acquire(Timestamp::from_secs(1));
        assert!(decision.is_rejected());
        assert_eq!(decision.retry_after(), Some(Duration::from_secs(9)));
    }

    #[test]
    fn test_replenishes_per_period() {
        let mut bucket = bucket();
        for _ in 0..5 {
            bucket.try_acquire(Timestamp::ZERO);
        }
        assert!(bucket.try_acquire(Timestamp::from_millis(9_999)).is_rejected());

        assert!(bucket.try_acquire(Timestamp::from_secs(10)).is_admitted());
        assert!(bucket.try_acquire(Timestamp::from_secs(10)).is_admitted());
        let decision = bucket.try_acquire(Timestamp::from_secs(10));
        assert!(decision.is_rejected());
        assert_eq!(decision.retry_after(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_partial_period_progress_is_kept() {
        let mut bucket = bucket();
        for _ in 0..5 {
            bucket.try_acquire(Timestamp::ZERO);
        }

        // 15s in: one refill happened at 10s, the next is due at 20s.
        bucket.try_acquire(Timestamp::from_secs(15));
        bucket.try_acquire(Timestamp::from_secs(15));
        let decision = bucket.try_acquire(Timestamp::from_secs(15));
        assert_eq!(decision.retry_after(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_never_exceeds_capacity_after_long_idle() {
        let mut bucket = bucket();
        bucket.try_acquire(Timestamp::ZERO);

        let an_hour = Timestamp::from_secs(3_600);
        assert_eq!(bucket.tokens_at(an_hour), 5);
        assert!(bucket.is_idle(an_hour));

        let decision = bucket.try_acquire(an_hour);
        assert_eq!(decision.remaining(), Some(4));
    }

    #[test]
    fn test_backwards_clock_does_not_refill() {
        let mut bucket = bucket();
        for _ in 0..5 {
            bucket.try_acquire(Timestamp::from_secs(20));
        }
        // The first acquire at 20s refilled (already full) and moved the anchor to 20s.
        let decision = bucket.try_acquire(Timestamp::from_secs(5));
        assert!(decision.is_rejected());
        assert_eq!(decision.retry_after(), Some(Duration::from_secs(25)));
        assert_eq!(bucket.tokens_at(Timestamp::from_secs(5)), 0);
    }

    #[test]
    fn test_snapshot_reports_next_refill() {
        let mut bucket = bucket();
        bucket.try_acquire(Timestamp::ZERO);

        assert_eq!(
            bucket.snapshot(Timestamp::from_secs(4)),
            StateSnapshot::TokenBucket {
                tokens: 4,
                capacity: 5,
                next_refill_in: Duration::from_secs(6),
            }
        );
    }

    proptest! {
        #[test]
        fn prop_tokens_stay_within_capacity(
            gaps in proptest::collection::vec(0u64..30_000, 1..200)
        ) {
            let mut bucket = bucket();
            let mut now = Timestamp::ZERO;
            for gap in gaps {
                now = now + Duration::from_millis(gap);
                bucket.try_acquire(now);
                prop_assert!(bucket.tokens_at(now) <= 5);
            }
        }

        #[test]
        fn prop_retry_after_shrinks_toward_availability(steps in 1u64..100) {
            let mut bucket = bucket();
            for _ in 0..5 {
                bucket.try_acquire(Timestamp::ZERO);
            }

            let mut previous = Duration::MAX;
            for step in 0..steps {
                let now = Timestamp::from_millis(step * 99);
                if now >= Timestamp::from_secs(10) {
                    break;
                }
                let retry = bucket.clone().try_acquire(now).retry_after().unwrap();
                prop_assert!(retry < previous);
                previous = retry;
            }
        }
    }
}
