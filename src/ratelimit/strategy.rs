//! The common contract shared by the four limiting strategies.

use std::time::Duration;

use crate::clock::Timestamp;

use super::concurrency::ConcurrencyLimiter;
use super::decision::Decision;
use super::fixed_window::FixedWindowLimiter;
use super::policy::StrategyKind;
use super::sliding_window::SlidingWindowLimiter;
use super::token_bucket::TokenBucketLimiter;

/// A limiting strategy owning the state of one partition.
///
/// Implementations are plain single-threaded state machines. The
/// [`PartitionStore`](super::PartitionStore) serializes calls per partition,
/// so `try_acquire` never has to synchronize on its own.
pub trait LimiterStrategy: Send {
    /// Which strategy family this is.
    fn kind(&self) -> StrategyKind;

    /// Decide whether one request is admitted at `now`, updating state.
    ///
    /// Must complete in bounded time and must tolerate `now` moving
    /// backwards between calls.
    fn try_acquire(&mut self, now: Timestamp) -> Decision;

    /// Whether every counter is back at its baseline at `now`, i.e. dropping
    /// this state and recreating it later would change no future decision.
    fn is_idle(&self, now: Timestamp) -> bool;

    /// Permits currently held by callers. Only leases count.
    fn in_flight(&self) -> u64 {
        0
    }

    /// A read-only view of the counters at `now`.
    fn snapshot(&self, now: Timestamp) -> StateSnapshot;
}

/// Diagnostic view of one partition's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateSnapshot {
    FixedWindow {
        window_start: Timestamp,
        count: u64,
        limit: u64,
    },
    SlidingWindow {
        /// Admits still counted against the trailing window
        counted: u64,
        /// Segments retained in memory
        segments: usize,
        limit: u64,
    },
    TokenBucket {
        tokens: u64,
        capacity: u64,
        /// Time until the next replenishment step
        next_refill_in: Duration,
    },
    Concurrency {
        in_flight: u64,
        limit: u64,
    },
}

/// Strategy state of a partition, one variant per strategy family.
#[derive(Debug, Clone)]
pub enum StrategyState {
    FixedWindow(FixedWindowLimiter),
    SlidingWindow(SlidingWindowLimiter),
    TokenBucket(TokenBucketLimiter),
    Concurrency(ConcurrencyLimiter),
}

impl StrategyState {
    fn as_strategy(&self) -> &dyn LimiterStrategy {
        match self {
            StrategyState::FixedWindow(s) => s,
            StrategyState::SlidingWindow(s) => s,
            StrategyState::TokenBucket(s) => s,
            StrategyState::Concurrency(s) => s,
        }
    }

    fn as_strategy_mut(&mut self) -> &mut dyn LimiterStrategy {
        match self {
            StrategyState::FixedWindow(s) => s,
            StrategyState::SlidingWindow(s) => s,
            StrategyState::TokenBucket(s) => s,
            StrategyState::Concurrency(s) => s,
        }
    }

    /// The concurrency limiter, if this partition hands out leases.
    pub fn as_concurrency_mut(&mut self) -> Option<&mut ConcurrencyLimiter> {
        match self {
            StrategyState::Concurrency(limiter) => Some(limiter),
            _ => None,
        }
    }
}

impl LimiterStrategy for StrategyState {
    fn kind(&self) -> StrategyKind {
        self.as_strategy().kind()
    }

    fn try_acquire(&mut self, now: Timestamp) -> Decision {
        self.as_strategy_mut().try_acquire(now)
    }

    fn is_idle(&self, now: Timestamp) -> bool {
        self.as_strategy().is_idle(now)
    }

    fn in_flight(&self) -> u64 {
        self.as_strategy().in_flight()
    }

    fn snapshot(&self, now: Timestamp) -> StateSnapshot {
        self.as_strategy().snapshot(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::policy::{ConcurrencyOptions, FixedWindowOptions, PolicyOptions};

    #[test]
    fn test_dispatch_matches_policy_kind() {
        let options: PolicyOptions = FixedWindowOptions::new(3, Duration::from_secs(1)).into();
        let mut state = options.build(Timestamp::ZERO);

        assert_eq!(state.kind(), StrategyKind::FixedWindow);
        assert!(state.try_acquire(Timestamp::ZERO).is_admitted());
        assert_eq!(state.in_flight(), 0);
        assert!(state.as_concurrency_mut().is_none());
    }

    #[test]
    fn test_concurrency_state_exposes_leases() {
        let options: PolicyOptions = ConcurrencyOptions::new(2).into();
        let mut state = options.build(Timestamp::ZERO);

        assert!(state.try_acquire(Timestamp::ZERO).is_admitted());
        assert_eq!(state.in_flight(), 1);
        assert!(!state.is_idle(Timestamp::ZERO));
        assert!(state.as_concurrency_mut().is_some());
    }
}
