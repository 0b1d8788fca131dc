//! Rate limit policy options.
//!
//! A policy is a named, immutable set of strategy parameters. Policies are
//! validated once when the [`PartitionStore`](super::PartitionStore) is
//! built, so a bad limit or window never surfaces at request time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::clock::Timestamp;
use crate::error::{LimiterError, Result};

use super::concurrency::ConcurrencyLimiter;
use super::fixed_window::FixedWindowLimiter;
use super::sliding_window::SlidingWindowLimiter;
use super::strategy::StrategyState;
use super::token_bucket::TokenBucketLimiter;

/// Parameters of a fixed window policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedWindowOptions {
    /// Maximum requests admitted per window
    pub permit_limit: u64,
    /// Length of one window
    #[serde(rename = "window_ms", with = "millis")]
    pub window: Duration,
}

impl FixedWindowOptions {
    pub fn new(permit_limit: u64, window: Duration) -> Self {
        Self {
            permit_limit,
            window,
        }
    }

    fn check(&self) -> std::result::Result<(), String> {
        if self.permit_limit == 0 {
            return Err("permit_limit must be greater than zero".to_string());
        }
        if self.window.is_zero() {
            return Err("window must be longer than zero".to_string());
        }
        Ok(())
    }
}

/// Parameters of a sliding window policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidingWindowOptions {
    /// Maximum requests admitted in any trailing window
    pub permit_limit: u64,
    /// Length of the trailing window
    #[serde(rename = "window_ms", with = "millis")]
    pub window: Duration,
    /// Number of equal segments the window is divided into
    pub segments_per_window: u32,
}

impl SlidingWindowOptions {
    pub fn new(permit_limit: u64, window: Duration, segments_per_window: u32) -> Self {
        Self {
            permit_limit,
            window,
            segments_per_window,
        }
    }

    /// Length of one segment.
    pub fn segment_length(&self) -> Duration {
        self.window / self.segments_per_window.max(1)
    }

    fn check(&self) -> std::result::Result<(), String> {
        if self.permit_limit == 0 {
            return Err("permit_limit must be greater than zero".to_string());
        }
        if self.window.is_zero() {
            return Err("window must be longer than zero".to_string());
        }
        if self.segments_per_window == 0 {
            return Err("segments_per_window must be greater than zero".to_string());
        }
        if self.segment_length().is_zero() {
            return Err("window is too short for the number of segments".to_string());
        }
        Ok(())
    }
}

/// Parameters of a token bucket policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBucketOptions {
    /// Bucket capacity; the bucket starts full
    pub token_limit: u64,
    /// Interval between replenishments
    #[serde(rename = "replenishment_period_ms", with = "millis")]
    pub replenishment_period: Duration,
    /// Tokens added at each replenishment
    pub tokens_per_period: u64,
}

impl TokenBucketOptions {
    pub fn new(token_limit: u64, replenishment_period: Duration, tokens_per_period: u64) -> Self {
        Self {
            token_limit,
            replenishment_period,
            tokens_per_period,
        }
    }

    fn check(&self) -> std::result::Result<(), String> {
        if self.token_limit == 0 {
            return Err("token_limit must be greater than zero".to_string());
        }
        if self.replenishment_period.is_zero() {
            return Err("replenishment_period must be longer than zero".to_string());
        }
        if self.tokens_per_period == 0 {
            return Err("tokens_per_period must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Parameters of a concurrency policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyOptions {
    /// Maximum leases held at once
    pub permit_limit: u64,
}

impl ConcurrencyOptions {
    pub fn new(permit_limit: u64) -> Self {
        Self { permit_limit }
    }

    fn check(&self) -> std::result::Result<(), String> {
        if self.permit_limit == 0 {
            return Err("permit_limit must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// The strategy families a policy can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    FixedWindow,
    SlidingWindow,
    TokenBucket,
    Concurrency,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::FixedWindow => "fixed_window",
            StrategyKind::SlidingWindow => "sliding_window",
            StrategyKind::TokenBucket => "token_bucket",
            StrategyKind::Concurrency => "concurrency",
        };
        f.write_str(name)
    }
}

/// Options for one named policy, tagged by strategy.
///
/// In YAML:
///
/// ```yaml
/// strategy: token_bucket
/// token_limit: 5
/// replenishment_period_ms: 10000
/// tokens_per_period: 2
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum PolicyOptions {
    FixedWindow(FixedWindowOptions),
    SlidingWindow(SlidingWindowOptions),
    TokenBucket(TokenBucketOptions),
    Concurrency(ConcurrencyOptions),
}

impl PolicyOptions {
    /// Which strategy this policy uses.
    pub fn kind(&self) -> StrategyKind {
        match self {
            PolicyOptions::FixedWindow(_) => StrategyKind::FixedWindow,
            PolicyOptions::SlidingWindow(_) => StrategyKind::SlidingWindow,
            PolicyOptions::TokenBucket(_) => StrategyKind::TokenBucket,
            PolicyOptions::Concurrency(_) => StrategyKind::Concurrency,
        }
    }

    /// The permit (or token) limit of the policy.
    pub fn limit(&self) -> u64 {
        match self {
            PolicyOptions::FixedWindow(o) => o.permit_limit,
            PolicyOptions::SlidingWindow(o) => o.permit_limit,
            PolicyOptions::TokenBucket(o) => o.token_limit,
            PolicyOptions::Concurrency(o) => o.permit_limit,
        }
    }

    /// Reject options that could never admit a request.
    pub fn validate(&self, policy: &str) -> Result<()> {
        let checked = match self {
            PolicyOptions::FixedWindow(o) => o.check(),
            PolicyOptions::SlidingWindow(o) => o.check(),
            PolicyOptions::TokenBucket(o) => o.check(),
            PolicyOptions::Concurrency(o) => o.check(),
        };

        checked.map_err(|reason| LimiterError::InvalidPolicy {
            policy: policy.to_string(),
            reason,
        })
    }

    /// Fresh strategy state for a new partition created at `now`.
    pub(crate) fn build(&self, now: Timestamp) -> StrategyState {
        match *self {
            PolicyOptions::FixedWindow(o) => {
                StrategyState::FixedWindow(FixedWindowLimiter::new(o, now))
            }
            PolicyOptions::SlidingWindow(o) => {
                StrategyState::SlidingWindow(SlidingWindowLimiter::new(o))
            }
            PolicyOptions::TokenBucket(o) => {
                StrategyState::TokenBucket(TokenBucketLimiter::new(o, now))
            }
            PolicyOptions::Concurrency(o) => StrategyState::Concurrency(ConcurrencyLimiter::new(o)),
        }
    }
}

impl From<FixedWindowOptions> for PolicyOptions {
    fn from(options: FixedWindowOptions) -> Self {
        PolicyOptions::FixedWindow(options)
    }
}

impl From<SlidingWindowOptions> for PolicyOptions {
    fn from(options: SlidingWindowOptions) -> Self {
        PolicyOptions::SlidingWindow(options)
    }
}

impl From<TokenBucketOptions> for PolicyOptions {
    fn from(options: TokenBucketOptions) -> Self {
        PolicyOptions::TokenBucket(options)
    }
}

impl From<ConcurrencyOptions> for PolicyOptions {
    fn from(options: ConcurrencyOptions) -> Self {
        PolicyOptions::Concurrency(options)
    }
}

/// Serde adapter storing a [`Duration`] as whole milliseconds.
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
