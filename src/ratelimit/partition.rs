//! Partition identity and per-partition state.

use parking_lot::Mutex;
use std::time::Duration;

use crate::clock::Timestamp;
use crate::error::{LimiterError, Result};

use super::policy::PolicyOptions;
use super::strategy::{LimiterStrategy, StrategyState};

/// A key that uniquely identifies a rate limit partition.
///
/// The key is composed of the policy name and the caller identity the
/// partition-key resolver produced (typically the remote address).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId {
    /// The policy this partition belongs to
    pub policy: String,
    /// The caller identity within the policy
    pub key: String,
}

impl PartitionId {
    /// Create a new partition id.
    pub fn new(policy: &str, key: &str) -> Self {
        Self {
            policy: policy.to_string(),
            key: key.to_string(),
        }
    }
}

impl std::fmt::Display for PartitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.policy, self.key)
    }
}

/// Mutable state guarded by the partition lock.
#[derive(Debug)]
pub(crate) struct PartitionState {
    pub(crate) limiter: StrategyState,
    /// Time of the most recent acquire attempt
    pub(crate) last_activity: Timestamp,
    /// Set once the sweeper has removed this partition from the store
    pub(crate) evicted: bool,
}

/// One partition: its identity plus strategy state behind its own lock.
///
/// Every partition has a separate mutex, so traffic on one key never waits
/// on another.
#[derive(Debug)]
pub(crate) struct Partition {
    id: PartitionId,
    state: Mutex<PartitionState>,
}

impl Partition {
    pub(crate) fn new(id: PartitionId, options: &PolicyOptions, now: Timestamp) -> Self {
        Self {
            id,
            state: Mutex::new(PartitionState {
                limiter: options.build(now),
                last_activity: now,
                evicted: false,
            }),
        }
    }

    pub(crate) fn id(&self) -> &PartitionId {
        &self.id
    }

    pub(crate) fn lock(&self) -> parking_lot::MutexGuard<'_, PartitionState> {
        self.state.lock()
    }

    /// Return one concurrency permit to this partition.
    pub(crate) fn release_lease(&self) -> Result<()> {
        let mut state = self.state.lock();
        match state.limiter.as_concurrency_mut() {
            Some(limiter) => limiter
                .release()
                .map_err(|_| LimiterError::DoubleRelease(self.id.to_string())),
            None => Err(LimiterError::NotALease(self.id.to_string())),
        }
    }

    /// Mark the partition evicted if it is idle at `now`.
    ///
    /// A partition qualifies when no lease is held, its counters are back at
    /// baseline and nothing touched it for `idle_ttl`. The decision and the
    /// `evicted` flag are taken under the partition lock, so an acquire that
    /// still holds a reference to this partition sees the flag and retries.
    pub(crate) fn try_evict(&self, now: Timestamp, idle_ttl: Duration) -> bool {
        let mut state = self.state.lock();
        if state.evicted {
            return true;
        }
        if state.limiter.in_flight() > 0 || !state.limiter.is_idle(now) {
            return false;
        }
        if now.saturating_since(state.last_activity) < idle_ttl {
            return false;
        }

        state.evicted = true;
        true
    }

    /// Mark the partition evicted unless a lease is outstanding.
    ///
    /// Unlike [`try_evict`](Self::try_evict) this ignores counters and
    /// idle time.
    pub(crate) fn try_clear(&self) -> bool {
        let mut state = self.state.lock();
        if state.limiter.in_flight() > 0 {
            return false;
        }
        state.evicted = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::policy::{ConcurrencyOptions, FixedWindowOptions};

    #[test]
    fn test_partition_id_display() {
        let id = PartitionId::new("fixed", "10.0.0.1");
        assert_eq!(id.to_string(), "fixed:10.0.0.1");
    }

    #[test]
    fn test_partition_id_equality() {
        assert_eq!(
            PartitionId::new("token", "a"),
            PartitionId::new("token", "a")
        );
        assert_ne!(
            PartitionId::new("token", "a"),
            PartitionId::new("fixed", "a")
        );
    }

    #[test]
    fn test_evicts_only_after_ttl() {
        let options: PolicyOptions = FixedWindowOptions::new(5, Duration::from_secs(1)).into();
        let partition = Partition::new(PartitionId::new("fixed", "k"), &options, Timestamp::ZERO);
        partition.lock().limiter.try_acquire(Timestamp::ZERO);

        let ttl = Duration::from_secs(30);
        assert!(!partition.try_evict(Timestamp::from_secs(10), ttl));
        assert!(partition.try_evict(Timestamp::from_secs(30), ttl));
        assert!(partition.lock().evicted);
    }

    #[test]
    fn test_never_evicts_with_lease_in_flight() {
        let options: PolicyOptions = ConcurrencyOptions::new(1).into();
        let partition = Partition::new(PartitionId::new("conc", "k"), &options, Timestamp::ZERO);
        partition.lock().limiter.try_acquire(Timestamp::ZERO);

        assert!(!partition.try_evict(Timestamp::from_secs(3_600), Duration::ZERO));

        partition.release_lease().unwrap();
        assert!(partition.try_evict(Timestamp::from_secs(3_600), Duration::ZERO));
    }

    #[test]
    fn test_clear_ignores_counters_but_not_leases() {
        let options: PolicyOptions = FixedWindowOptions::new(5, Duration::from_secs(1)).into();
        let busy = Partition::new(PartitionId::new("fixed", "k"), &options, Timestamp::ZERO);
        busy.lock().limiter.try_acquire(Timestamp::ZERO);
        assert!(busy.try_clear());
        assert!(busy.lock().evicted);

        let options: PolicyOptions = ConcurrencyOptions::new(1).into();
        let leased = Partition::new(PartitionId::new("conc", "k"), &options, Timestamp::ZERO);
        leased.lock().limiter.try_acquire(Timestamp::ZERO);
        assert!(!leased.try_clear());
        assert!(!leased.lock().evicted);
    }

    #[test]
    fn test_release_on_non_lease_partition() {
        let options: PolicyOptions = FixedWindowOptions::new(5, Duration::from_secs(1)).into();
        let partition = Partition::new(PartitionId::new("fixed", "k"), &options, Timestamp::ZERO);

        let err = partition.release_lease().unwrap_err();
        assert!(matches!(err, LimiterError::NotALease(_)));
    }
}
