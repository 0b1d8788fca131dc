//! Partition store: the entry point of the rate limiting core.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

use crate::clock::{Clock, MonotonicClock, Timestamp};
use crate::config::{PartitionConfig, TurnstileConfig};
use crate::error::{LimiterError, Result};

use super::decision::Decision;
use super::lease::LeaseHandle;
use super::partition::{Partition, PartitionId};
use super::policy::{PolicyOptions, StrategyKind};
use super::strategy::{LimiterStrategy, StateSnapshot};

/// The result of one acquire attempt.
///
/// Admitted requests against a concurrency policy also carry the
/// [`LeaseHandle`] that must be held for the duration of the request.
#[derive(Debug)]
pub struct Acquisition {
    decision: Decision,
    lease: Option<LeaseHandle>,
}

impl Acquisition {
    /// The verdict.
    pub fn decision(&self) -> &Decision {
        &self.decision
    }

    /// Whether the request may proceed.
    pub fn is_admitted(&self) -> bool {
        self.decision.is_admitted()
    }

    /// Split into the verdict and the lease, if any.
    pub fn into_parts(self) -> (Decision, Option<LeaseHandle>) {
        (self.decision, self.lease)
    }

    /// Take the lease, if any.
    pub fn into_lease(self) -> Option<LeaseHandle> {
        self.lease
    }
}

/// Read-only view of one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSnapshot {
    pub id: PartitionId,
    pub kind: StrategyKind,
    pub state: StateSnapshot,
    pub last_activity: Timestamp,
}

/// Owns the limiter state of every partition.
///
/// Policies are fixed at construction. Partitions live in a sharded map and
/// each carries its own lock, so requests for different keys never contend
/// on a global lock.
///
/// This struct is thread-safe and can be shared across multiple tasks.
pub struct PartitionStore {
    /// Configured policies by name
    policies: HashMap<String, PolicyOptions>,
    /// Live partitions
    partitions: DashMap<PartitionId, Arc<Partition>>,
    clock: Arc<dyn Clock>,
    /// How long an idle partition is kept around
    idle_ttl: Duration,
    /// Minimum spacing of opportunistic sweeps run from `acquire`
    sweep_interval: Option<Duration>,
    /// Clock reading (nanoseconds) of the last sweep
    last_sweep: AtomicU64,
}

impl PartitionStore {
    /// Create a store with the given policies and a monotonic clock.
    pub fn new(
        policies: impl IntoIterator<Item = (String, PolicyOptions)>,
        partitions: &PartitionConfig,
    ) -> Result<Self> {
        Self::with_clock(policies, partitions, Arc::new(MonotonicClock::new()))
    }

    /// Create a store reading time from `clock`.
    pub fn with_clock(
        policies: impl IntoIterator<Item = (String, PolicyOptions)>,
        partitions: &PartitionConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let policies: HashMap<String, PolicyOptions> = policies.into_iter().collect();
        for (name, options) in &policies {
            options.validate(name)?;
        }
        if policies.is_empty() {
            return Err(LimiterError::Config(
                "at least one rate limit policy is required".to_string(),
            ));
        }
        if partitions.sweep_interval_secs == 0 {
            return Err(LimiterError::Config(
                "partitions.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }

        info!(
            policies = policies.len(),
            idle_ttl_secs = partitions.idle_ttl_secs,
            "Partition store initialized"
        );

        let now = clock.now();
        Ok(Self {
            policies,
            partitions: DashMap::new(),
            idle_ttl: partitions.idle_ttl(),
            sweep_interval: partitions.sweep_on_acquire.then(|| partitions.sweep_interval()),
            last_sweep: AtomicU64::new(now.as_nanos()),
            clock,
        })
    }

    /// Create a store from a full configuration.
    pub fn from_config(config: &TurnstileConfig) -> Result<Self> {
        Self::new(config.policies.clone(), &config.partitions)
    }

    /// Create a store from a full configuration with a custom clock.
    pub fn from_config_with_clock(config: &TurnstileConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_clock(config.policies.clone(), &config.partitions, clock)
    }

    /// Try to admit one request for `key` under `policy` at the current time.
    pub fn acquire(&self, policy: &str, key: &str) -> Result<Acquisition> {
        self.acquire_at(policy, key, self.clock.now())
    }

    /// Try to admit one request for `key` under `policy` at `now`.
    ///
    /// Fails only if `policy` was never configured. Runs in bounded time and
    /// holds nothing but the partition's own lock while deciding.
    pub fn acquire_at(&self, policy: &str, key: &str, now: Timestamp) -> Result<Acquisition> {
        let options = self
            .policies
            .get(policy)
            .ok_or_else(|| LimiterError::UnknownPolicy(policy.to_string()))?;

        self.maybe_sweep(now);

        let id = PartitionId::new(policy, key);
        loop {
            let partition = self.partition(&id, options, now);
            if let Some(acquisition) = self.try_acquire_on(partition, now) {
                return Ok(acquisition);
            }
        }
    }

    /// Decide one request against `partition`.
    ///
    /// Returns `None` if the partition was evicted after it was looked up;
    /// the map no longer holds it, so the caller retries on a fresh one.
    fn try_acquire_on(&self, partition: Arc<Partition>, now: Timestamp) -> Option<Acquisition> {
        let mut state = partition.lock();
        if state.evicted {
            trace!(partition = %partition.id(), "Lost race with eviction, retrying");
            return None;
        }

        state.last_activity = state.last_activity.max(now);
        let decision = state.limiter.try_acquire(now);
        let kind = state.limiter.kind();
        drop(state);

        trace!(
            partition = %partition.id(),
            admitted = decision.is_admitted(),
            remaining = ?decision.remaining(),
            "Checked rate limit"
        );
        if decision.is_rejected() {
            debug!(
                partition = %partition.id(),
                strategy = %kind,
                limit = decision.limit(),
                retry_after = ?decision.retry_after(),
                "Rate limit exceeded"
            );
        }

        let lease = (decision.is_admitted() && kind == StrategyKind::Concurrency)
            .then(|| LeaseHandle::new(partition));
        Some(Acquisition { decision, lease })
    }

    /// Look up or create the partition for `id`.
    ///
    /// Concurrent first accesses race on the map entry and exactly one
    /// partition is inserted.
    fn partition(&self, id: &PartitionId, options: &PolicyOptions, now: Timestamp) -> Arc<Partition> {
        if let Some(existing) = self.partitions.get(id) {
            return existing.value().clone();
        }

        self.partitions
            .entry(id.clone())
            .or_insert_with(|| {
                debug!(
                    partition = %id,
                    strategy = %options.kind(),
                    limit = options.limit(),
                    "Creating new partition"
                );
                Arc::new(Partition::new(id.clone(), options, now))
            })
            .value()
            .clone()
    }

    fn maybe_sweep(&self, now: Timestamp) {
        let Some(interval) = self.sweep_interval else {
            return;
        };

        let last = self.last_sweep.load(Ordering::Relaxed);
        let now_nanos = now.as_nanos();
        let interval_nanos = u64::try_from(interval.as_nanos()).unwrap_or(u64::MAX);
        if now_nanos.saturating_sub(last) < interval_nanos {
            return;
        }

        // Only the caller that moves the marker runs the sweep.
        if self
            .last_sweep
            .compare_exchange(last, now_nanos, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.sweep_at(now);
        }
    }

    /// Evict idle partitions at the current time.
    pub fn sweep(&self) -> usize {
        self.sweep_at(self.clock.now())
    }

    /// Evict every partition that is idle at `now`, returning how many went.
    ///
    /// Partitions holding leases are never evicted.
    pub fn sweep_at(&self, now: Timestamp) -> usize {
        let idle_ttl = self.idle_ttl;
        let mut evicted = 0usize;
        self.partitions.retain(|id, partition| {
            if partition.try_evict(now, idle_ttl) {
                trace!(partition = %id, "Evicting idle partition");
                evicted += 1;
                false
            } else {
                true
            }
        });

        if evicted > 0 {
            debug!(
                evicted = evicted,
                remaining = self.partitions.len(),
                "Swept idle partitions"
            );
        }
        evicted
    }

    /// A read-only view of one partition, if it exists.
    pub fn snapshot(&self, policy: &str, key: &str) -> Option<PartitionSnapshot> {
        let now = self.clock.now();
        let partition = self.partitions.get(&PartitionId::new(policy, key))?.value().clone();
        let state = partition.lock();
        Some(PartitionSnapshot {
            id: partition.id().clone(),
            kind: state.limiter.kind(),
            state: state.limiter.snapshot(now),
            last_activity: state.last_activity,
        })
    }

    /// Leases currently held on one partition, if it exists.
    pub fn in_flight(&self, policy: &str, key: &str) -> Option<u64> {
        let partition = self.partitions.get(&PartitionId::new(policy, key))?.value().clone();
        let in_flight = partition.lock().limiter.in_flight();
        Some(in_flight)
    }

    /// The options of a configured policy.
    pub fn policy(&self, name: &str) -> Option<&PolicyOptions> {
        self.policies.get(name)
    }

    /// Names of all configured policies.
    pub fn policies(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    /// The clock this store decides against.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Get the number of live partitions.
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Drop every partition that holds no lease, returning how many went.
    ///
    /// Partitions with leases in flight are kept so their permits keep
    /// counting against the limit. Everything else restarts from fresh
    /// state on the next request. This is primarily useful for testing.
    pub fn clear(&self) -> usize {
        let mut cleared = 0usize;
        self.partitions.retain(|_, partition| {
            if partition.try_clear() {
                cleared += 1;
                false
            } else {
                true
            }
        });
        debug!(
            cleared = cleared,
            remaining = self.partitions.len(),
            "Cleared partitions"
        );
        cleared
    }
}

impl std::fmt::Debug for PartitionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionStore")
            .field("policies", &self.policies)
            .field("partitions", &self.partitions.len())
            .field("idle_ttl", &self.idle_ttl)
            .field("sweep_interval", &self.sweep_interval)
            .finish()
    }
}
