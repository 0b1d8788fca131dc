//! Concurrency limiter handing out leases.

use tracing::warn;

use crate::clock::Timestamp;
use crate::error::{LimiterError, Result};

use super::decision::Decision;
use super::policy::{ConcurrencyOptions, StrategyKind};
use super::strategy::{LimiterStrategy, StateSnapshot};

/// Bounds the number of requests in flight at once.
///
/// Time plays no part here: a permit is held from admission until
/// [`release`](ConcurrencyLimiter::release) and a rejection carries no
/// retry-after hint.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    options: ConcurrencyOptions,
    in_flight: u64,
}

impl ConcurrencyLimiter {
    pub fn new(options: ConcurrencyOptions) -> Self {
        Self {
            options,
            in_flight: 0,
        }
    }

    /// Return one permit.
    ///
    /// Releasing with nothing in flight is a caller bug. It is logged and
    /// reported as [`LimiterError::DoubleRelease`]; the count stays at zero.
    pub fn release(&mut self) -> Result<()> {
        if self.in_flight == 0 {
            warn!(
                limit = self.options.permit_limit,
                "Concurrency permit released with none in flight"
            );
            return Err(LimiterError::DoubleRelease(
                "permit released with none in flight".to_string(),
            ));
        }

        self.in_flight -= 1;
        Ok(())
    }
}

impl LimiterStrategy for ConcurrencyLimiter {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Concurrency
    }

    fn try_acquire(&mut self, _now: Timestamp) -> Decision {
        let limit = self.options.permit_limit;
        if self.in_flight < limit {
            self.in_flight += 1;
            Decision::admit(limit - self.in_flight, limit)
        } else {
            Decision::reject(None, limit)
        }
    }

    fn is_idle(&self, _now: Timestamp) -> bool {
        self.in_flight == 0
    }

    fn in_flight(&self) -> u64 {
        self.in_flight
    }

    fn snapshot(&self, _now: Timestamp) -> StateSnapshot {
        StateSnapshot::Concurrency {
            in_flight: self.in_flight,
            limit: self.options.permit_limit,
        }
    }
}
