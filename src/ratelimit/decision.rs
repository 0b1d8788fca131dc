//! The outcome of a single acquire attempt.

use std::time::Duration;

/// Admit/reject verdict for one request against one partition.
///
/// A `Decision` is an immutable value. Rejection is a normal outcome and is
/// never reported through an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    admitted: bool,
    retry_after: Option<Duration>,
    remaining: Option<u64>,
    limit: u64,
}

impl Decision {
    /// An admission leaving `remaining` permits out of `limit`.
    pub fn admit(remaining: u64, limit: u64) -> Self {
        Self {
            admitted: true,
            retry_after: None,
            remaining: Some(remaining),
            limit,
        }
    }

    /// A rejection, optionally hinting when a retry might succeed.
    pub fn reject(retry_after: Option<Duration>, limit: u64) -> Self {
        Self {
            admitted: false,
            retry_after,
            remaining: Some(0),
            limit,
        }
    }

    /// Whether the request may proceed.
    pub fn is_admitted(&self) -> bool {
        self.admitted
    }

    /// Whether the request must be turned away.
    pub fn is_rejected(&self) -> bool {
        !self.admitted
    }

    /// How long the caller should wait before retrying, if known.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// Permits left in the partition after this decision.
    pub fn remaining(&self) -> Option<u64> {
        self.remaining
    }

    /// The configured permit limit of the policy that decided.
    pub fn limit(&self) -> u64 {
        self.limit
    }
}
