//! Error types for the Turnstile rate limiting core.

use thiserror::Error;

/// Main error type for Turnstile operations.
///
/// Rejections are not errors: a request over its limit produces a
/// [`Decision`](crate::ratelimit::Decision) with `admitted == false`.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A policy carries options that can never admit a request
    #[error("Invalid policy '{policy}': {reason}")]
    InvalidPolicy {
        /// Name of the offending policy
        policy: String,
        /// What is wrong with it
        reason: String,
    },

    /// The requested policy was never configured
    #[error("Unknown rate limit policy: {0}")]
    UnknownPolicy(String),

    /// A route points at a policy that does not exist
    #[error("Route {route} refers to unknown policy '{policy}'")]
    UnknownRoutePolicy {
        /// The route, rendered as `METHOD /path`
        route: String,
        /// The missing policy name
        policy: String,
    },

    /// A concurrency permit was released while none were in flight
    #[error("Double release on partition {0}: no permits in flight")]
    DoubleRelease(String),

    /// The same lease handle was released more than once
    #[error("Lease on partition {0} was already released")]
    LeaseAlreadyReleased(String),

    /// A lease was released against a partition that does not hand out leases
    #[error("Partition {0} does not use the concurrency strategy")]
    NotALease(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for LimiterError {
    fn from(err: config::ConfigError) -> Self {
        LimiterError::Config(err.to_string())
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
