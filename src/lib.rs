//! Turnstile - Partition-Keyed Rate Limiting Core
//!
//! This crate implements an embeddable rate limiter with four strategies
//! (fixed window, sliding window, token bucket and concurrency leases), each
//! applied independently per partition key. A framework-agnostic guard maps
//! requests onto policies and partitions for use by an HTTP layer.

pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod ratelimit;
pub mod simulate;
