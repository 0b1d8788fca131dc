//! Rate limiting strategies and partition state management.

mod concurrency;
mod decision;
mod fixed_window;
mod lease;
mod partition;
mod policy;
mod sliding_window;
mod store;
mod strategy;
mod sweeper;
mod token_bucket;

pub use concurrency::ConcurrencyLimiter;
pub use decision::Decision;
pub use fixed_window::FixedWindowLimiter;
pub use lease::LeaseHandle;
pub use partition::PartitionId;
pub use policy::{
    ConcurrencyOptions, FixedWindowOptions, PolicyOptions, SlidingWindowOptions, StrategyKind,
    TokenBucketOptions,
};
pub use sliding_window::SlidingWindowLimiter;
pub use store::{Acquisition, PartitionSnapshot, PartitionStore};
pub use strategy::{LimiterStrategy, StateSnapshot, StrategyState};
pub use sweeper::Sweeper;
pub use token_bucket::TokenBucketLimiter;
