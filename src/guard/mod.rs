//! Framework-agnostic request guard.
//!
//! Maps a request to a policy via the route table and to a partition key via
//! a [`PartitionKeyResolver`], then asks the [`PartitionStore`] for a verdict.
//!
//! [`PartitionStore`]: crate::ratelimit::PartitionStore

mod resolver;
mod route;
mod service;

pub use resolver::{
    resolver_for, HeaderResolver, PartitionKeyResolver, RemoteAddrResolver, UNKNOWN_PARTITION_KEY,
};
pub use route::{RouteKey, RouteTable};
pub use service::{Admission, RateLimitGuard, Rejection, RequestInfo};
