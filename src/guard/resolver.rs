//! Partition key resolution.

use std::fmt::Debug;

use crate::config::PartitionKeySource;

use super::service::RequestInfo;

/// Partition key used when a request carries no usable identity.
pub const UNKNOWN_PARTITION_KEY: &str = "unknown";

/// Derives the partition key for a request.
pub trait PartitionKeyResolver: Send + Sync + Debug {
    fn resolve(&self, request: &RequestInfo) -> String;
}

/// Partitions by the caller's IP address.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteAddrResolver;

impl PartitionKeyResolver for RemoteAddrResolver {
    fn resolve(&self, request: &RequestInfo) -> String {
        request
            .remote_addr
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| UNKNOWN_PARTITION_KEY.to_string())
    }
}

/// Partitions by a request header, e.g. an API key.
///
/// Requests without the header (or with a blank value) fall back to the
/// caller's IP address.
#[derive(Debug, Clone)]
pub struct HeaderResolver {
    name: String,
}

impl HeaderResolver {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.trim().to_lowercase(),
        }
    }
}

impl PartitionKeyResolver for HeaderResolver {
    fn resolve(&self, request: &RequestInfo) -> String {
        match request.header(&self.name).map(str::trim) {
            Some(value) if !value.is_empty() => value.to_string(),
            _ => RemoteAddrResolver.resolve(request),
        }
    }
}

/// Build the resolver described by `source`.
pub fn resolver_for(source: &PartitionKeySource) -> Box<dyn PartitionKeyResolver> {
    match source {
        PartitionKeySource::RemoteAddr => Box::new(RemoteAddrResolver),
        PartitionKeySource::Header { name } => Box::new(HeaderResolver::new(name)),
    }
}
