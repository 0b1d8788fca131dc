//! Request guard: the decision interface offered to the HTTP layer.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::config::GuardConfig;
use crate::error::Result;
use crate::ratelimit::{Decision, LeaseHandle, PartitionStore};

use super::resolver::{resolver_for, PartitionKeyResolver};
use super::route::RouteTable;

/// The parts of an incoming request the guard looks at.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub method: String,
    pub path: String,
    pub remote_addr: Option<IpAddr>,
    /// Header names are stored lowercased
    pub headers: HashMap<String, String>,
}

impl RequestInfo {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    pub fn with_remote_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_lowercase(), value.to_string());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

/// What the HTTP layer should do with a request.
#[derive(Debug)]
pub enum Admission {
    /// No policy guards this route.
    Unlimited,
    /// The request may proceed. A concurrency lease, if present, must be
    /// held until the handler finishes.
    Admitted {
        decision: Decision,
        lease: Option<LeaseHandle>,
    },
    /// The request must be turned away.
    Rejected(Rejection),
}

impl Admission {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Admission::Rejected(_))
    }
}

/// A rejected request, ready to be rendered as a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    policy: String,
    partition_key: String,
    status: u16,
    decision: Decision,
}

impl Rejection {
    /// Status code to answer with.
    pub fn status_code(&self) -> u16 {
        self.status
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.decision.retry_after()
    }

    /// `Retry-After` header value in whole seconds, rounded up.
    pub fn retry_after_header(&self) -> Option<String> {
        self.retry_after().map(|wait| {
            let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            secs.to_string()
        })
    }

    pub fn policy(&self) -> &str {
        &self.policy
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn decision(&self) -> &Decision {
        &self.decision
    }
}

/// Maps requests to partitions and asks the store for a verdict.
///
/// This struct is thread-safe and can be shared across request handlers.
#[derive(Debug)]
pub struct RateLimitGuard {
    store: Arc<PartitionStore>,
    routes: RouteTable,
    resolver: Box<dyn PartitionKeyResolver>,
    rejection_status: u16,
}

impl RateLimitGuard {
    pub fn new(
        store: Arc<PartitionStore>,
        routes: RouteTable,
        resolver: Box<dyn PartitionKeyResolver>,
        rejection_status: u16,
    ) -> Self {
        Self {
            store,
            routes,
            resolver,
            rejection_status,
        }
    }

    /// Build a guard from configuration.
    ///
    /// Fails if a route names a policy the store does not know.
    pub fn from_config(store: Arc<PartitionStore>, config: &GuardConfig) -> Result<Self> {
        let routes = RouteTable::from_config(&config.routes, &store)?;
        info!(
            routes = routes.len(),
            rejection_status = config.rejection_status_code,
            "Rate limit guard initialized"
        );
        Ok(Self::new(
            store,
            routes,
            resolver_for(&config.partition_key),
            config.rejection_status_code,
        ))
    }

    /// Decide whether `request` may proceed.
    #[instrument(
        skip(self, request),
        fields(method = %request.method, path = %request.path)
    )]
    pub fn check(&self, request: &RequestInfo) -> Result<Admission> {
        let Some(policy) = self.routes.policy_for(&request.method, &request.path) else {
            debug!("No rate limit policy for route");
            return Ok(Admission::Unlimited);
        };

        let key = self.resolver.resolve(request);
        let (decision, lease) = self.store.acquire(policy, &key)?.into_parts();

        if decision.is_admitted() {
            return Ok(Admission::Admitted { decision, lease });
        }

        debug!(
            policy = policy,
            key = %key,
            status = self.rejection_status,
            "Rejecting request"
        );
        Ok(Admission::Rejected(Rejection {
            policy: policy.to_string(),
            partition_key: key,
            status: self.rejection_status,
            decision,
        }))
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn store(&self) -> &Arc<PartitionStore> {
        &self.store
    }
}
