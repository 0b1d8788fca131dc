//! Route → policy table.

use std::collections::HashMap;
use std::fmt;

use crate::config::RouteConfig;
use crate::error::{LimiterError, Result};
use crate::ratelimit::PartitionStore;

/// Normalized `(method, path)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    method: String,
    path: String,
}

impl RouteKey {
    /// Normalize a method and path.
    ///
    /// Methods are uppercased; paths are lowercased, stripped of any query
    /// string and of trailing slashes (the root stays `/`).
    pub fn new(method: &str, path: &str) -> Self {
        let path = path.split('?').next().unwrap_or_default().trim();
        let trimmed = path.trim_end_matches('/');
        let path = if trimmed.is_empty() {
            "/".to_string()
        } else if trimmed.starts_with('/') {
            trimmed.to_lowercase()
        } else {
            format!("/{}", trimmed.to_lowercase())
        };

        Self {
            method: method.trim().to_uppercase(),
            path,
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Maps routes onto the policy that guards them.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<RouteKey, String>,
}

impl RouteTable {
    /// Build a table, checking every policy exists in `store`.
    pub fn from_config(routes: &[RouteConfig], store: &PartitionStore) -> Result<Self> {
        let mut table = RouteTable::default();
        for route in routes {
            let key = RouteKey::new(&route.method, &route.path);
            if store.policy(&route.policy).is_none() {
                return Err(LimiterError::UnknownRoutePolicy {
                    route: key.to_string(),
                    policy: route.policy.clone(),
                });
            }
            table.routes.insert(key, route.policy.clone());
        }
        Ok(table)
    }

    /// The policy guarding a route, if any.
    pub fn policy_for(&self, method: &str, path: &str) -> Option<&str> {
        self.routes
            .get(&RouteKey::new(method, path))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
