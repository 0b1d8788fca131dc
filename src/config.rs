//! Configuration management for Turnstile.
//!
//! Policies, partition housekeeping and the route table are read once at
//! startup and never change afterwards. The defaults reproduce the demo API
//! this service fronts: four policies named `fixed`, `token`, `concurrency`
//! and `sliding`, and the person/employee/company routes bound to them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{LimiterError, Result};
use crate::ratelimit::{
    ConcurrencyOptions, FixedWindowOptions, PolicyOptions, SlidingWindowOptions,
    TokenBucketOptions,
};

/// Prefix of environment variables overriding file settings, e.g.
/// `TURNSTILE__PARTITIONS__IDLE_TTL_SECS=60`.
pub const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for Turnstile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Rate limit policies by name
    #[serde(default = "default_policies")]
    pub policies: BTreeMap<String, PolicyOptions>,

    /// Partition housekeeping
    #[serde(default)]
    pub partitions: PartitionConfig,

    /// Request-facing guard configuration
    #[serde(default)]
    pub guard: GuardConfig,
}

impl Default for TurnstileConfig {
    fn default() -> Self {
        Self {
            policies: default_policies(),
            partitions: PartitionConfig::default(),
            guard: GuardConfig::default(),
        }
    }
}

/// Partition eviction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Idle partitions are evicted after this many seconds
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_secs: u64,

    /// Interval between sweeps, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Also sweep from the request path, at most once per interval
    #[serde(default = "default_sweep_on_acquire")]
    pub sweep_on_acquire: bool,
}

impl PartitionConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: default_idle_ttl(),
            sweep_interval_secs: default_sweep_interval(),
            sweep_on_acquire: default_sweep_on_acquire(),
        }
    }
}

fn default_idle_ttl() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_sweep_on_acquire() -> bool {
    true
}

/// How the guard maps requests onto partitions and rejections onto responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Status code sent for rejected requests
    #[serde(default = "default_rejection_status")]
    pub rejection_status_code: u16,

    /// Where the partition key comes from
    #[serde(default)]
    pub partition_key: PartitionKeySource,

    /// Route → policy bindings
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteConfig>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            rejection_status_code: default_rejection_status(),
            partition_key: PartitionKeySource::default(),
            routes: default_routes(),
        }
    }
}

fn default_rejection_status() -> u16 {
    429
}

/// Source of the partition key for each request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum PartitionKeySource {
    /// The caller's IP address
    #[default]
    RemoteAddr,
    /// A request header, falling back to the caller's IP address
    Header {
        /// Header name, matched case-insensitively
        name: String,
    },
}

/// Binds one route to a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// HTTP method, e.g. `GET`
    pub method: String,
    /// Request path, e.g. `/person`
    pub path: String,
    /// Name of the policy guarding the route
    pub policy: String,
}

impl RouteConfig {
    pub fn new(method: &str, path: &str, policy: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            policy: policy.to_string(),
        }
    }
}

/// The policies of the demo API.
pub fn default_policies() -> BTreeMap<String, PolicyOptions> {
    let mut policies = BTreeMap::new();
    policies.insert(
        "fixed".to_string(),
        FixedWindowOptions::new(10, Duration::from_secs(10)).into(),
    );
    policies.insert(
        "token".to_string(),
        TokenBucketOptions::new(5, Duration::from_secs(10), 2).into(),
    );
    policies.insert("concurrency".to_string(), ConcurrencyOptions::new(2).into());
    policies.insert(
        "sliding".to_string(),
        SlidingWindowOptions::new(15, Duration::from_secs(15), 3).into(),
    );
    policies
}

/// The routes of the demo API.
pub fn default_routes() -> Vec<RouteConfig> {
    vec![
        RouteConfig::new("GET", "/person", "fixed"),
        RouteConfig::new("POST", "/person", "fixed"),
        RouteConfig::new("GET", "/employee", "token"),
        RouteConfig::new("POST", "/employee", "token"),
        RouteConfig::new("GET", "/company", "concurrency"),
        RouteConfig::new("POST", "/company", "sliding"),
    ]
}

impl TurnstileConfig {
    /// Load configuration from a file, with `TURNSTILE__*` environment
    /// variables layered on top.
    ///
    /// The format follows the file extension. Keys are case-insensitive,
    /// so policy names are effectively lowercase.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: TurnstileConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig = serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every policy and every route binding.
    pub fn validate(&self) -> Result<()> {
        if self.policies.is_empty() {
            return Err(LimiterError::Config(
                "at least one rate limit policy is required".to_string(),
            ));
        }
        for (name, options) in &self.policies {
            options.validate(name)?;
        }

        if self.partitions.sweep_interval_secs == 0 {
            return Err(LimiterError::Config(
                "partitions.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }

        let status = self.guard.rejection_status_code;
        if !(400..=599).contains(&status) {
            return Err(LimiterError::Config(format!(
                "guard.rejection_status_code must be a 4xx or 5xx status, got {}",
                status
            )));
        }

        if let PartitionKeySource::Header { name } = &self.guard.partition_key {
            if name.trim().is_empty() {
                return Err(LimiterError::Config(
                    "guard.partition_key.name must not be empty".to_string(),
                ));
            }
        }

        for route in &self.guard.routes {
            if !self.policies.contains_key(&route.policy) {
                return Err(LimiterError::UnknownRoutePolicy {
                    route: format!("{} {}", route.method, route.path),
                    policy: route.policy.clone(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::StrategyKind;
    use std::io::Write;

    #[test]
    fn test_default_config_mirrors_demo_api() {
        let config = TurnstileConfig::default();
        assert!(config.validate().is_ok());

        assert_eq!(config.policies.len(), 4);
        assert_eq!(config.policies["fixed"].kind(), StrategyKind::FixedWindow);
        assert_eq!(config.policies["token"].kind(), StrategyKind::TokenBucket);
        assert_eq!(config.policies["concurrency"].kind(), StrategyKind::Concurrency);
        assert_eq!(config.policies["sliding"].kind(), StrategyKind::SlidingWindow);

        assert_eq!(config.guard.rejection_status_code, 429);
        assert_eq!(config.guard.partition_key, PartitionKeySource::RemoteAddr);
        assert_eq!(config.guard.routes.len(), 6);
        assert!(config
            .guard
            .routes
            .contains(&RouteConfig::new("POST", "/company", "sliding")));
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
policies:
  burst:
    strategy: token_bucket
    token_limit: 20
    replenishment_period_ms: 1000
    tokens_per_period: 5
partitions:
  idle_ttl_secs: 60
guard:
  rejection_status_code: 503
  partition_key:
    source: header
    name: X-Api-Key
  routes:
    - method: GET
      path: /widgets
      policy: burst
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.policies.len(), 1);
        assert_eq!(
            config.policies["burst"],
            PolicyOptions::TokenBucket(TokenBucketOptions::new(20, Duration::from_secs(1), 5))
        );
        assert_eq!(config.partitions.idle_ttl_secs, 60);
        assert_eq!(config.partitions.sweep_interval_secs, 30);
        assert_eq!(config.guard.rejection_status_code, 503);
        assert_eq!(
            config.guard.partition_key,
            PartitionKeySource::Header {
                name: "X-Api-Key".to_string()
            }
        );
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = TurnstileConfig::from_yaml("{}").unwrap();
        assert_eq!(config.policies, default_policies());
        assert_eq!(config.guard.routes, default_routes());
    }

    #[test]
    fn test_invalid_policy_names_offender() {
        let yaml = r#"
policies:
  broken:
    strategy: fixed_window
    permit_limit: 0
    window_ms: 1000
guard:
  routes: []
"#;
        let err = TurnstileConfig::from_yaml(yaml).unwrap_err();
        assert!(
            matches!(err, LimiterError::InvalidPolicy { ref policy, .. } if policy == "broken"),
            "unexpected error: {}",
            err
        );
    }

    #[test]
    fn test_route_to_unknown_policy_rejected() {
        let yaml = r#"
guard:
  routes:
    - method: GET
      path: /person
      policy: nope
"#;
        let err = TurnstileConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, LimiterError::UnknownRoutePolicy { .. }));
    }

    #[test]
    fn test_rejection_status_must_be_an_error_status() {
        let mut config = TurnstileConfig::default();
        config.guard.rejection_status_code = 200;
        assert!(matches!(config.validate(), Err(LimiterError::Config(_))));
    }

    #[test]
    fn test_from_file_with_env_override() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            r#"
policies:
  fixed:
    strategy: fixed_window
    permit_limit: 10
    window_ms: 10000
partitions:
  idle_ttl_secs: 120
guard:
  routes:
    - method: GET
      path: /person
      policy: fixed
"#
        )
        .unwrap();

        std::env::set_var("TURNSTILE__PARTITIONS__SWEEP_INTERVAL_SECS", "7");
        let config = TurnstileConfig::from_file(file.path());
        std::env::remove_var("TURNSTILE__PARTITIONS__SWEEP_INTERVAL_SECS");

        let config = config.unwrap();
        assert_eq!(
            config.policies["fixed"],
            PolicyOptions::FixedWindow(FixedWindowOptions::new(10, Duration::from_secs(10)))
        );
        assert_eq!(config.partitions.idle_ttl_secs, 120);
        assert_eq!(config.partitions.sweep_interval_secs, 7);
        assert_eq!(config.guard.routes.len(), 1);
    }

    #[test]
    fn test_sample_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/turnstile.yaml");
        let config = TurnstileConfig::from_yaml(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(config.policies, default_policies());
        assert_eq!(config.guard.routes, default_routes());
    }

    #[test]
    fn test_from_missing_file_fails() {
        let err = TurnstileConfig::from_file("/nonexistent/turnstile.yaml").unwrap_err();
        assert!(matches!(err, LimiterError::Config(_)));
    }
}
