//! Synthetic traffic driver.
//!
//! Fires requests from a pool of simulated clients at the configured routes
//! and tallies what the guard decided. Concurrency leases are held for a
//! random handler duration, the way a real request handler would hold them.

use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RouteConfig;
use crate::error::{LimiterError, Result};
use crate::guard::{Admission, RateLimitGuard, RequestInfo};

/// Shape of the simulated traffic.
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    /// Number of concurrent clients
    pub clients: usize,
    /// Requests each client sends
    pub requests_per_client: usize,
    /// Number of distinct source addresses the clients share
    pub addresses: usize,
    /// Upper bound on how long an admitted handler holds its lease
    pub max_hold: Duration,
    /// Upper bound on the pause between two requests of one client
    pub max_think: Duration,
    /// Seed for reproducible route and timing choices
    pub seed: Option<u64>,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            clients: 8,
            requests_per_client: 25,
            addresses: 2,
            max_hold: Duration::from_millis(200),
            max_think: Duration::from_millis(50),
            seed: None,
        }
    }
}

/// Outcome counts for one route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouteStats {
    pub policy: String,
    pub admitted: u64,
    pub rejected: u64,
    pub unlimited: u64,
}

impl RouteStats {
    fn record(&mut self, admission: &Admission) {
        match admission {
            Admission::Unlimited => self.unlimited += 1,
            Admission::Admitted { .. } => self.admitted += 1,
            Admission::Rejected(_) => self.rejected += 1,
        }
    }

    fn merge(&mut self, other: &RouteStats) {
        self.admitted += other.admitted;
        self.rejected += other.rejected;
        self.unlimited += other.unlimited;
    }

    pub fn total(&self) -> u64 {
        self.admitted + self.rejected + self.unlimited
    }
}

/// Summary of one simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub clients: usize,
    pub requests: u64,
    pub elapsed_ms: u64,
    /// Keyed by `METHOD /path`
    pub routes: BTreeMap<String, RouteStats>,
    /// Partitions alive when the run finished
    pub partitions: usize,
}

impl SimulationReport {
    pub fn admitted(&self) -> u64 {
        self.routes.values().map(|stats| stats.admitted).sum()
    }

    pub fn rejected(&self) -> u64 {
        self.routes.values().map(|stats| stats.rejected).sum()
    }
}

/// Drives simulated traffic through a guard.
pub struct Simulator {
    guard: Arc<RateLimitGuard>,
    routes: Vec<RouteConfig>,
    options: SimulationOptions,
}

impl Simulator {
    pub fn new(
        guard: Arc<RateLimitGuard>,
        routes: Vec<RouteConfig>,
        options: SimulationOptions,
    ) -> Result<Self> {
        if routes.is_empty() {
            return Err(LimiterError::Config(
                "simulation needs at least one route".to_string(),
            ));
        }
        if options.clients == 0 || options.addresses == 0 {
            return Err(LimiterError::Config(
                "simulation needs at least one client and one address".to_string(),
            ));
        }
        Ok(Self {
            guard,
            routes,
            options,
        })
    }

    /// Run every client to completion and wait for outstanding leases.
    pub async fn run(&self) -> Result<SimulationReport> {
        info!(
            clients = self.options.clients,
            requests_per_client = self.options.requests_per_client,
            addresses = self.options.addresses,
            "Starting simulation"
        );
        let started = Instant::now();

        let clients = (0..self.options.clients).map(|client| self.client(client));
        let mut routes: BTreeMap<String, RouteStats> = BTreeMap::new();
        let mut holders = Vec::new();
        for outcome in join_all(clients).await {
            let (stats, leases) = outcome?;
            for (route, client_stats) in stats {
                routes
                    .entry(route)
                    .or_insert_with(|| RouteStats {
                        policy: client_stats.policy.clone(),
                        ..Default::default()
                    })
                    .merge(&client_stats);
            }
            holders.extend(leases);
        }

        for result in join_all(holders).await {
            if let Err(e) = result {
                warn!(error = %e, "Lease holder task failed");
            }
        }

        let report = SimulationReport {
            clients: self.options.clients,
            requests: routes.values().map(RouteStats::total).sum(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            routes,
            partitions: self.guard.store().partition_count(),
        };
        info!(
            requests = report.requests,
            admitted = report.admitted(),
            rejected = report.rejected(),
            elapsed_ms = report.elapsed_ms,
            "Simulation complete"
        );
        Ok(report)
    }

    async fn client(
        &self,
        client: usize,
    ) -> Result<(BTreeMap<String, RouteStats>, Vec<JoinHandle<()>>)> {
        let mut rng = match self.options.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(client as u64)),
            None => StdRng::from_entropy(),
        };
        let addr = address(client % self.options.addresses);
        let mut stats: BTreeMap<String, RouteStats> = BTreeMap::new();
        let mut holders = Vec::new();

        for _ in 0..self.options.requests_per_client {
            let route = &self.routes[rng.gen_range(0..self.routes.len())];
            let request = RequestInfo::new(&route.method, &route.path).with_remote_addr(addr);
            let admission = self.guard.check(&request)?;

            let label = format!("{} {}", route.method.to_uppercase(), route.path);
            stats
                .entry(label)
                .or_insert_with(|| RouteStats {
                    policy: route.policy.clone(),
                    ..Default::default()
                })
                .record(&admission);

            if let Admission::Admitted { lease: Some(lease), .. } = admission {
                let hold = random_duration(&mut rng, self.options.max_hold);
                debug!(client = client, hold_ms = hold.as_millis() as u64, "Holding lease");
                holders.push(lease.release_when(tokio::time::sleep(hold)));
            }

            let think = random_duration(&mut rng, self.options.max_think);
            if !think.is_zero() {
                tokio::time::sleep(think).await;
            }
        }

        Ok((stats, holders))
    }
}

fn address(index: usize) -> IpAddr {
    let n = (index as u32).wrapping_add(1);
    IpAddr::V4(Ipv4Addr::new(10, (n >> 16) as u8, (n >> 8) as u8, n as u8))
}

fn random_duration(rng: &mut StdRng, max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rng.gen_range(0..=max_ms))
}
