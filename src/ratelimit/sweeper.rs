//! Background eviction of idle partitions.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::error::{LimiterError, Result};

use super::store::PartitionStore;

/// Handle to a running sweeper task.
#[derive(Debug)]
pub struct Sweeper {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn a task that sweeps `store` every `interval`.
    ///
    /// Must be called from within a tokio runtime. Fails on a zero interval.
    pub fn spawn(store: Arc<PartitionStore>, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(LimiterError::Config(
                "sweep interval must be greater than zero".to_string(),
            ));
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Starting partition sweeper");

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = store.sweep();
                        debug!(
                            evicted = evicted,
                            partitions = store.partition_count(),
                            "Sweeper pass complete"
                        );
                    }
                    _ = &mut shutdown_rx => {
                        info!("Partition sweeper stopped");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            shutdown: Some(shutdown_tx),
            task,
        })
    }

    /// Stop the sweeper and wait for the task to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        if self.shutdown.is_some() {
            self.task.abort();
        }
    }
}
