//! Scoped concurrency permits.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::error::{LimiterError, Result};

use super::partition::{Partition, PartitionId};

/// A concurrency permit held by one request.
///
/// The permit goes back to its partition when [`release`](Self::release) is
/// called or, failing that, when the handle is dropped, so every exit path of
/// the protected operation (including `?` and panics) returns it. The handle
/// is `Send` and may be released from a different thread or task than the
/// one that acquired it.
#[must_use = "dropping a lease immediately releases the permit"]
pub struct LeaseHandle {
    partition: Arc<Partition>,
    released: bool,
}

impl LeaseHandle {
    pub(crate) fn new(partition: Arc<Partition>) -> Self {
        Self {
            partition,
            released: false,
        }
    }

    /// The partition this lease was taken from.
    pub fn partition(&self) -> &PartitionId {
        self.partition.id()
    }

    /// Whether the permit has already been returned.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Return the permit to its partition.
    ///
    /// Calling this a second time is a caller bug: it is logged, reported as
    /// [`LimiterError::LeaseAlreadyReleased`] and leaves the partition's
    /// in-flight count untouched.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            warn!(partition = %self.partition.id(), "Lease released twice");
            return Err(LimiterError::LeaseAlreadyReleased(
                self.partition.id().to_string(),
            ));
        }

        self.released = true;
        trace!(partition = %self.partition.id(), "Releasing lease");
        self.partition.release_lease()
    }

    /// Release the lease once `signal` completes.
    ///
    /// Meant for request contexts that expose an explicit cancellation
    /// future: the permit is reclaimed even if the request task is gone.
    /// Must be called from within a tokio runtime.
    pub fn release_when<F>(self, signal: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            signal.await;
            let mut lease = self;
            if let Err(e) = lease.release() {
                warn!(error = %e, "Failed to release lease on cancellation");
            }
        })
    }
}

impl Drop for LeaseHandle {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.release() {
                warn!(error = %e, "Failed to release lease on drop");
            }
        }
    }
}

impl fmt::Debug for LeaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseHandle")
            .field("partition", self.partition.id())
            .field("released", &self.released)
            .finish()
    }
}
