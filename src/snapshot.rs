//! Snapshotting the block volume that received the share copy.

use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::info;

use crate::backend::{SnapshotBackend, SnapshotRecord};
use crate::compute::ComputeInstance;
use crate::retry::{RetryPolicy, retry_transient};

/// Position of the copy volume in the instance's device mapping.
const DATA_DEVICE_INDEX: usize = 1;

/// Errors raised while snapshotting.
#[derive(Debug, Error)]
pub enum SnapshotError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the instance has no second device mapping entry.
    #[error("instance {instance_id} has no data volume in its device mapping")]
    MissingDeviceMapping {
        /// Instance inspected.
        instance_id: String,
    },
    /// Raised when the provider refuses the snapshot.
    #[error("failed to snapshot volume {volume_id}: {source}")]
    Create {
        /// Volume being snapshotted.
        volume_id: String,
        /// Provider error.
        #[source]
        source: E,
    },
}

/// Description recorded on the snapshot of `share_id`.
#[must_use]
pub fn snapshot_description(share_id: &str) -> String {
    format!("Snapshot of share volume {share_id}")
}

/// Waits for buffered writes to settle and snapshots the data volume.
#[derive(Debug)]
pub struct SnapshotOrchestrator<'a, B> {
    backend: &'a B,
    flush_delay: Duration,
    api_policy: RetryPolicy,
}

impl<'a, B: SnapshotBackend> SnapshotOrchestrator<'a, B> {
    /// Creates an orchestrator waiting `flush_delay` before each snapshot.
    #[must_use]
    pub const fn new(backend: &'a B, flush_delay: Duration, api_policy: RetryPolicy) -> Self {
        Self {
            backend,
            flush_delay,
            api_policy,
        }
    }

    /// Snapshots the data volume of `instance`, describing it with `share_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::MissingDeviceMapping`] before waiting when
    /// the instance has no data volume, and [`SnapshotError::Create`] when
    /// the provider call fails.
    pub async fn snapshot(
        &self,
        instance: &ComputeInstance,
        share_id: &str,
    ) -> Result<SnapshotRecord, SnapshotError<B::Error>> {
        let volume_id = instance
            .block_devices
            .get(DATA_DEVICE_INDEX)
            .ok_or_else(|| SnapshotError::MissingDeviceMapping {
                instance_id: instance.id.clone(),
            })?;

        if !self.flush_delay.is_zero() {
            info!(
                volume_id = %volume_id,
                delay_secs = self.flush_delay.as_secs(),
                "waiting for write cache to flush"
            );
            sleep(self.flush_delay).await;
        }

        let description = snapshot_description(share_id);
        let record = retry_transient(&self.api_policy, "create_snapshot", || {
            self.backend.create_snapshot(volume_id, &description)
        })
        .await
        .map_err(|source| SnapshotError::Create {
            volume_id: volume_id.clone(),
            source,
        })?;

        info!(
            snapshot_id = %record.id,
            volume_id = %volume_id,
            state = %record.state,
            share_id,
            "snapshot requested"
        );
        Ok(record)
    }
}
