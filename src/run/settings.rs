//! Resolved workflow settings derived from configuration.

use std::time::Duration;

use crate::config::{BackupConfig, ScalewayConfig};
use crate::copy::{CopyLayout, CopySettings};
use crate::retry::RetryPolicy;

/// Upper bound on the delay between transient API retries, as a multiple of
/// the base delay.
const API_BACKOFF_CEILING_FACTOR: u32 = 8;

/// Everything the controller needs to process a share.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkflowSettings {
    /// Key pair rotated for every share.
    pub credential_name: String,
    /// Prefix of rule-set and instance names.
    pub name_prefix: String,
    /// Image for the copy instance.
    pub image: String,
    /// Size class of the copy instance.
    pub instance_type: String,
    /// Remote copy behaviour.
    pub copy: CopySettings,
    /// Delay between the copy finishing and the snapshot request.
    pub flush_delay: Duration,
    /// Retries for transient cloud errors.
    pub api_policy: RetryPolicy,
    /// Instance state polling.
    pub poll_policy: RetryPolicy,
    /// Shares fetched per listing call.
    pub share_page_size: u32,
    /// Maximum shares processed in one run.
    pub max_shares: u32,
}

impl WorkflowSettings {
    /// Builds settings from validated configuration.
    #[must_use]
    pub fn from_config(backup: &BackupConfig, scaleway: &ScalewayConfig) -> Self {
        let api_base = Duration::from_secs(backup.api_backoff_secs);
        let api_policy = RetryPolicy::exponential(backup.api_attempts, api_base)
            .with_max_delay(api_base.saturating_mul(API_BACKOFF_CEILING_FACTOR));
        let poll_policy = RetryPolicy::exponential(
            u32::MAX,
            Duration::from_secs(backup.poll_interval_secs.max(1)),
        )
        .with_max_delay(Duration::from_secs(backup.poll_max_interval_secs))
        .with_time_budget(Duration::from_secs(backup.instance_wait_timeout_secs));
        let connect_policy = RetryPolicy::exponential(
            backup.connect_attempts,
            Duration::from_secs(backup.connect_backoff_secs),
        )
        .with_max_delay(Duration::from_secs(backup.connect_max_backoff_secs));

        Self {
            credential_name: backup.credential_name.trim().to_owned(),
            name_prefix: backup.rule_set_prefix.trim().to_owned(),
            image: scaleway.default_image.clone(),
            instance_type: scaleway.default_instance_type.clone(),
            copy: CopySettings {
                user: backup.ssh_user.clone(),
                port: backup.ssh_port,
                warmup: backup.boot_warmup(),
                connect_policy,
                stop_on_critical_failure: backup.stop_on_critical_failure,
                layout: CopyLayout {
                    share_dns_suffix: backup.resolved_share_dns_suffix(),
                    block_device: backup.block_device.clone(),
                    filesystem_type: backup.filesystem_type.clone(),
                    share_mount_point: backup.share_mount_point.clone(),
                    snapshot_mount_point: backup.snapshot_mount_point.clone(),
                },
            },
            flush_delay: backup.flush_delay(),
            api_policy,
            poll_policy,
            share_page_size: backup.share_page_size,
            max_shares: backup.max_shares,
        }
    }
}
