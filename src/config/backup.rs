//! Workflow settings for the backup run.
//!
//! Loaded via `ortho-config` from defaults, `sharesnap.toml` (or the file
//! named by `SHARESNAP_CONFIG_PATH`), and `SHARESNAP_*` environment
//! variables.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use super::{ConfigError, FieldMetadata, require_field};

/// Default name of the ephemeral key pair.
pub const DEFAULT_CREDENTIAL_NAME: &str = "sharesnap-ephemeral-key";

/// Default prefix of generated rule-set names.
pub const DEFAULT_RULE_SET_PREFIX: &str = "sharesnap-ephemeral";

const REGION_PLACEHOLDER: &str = "{region}";
const SECTION: &str = "sharesnap";

/// Settings controlling provisioning, the remote copy, and polling.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SHARESNAP",
    discovery(
        app_name = "sharesnap",
        env_var = "SHARESNAP_CONFIG_PATH",
        config_file_name = "sharesnap.toml",
        dotfile_name = ".sharesnap.toml",
        project_file_name = "sharesnap.toml"
    )
)]
pub struct BackupConfig {
    /// Name of the key pair rotated at the start of each share's workflow.
    #[ortho_config(default = DEFAULT_CREDENTIAL_NAME.to_owned())]
    pub credential_name: String,
    /// Directory receiving the private key file.
    #[ortho_config(default = ".".to_owned())]
    pub key_directory: String,
    /// Prefix for generated rule-set names.
    #[ortho_config(default = DEFAULT_RULE_SET_PREFIX.to_owned())]
    pub rule_set_prefix: String,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Remote user to connect as.
    #[ortho_config(default = "root".to_owned())]
    pub ssh_user: String,
    /// Remote SSH port, also the only port opened by the rule set.
    #[ortho_config(default = 22)]
    pub ssh_port: u16,
    /// Known hosts file override; defaults to `/dev/null` for ephemeral hosts.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub ssh_known_hosts_file: String,
    /// Region substituted into the share DNS suffix.
    #[ortho_config(default = "fr-par".to_owned())]
    pub share_region: String,
    /// DNS suffix appended to a share identifier to reach its NFS endpoint.
    /// `{region}` is replaced with `share_region`.
    ///
    /// There is no default. Scaleway File Storage is attached to servers over
    /// virtiofs and publishes no NFS name, so the suffix must name the NFS
    /// gateway that exports each share as `<share id>.<suffix>`.
    #[ortho_config(default = String::new())]
    pub share_dns_suffix: String,
    /// Device path of the attached block volume on the instance. Scaleway
    /// exposes the root volume as `/dev/sda` and the first extra block volume
    /// as `/dev/sdb`.
    #[ortho_config(default = "/dev/sdb".to_owned())]
    pub block_device: String,
    /// Filesystem created on the block volume.
    #[ortho_config(default = "ext4".to_owned())]
    pub filesystem_type: String,
    /// Remote directory the share is mounted on.
    #[ortho_config(default = "share".to_owned())]
    pub share_mount_point: String,
    /// Remote directory the block volume is mounted on.
    #[ortho_config(default = "snapshot".to_owned())]
    pub snapshot_mount_point: String,
    /// Seconds to wait after the instance reports running before the first
    /// SSH attempt.
    #[ortho_config(default = 30)]
    pub boot_warmup_secs: u64,
    /// Seconds to wait for the write cache to flush before snapshotting.
    #[ortho_config(default = 60)]
    pub flush_delay_secs: u64,
    /// Maximum SSH connection attempts.
    #[ortho_config(default = 8)]
    pub connect_attempts: u32,
    /// Initial delay between SSH connection attempts.
    #[ortho_config(default = 5)]
    pub connect_backoff_secs: u64,
    /// Ceiling for the SSH connection backoff.
    #[ortho_config(default = 60)]
    pub connect_max_backoff_secs: u64,
    /// Maximum attempts for cloud calls failing with transient errors.
    #[ortho_config(default = 5)]
    pub api_attempts: u32,
    /// Initial delay between transient cloud call retries.
    #[ortho_config(default = 2)]
    pub api_backoff_secs: u64,
    /// Initial interval between instance state polls.
    #[ortho_config(default = 5)]
    pub poll_interval_secs: u64,
    /// Ceiling for the instance state poll interval.
    #[ortho_config(default = 30)]
    pub poll_max_interval_secs: u64,
    /// Upper bound on waiting for an instance to run or terminate.
    #[ortho_config(default = 300)]
    pub instance_wait_timeout_secs: u64,
    /// Whether a failing critical copy step aborts the share's workflow.
    #[ortho_config(default = true)]
    pub stop_on_critical_failure: bool,
    /// Page size used when listing shares.
    #[ortho_config(default = 100)]
    pub share_page_size: u32,
    /// Maximum number of shares processed in one run.
    #[ortho_config(default = 1000)]
    pub max_shares: u32,
}

impl BackupConfig {
    /// Loads configuration using defaults, configuration files, and
    /// environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("sharesnap")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Ensures required values are present and numeric limits are usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for blank strings and
    /// [`ConfigError::InvalidValue`] for zero limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            (
                self.credential_name.as_str(),
                FieldMetadata::new(
                    "credential name",
                    "SHARESNAP_CREDENTIAL_NAME",
                    "credential_name",
                    SECTION,
                ),
            ),
            (
                self.key_directory.as_str(),
                FieldMetadata::new(
                    "key directory",
                    "SHARESNAP_KEY_DIRECTORY",
                    "key_directory",
                    SECTION,
                ),
            ),
            (
                self.rule_set_prefix.as_str(),
                FieldMetadata::new(
                    "rule-set prefix",
                    "SHARESNAP_RULE_SET_PREFIX",
                    "rule_set_prefix",
                    SECTION,
                ),
            ),
            (
                self.ssh_bin.as_str(),
                FieldMetadata::new(
                    "ssh binary",
                    "SHARESNAP_SSH_BIN",
                    "ssh_bin",
                    SECTION,
                ),
            ),
            (
                self.ssh_user.as_str(),
                FieldMetadata::new(
                    "ssh user",
                    "SHARESNAP_SSH_USER",
                    "ssh_user",
                    SECTION,
                ),
            ),
            (
                self.share_region.as_str(),
                FieldMetadata::new(
                    "share region",
                    "SHARESNAP_SHARE_REGION",
                    "share_region",
                    SECTION,
                ),
            ),
            (
                self.share_dns_suffix.as_str(),
                FieldMetadata::new(
                    "share DNS suffix",
                    "SHARESNAP_SHARE_DNS_SUFFIX",
                    "share_dns_suffix",
                    SECTION,
                ),
            ),
            (
                self.block_device.as_str(),
                FieldMetadata::new(
                    "block device path",
                    "SHARESNAP_BLOCK_DEVICE",
                    "block_device",
                    SECTION,
                ),
            ),
            (
                self.filesystem_type.as_str(),
                FieldMetadata::new(
                    "filesystem type",
                    "SHARESNAP_FILESYSTEM_TYPE",
                    "filesystem_type",
                    SECTION,
                ),
            ),
            (
                self.share_mount_point.as_str(),
                FieldMetadata::new(
                    "share mount point",
                    "SHARESNAP_SHARE_MOUNT_POINT",
                    "share_mount_point",
                    SECTION,
                ),
            ),
            (
                self.snapshot_mount_point.as_str(),
                FieldMetadata::new(
                    "snapshot mount point",
                    "SHARESNAP_SNAPSHOT_MOUNT_POINT",
                    "snapshot_mount_point",
                    SECTION,
                ),
            ),
        ];
        for (value, metadata) in &fields {
            require_field(value, metadata)?;
        }

        if self.share_mount_point.trim() == self.snapshot_mount_point.trim() {
            return Err(ConfigError::InvalidValue {
                field: String::from("snapshot_mount_point"),
                message: String::from("must differ from share_mount_point"),
            });
        }
        if self.ssh_port == 0 {
            return Err(Self::zero("ssh_port"));
        }
        if self.share_page_size == 0 {
            return Err(Self::zero("share_page_size"));
        }
        if self.max_shares == 0 {
            return Err(Self::zero("max_shares"));
        }
        Ok(())
    }

    /// NFS endpoint suffix with the region substituted.
    #[must_use]
    pub fn resolved_share_dns_suffix(&self) -> String {
        self.share_dns_suffix
            .trim()
            .trim_start_matches('.')
            .replace(REGION_PLACEHOLDER, self.share_region.trim())
    }

    /// Delay before the first SSH attempt.
    #[must_use]
    pub const fn boot_warmup(&self) -> Duration {
        Duration::from_secs(self.boot_warmup_secs)
    }

    /// Delay before requesting the snapshot.
    #[must_use]
    pub const fn flush_delay(&self) -> Duration {
        Duration::from_secs(self.flush_delay_secs)
    }

    fn zero(field: &str) -> ConfigError {
        ConfigError::InvalidValue {
            field: field.to_owned(),
            message: String::from("must be greater than zero"),
        }
    }
}
