//! Capability traits for the cloud services consumed by the backup workflow.
//!
//! Each service is a separate extension of [`Backend`] so test doubles and
//! providers can be composed freely. [`CloudBackend`] bundles all of them
//! and is implemented automatically.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Future returned by backend operations.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Classifies errors that are worth retrying (throttling, timeouts, 5xx).
pub trait TransientError {
    /// Returns `true` when repeating the call may succeed.
    fn is_transient(&self) -> bool;
}

/// Base trait shared by all cloud capabilities.
pub trait Backend {
    /// Provider specific error type returned by the backend.
    type Error: std::error::Error + TransientError + Send + Sync + 'static;
}

/// A network file share awaiting backup.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ShareVolume {
    /// Provider identifier of the share.
    pub id: String,
    /// Size reported by the provider, in bytes.
    pub size_bytes: u64,
}

impl ShareVolume {
    /// Creates a share description.
    #[must_use]
    pub fn new(id: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            id: id.into(),
            size_bytes,
        }
    }
}

/// One page of a share listing.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SharePage {
    /// Shares on this page.
    pub shares: Vec<ShareVolume>,
    /// Whether more pages follow.
    pub has_more: bool,
}

/// Paginated share listing.
pub trait ShareBackend: Backend {
    /// Fetches page `page` (starting at 1) holding at most `page_size` shares.
    fn list_shares(&self, page: u32, page_size: u32) -> BackendFuture<'_, SharePage, Self::Error>;
}

/// Key pair created by the credential service.
#[derive(Clone, Eq, PartialEq)]
pub struct KeyPair {
    /// Provider identifier of the registered key.
    pub id: String,
    /// Name the key was registered under.
    pub name: String,
    /// Private key material in OpenSSH format.
    pub private_key: Vec<u8>,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Named key pair management.
pub trait CredentialBackend: Backend {
    /// Deletes the key named `name`. A missing key is not an error.
    fn delete_key_pair<'a>(&'a self, name: &'a str) -> BackendFuture<'a, (), Self::Error>;

    /// Creates a key named `name` and returns its private material.
    fn create_key_pair<'a>(&'a self, name: &'a str) -> BackendFuture<'a, KeyPair, Self::Error>;
}

/// Transport protocol of an ingress rule.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Protocol {
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
}

impl Protocol {
    /// Upper-case protocol name as used by provider APIs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
        }
    }
}

/// A single inbound permission.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IngressRule {
    /// Protocol allowed.
    pub protocol: Protocol,
    /// Destination port allowed.
    pub port: u16,
    /// Source range in CIDR notation.
    pub source_range: String,
}

impl IngressRule {
    /// Rule allowing TCP on `port` from any IPv4 address.
    #[must_use]
    pub fn tcp_from_anywhere(port: u16) -> Self {
        Self {
            protocol: Protocol::Tcp,
            port,
            source_range: String::from("0.0.0.0/0"),
        }
    }
}

/// Rule-set (security group) management.
pub trait NetworkAccessBackend: Backend {
    /// Creates an empty rule set named `name` and returns its identifier.
    fn create_rule_set<'a>(&'a self, name: &'a str) -> BackendFuture<'a, String, Self::Error>;

    /// Adds an inbound rule to the rule set `rule_set_id`.
    fn add_ingress_rule<'a>(
        &'a self,
        rule_set_id: &'a str,
        rule: &'a IngressRule,
    ) -> BackendFuture<'a, (), Self::Error>;

    /// Deletes the rule set named `name`.
    fn delete_rule_set<'a>(&'a self, name: &'a str) -> BackendFuture<'a, (), Self::Error>;

    /// Returns the identifier of the rule set named `name`, if one exists.
    fn find_rule_set<'a>(&'a self, name: &'a str)
    -> BackendFuture<'a, Option<String>, Self::Error>;
}

/// Performance tier requested for a block device.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum VolumeTier {
    /// Standard (non-provisioned) performance.
    #[default]
    Standard,
}

/// Additional block device attached at launch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockDeviceSpec {
    /// Size in whole GiB.
    pub size_gb: u64,
    /// Whether the device is encrypted at rest.
    pub encrypted: bool,
    /// Whether the device is released together with the instance.
    pub delete_on_termination: bool,
    /// Performance tier.
    pub tier: VolumeTier,
}

impl BlockDeviceSpec {
    /// Unencrypted, standard tier device removed with its instance.
    #[must_use]
    pub const fn ephemeral(size_gb: u64) -> Self {
        Self {
            size_gb,
            encrypted: false,
            delete_on_termination: true,
            tier: VolumeTier::Standard,
        }
    }
}

/// Parameters for launching a single instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchRequest {
    /// Name given to the instance.
    pub name: String,
    /// Machine image identifier or label.
    pub image: String,
    /// Instance size class.
    pub instance_type: String,
    /// Extra block devices, attached in order after the root volume.
    pub block_devices: Vec<BlockDeviceSpec>,
    /// Name of the key pair allowed to log in.
    pub credential_name: String,
    /// Rule sets applied to the instance.
    pub network_access_ids: Vec<String>,
}

/// Lifecycle state reported for an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InstanceState {
    /// Booting.
    Pending,
    /// Running and reachable.
    Running,
    /// Stopping or being deleted.
    ShuttingDown,
    /// Stopped but still present.
    Stopped,
    /// Gone.
    Terminated,
    /// Any state the provider reports that is not modelled above.
    Other(String),
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Running => f.write_str("running"),
            Self::ShuttingDown => f.write_str("shutting-down"),
            Self::Stopped => f.write_str("stopped"),
            Self::Terminated => f.write_str("terminated"),
            Self::Other(state) => f.write_str(state),
        }
    }
}

/// Snapshot of an instance as described by the compute service.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceStatus {
    /// Current lifecycle state.
    pub state: InstanceState,
    /// Public address, once assigned.
    pub public_address: Option<String>,
    /// Volume identifiers in device-mapping order (root first).
    pub block_devices: Vec<String>,
}

/// Instance lifecycle management.
pub trait ComputeBackend: Backend {
    /// Launches one instance and returns its identifier.
    fn launch<'a>(&'a self, request: &'a LaunchRequest) -> BackendFuture<'a, String, Self::Error>;

    /// Describes the instance `instance_id`. Instances that no longer exist
    /// are reported as [`InstanceState::Terminated`].
    fn describe_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> BackendFuture<'a, InstanceStatus, Self::Error>;

    /// Requests termination of `instance_id`.
    fn terminate<'a>(&'a self, instance_id: &'a str) -> BackendFuture<'a, (), Self::Error>;
}

/// Result of a snapshot request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SnapshotRecord {
    /// Provider identifier of the snapshot.
    pub id: String,
    /// Description recorded with the snapshot.
    pub description: String,
    /// Provider state at creation time.
    pub state: String,
}

/// Point-in-time block volume snapshots.
pub trait SnapshotBackend: Backend {
    /// Snapshots `volume_id` with `description`.
    fn create_snapshot<'a>(
        &'a self,
        volume_id: &'a str,
        description: &'a str,
    ) -> BackendFuture<'a, SnapshotRecord, Self::Error>;
}

/// Every capability the backup workflow needs.
pub trait CloudBackend:
    ShareBackend + CredentialBackend + NetworkAccessBackend + ComputeBackend + SnapshotBackend
{
}

impl<T> CloudBackend for T where
    T: ShareBackend + CredentialBackend + NetworkAccessBackend + ComputeBackend + SnapshotBackend
{
}

/// Errors raised while validating backend requests.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum BackendError {
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
}

impl LaunchRequest {
    /// Validates the request, returning a descriptive error when a required
    /// field is missing.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Validation`] when any string field is empty or
    /// a block device has zero size.
    pub fn validate(&self) -> Result<(), BackendError> {
        if self.name.trim().is_empty() {
            return Err(BackendError::Validation("name".to_owned()));
        }
        if self.image.trim().is_empty() {
            return Err(BackendError::Validation("image".to_owned()));
        }
        if self.instance_type.trim().is_empty() {
            return Err(BackendError::Validation("instance_type".to_owned()));
        }
        if self.credential_name.trim().is_empty() {
            return Err(BackendError::Validation("credential_name".to_owned()));
        }
        if self.block_devices.iter().any(|device| device.size_gb == 0) {
            return Err(BackendError::Validation("block_devices.size_gb".to_owned()));
        }
        Ok(())
    }
}
