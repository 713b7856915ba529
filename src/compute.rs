//! Launching the copy instance and waiting on its lifecycle.
//!
//! Each instance carries exactly one extra block volume sized to hold the
//! share. Waiting is condition polling driven by a [`RetryPolicy`] so both
//! the interval growth and the overall timeout are bounded.

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::backend::{
    BackendError, BlockDeviceSpec, ComputeBackend, InstanceState, InstanceStatus, LaunchRequest,
    TransientError,
};
use crate::retry::{RetryPolicy, retry_transient};

/// What to launch for one share.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchConfig {
    /// Instance name.
    pub name: String,
    /// Image identifier or label.
    pub image: String,
    /// Instance size class.
    pub instance_type: String,
    /// Size of the extra block volume in whole GiB.
    pub volume_size_gb: u64,
    /// Key pair allowed to log in.
    pub credential_name: String,
    /// Rule set applied to the instance.
    pub network_access_id: String,
}

impl LaunchConfig {
    fn to_request(&self) -> LaunchRequest {
        LaunchRequest {
            name: self.name.clone(),
            image: self.image.clone(),
            instance_type: self.instance_type.clone(),
            block_devices: vec![BlockDeviceSpec::ephemeral(self.volume_size_gb)],
            credential_name: self.credential_name.clone(),
            network_access_ids: vec![self.network_access_id.clone()],
        }
    }
}

/// A running copy instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ComputeInstance {
    /// Provider identifier.
    pub id: String,
    /// Public address used for the remote session.
    pub public_address: String,
    /// Volume identifiers in device-mapping order (root first).
    pub block_devices: Vec<String>,
}

/// Errors raised while launching, waiting on, or terminating instances.
#[derive(Debug, Error)]
pub enum ComputeError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the launch request is incomplete.
    #[error("invalid launch request: {0}")]
    InvalidRequest(#[from] BackendError),
    /// Raised when the provider rejects the launch.
    #[error("failed to launch instance: {0}")]
    Launch(#[source] E),
    /// Raised when describing the instance fails with a non-transient error.
    #[error("failed to describe instance {instance_id}: {source}")]
    Describe {
        /// Instance being described.
        instance_id: String,
        /// Provider error.
        #[source]
        source: E,
    },
    /// Raised when the instance enters a state it cannot leave towards the
    /// awaited one.
    #[error("instance {instance_id} entered state {state} while waiting for {awaited}")]
    UnexpectedState {
        /// Instance being awaited.
        instance_id: String,
        /// State observed.
        state: InstanceState,
        /// State awaited.
        awaited: InstanceState,
    },
    /// Raised when the polling policy is exhausted.
    #[error("instance {instance_id} did not reach {awaited} after {attempts} checks")]
    Timeout {
        /// Instance being awaited.
        instance_id: String,
        /// State awaited.
        awaited: InstanceState,
        /// Number of describe calls made.
        attempts: u32,
    },
    /// Raised when the termination request fails.
    #[error("failed to terminate instance {instance_id}: {source}")]
    Terminate {
        /// Instance being terminated.
        instance_id: String,
        /// Provider error.
        #[source]
        source: E,
    },
}

impl<E: std::error::Error + 'static> ComputeError<E> {
    /// Identifier of an instance that exists despite the error.
    #[must_use]
    pub fn instance_id(&self) -> Option<&str> {
        match self {
            Self::InvalidRequest(_) | Self::Launch(_) => None,
            Self::Describe { instance_id, .. }
            | Self::UnexpectedState { instance_id, .. }
            | Self::Timeout { instance_id, .. }
            | Self::Terminate { instance_id, .. } => Some(instance_id),
        }
    }
}

/// Launches, awaits and terminates copy instances.
#[derive(Debug)]
pub struct ComputeProvisioner<'a, B> {
    backend: &'a B,
    poll_policy: RetryPolicy,
    api_policy: RetryPolicy,
}

impl<'a, B: ComputeBackend> ComputeProvisioner<'a, B> {
    /// Creates a provisioner polling with `poll_policy`.
    #[must_use]
    pub const fn new(backend: &'a B, poll_policy: RetryPolicy, api_policy: RetryPolicy) -> Self {
        Self {
            backend,
            poll_policy,
            api_policy,
        }
    }

    /// Launches one instance with one extra block volume and blocks until it
    /// runs with a public address.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError`] when the launch fails or the instance does
    /// not become ready. [`ComputeError::instance_id`] names the launched
    /// instance when one exists.
    pub async fn launch(
        &self,
        config: &LaunchConfig,
    ) -> Result<ComputeInstance, ComputeError<B::Error>> {
        let request = config.to_request();
        request.validate()?;

        // Launch is not idempotent; a retry could leave a second instance.
        let instance_id = self
            .backend
            .launch(&request)
            .await
            .map_err(ComputeError::Launch)?;
        info!(
            instance_id = %instance_id,
            name = %config.name,
            volume_size_gb = config.volume_size_gb,
            "instance launched"
        );

        self.wait_until_running(&instance_id).await
    }

    /// Polls until `instance_id` is running with a public address.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError`] when the instance fails, stops, or the
    /// polling policy is exhausted.
    pub async fn wait_until_running(
        &self,
        instance_id: &str,
    ) -> Result<ComputeInstance, ComputeError<B::Error>> {
        let status = self
            .poll(instance_id, &InstanceState::Running, |status| {
                status.state == InstanceState::Running && status.public_address.is_some()
            })
            .await?;
        let public_address = status.public_address.unwrap_or_default();
        info!(instance_id, address = %public_address, "instance running");
        Ok(ComputeInstance {
            id: instance_id.to_owned(),
            public_address,
            block_devices: status.block_devices,
        })
    }

    /// Requests termination and polls until the instance is gone.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::Terminate`] when the request fails and a
    /// polling error when termination is not observed in time.
    pub async fn terminate(&self, instance_id: &str) -> Result<(), ComputeError<B::Error>> {
        retry_transient(&self.api_policy, "terminate_instance", || {
            self.backend.terminate(instance_id)
        })
        .await
        .map_err(|source| ComputeError::Terminate {
            instance_id: instance_id.to_owned(),
            source,
        })?;

        self.poll(instance_id, &InstanceState::Terminated, |status| {
            status.state == InstanceState::Terminated
        })
        .await?;
        info!(instance_id, "instance terminated");
        Ok(())
    }

    async fn poll(
        &self,
        instance_id: &str,
        awaited: &InstanceState,
        reached: impl Fn(&InstanceStatus) -> bool,
    ) -> Result<InstanceStatus, ComputeError<B::Error>> {
        let mut handle = self.poll_policy.handle();
        loop {
            match self.backend.describe_instance(instance_id).await {
                Ok(status) if reached(&status) => return Ok(status),
                Ok(status) => {
                    if is_dead_end(&status.state, awaited) {
                        return Err(ComputeError::UnexpectedState {
                            instance_id: instance_id.to_owned(),
                            state: status.state,
                            awaited: awaited.clone(),
                        });
                    }
                    debug!(
                        instance_id,
                        state = %status.state,
                        awaited = %awaited,
                        "waiting for instance"
                    );
                }
                Err(err) if err.is_transient() => {
                    warn!(instance_id, error = %err, "transient error describing instance");
                }
                Err(source) => {
                    return Err(ComputeError::Describe {
                        instance_id: instance_id.to_owned(),
                        source,
                    });
                }
            }

            let Some(delay) = handle.next_delay() else {
                return Err(ComputeError::Timeout {
                    instance_id: instance_id.to_owned(),
                    awaited: awaited.clone(),
                    attempts: handle.attempts(),
                });
            };
            sleep(delay).await;
        }
    }
}

fn is_dead_end(state: &InstanceState, awaited: &InstanceState) -> bool {
    match awaited {
        InstanceState::Running => matches!(
            state,
            InstanceState::ShuttingDown | InstanceState::Stopped | InstanceState::Terminated
        ),
        _ => false,
    }
}
