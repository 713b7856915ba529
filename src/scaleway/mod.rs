//! Scaleway implementation of the cloud capabilities used by a backup run.
//!
//! Shares come from the File Storage API, key pairs from IAM, and rule sets,
//! servers and snapshots from the Instances API of the configured zone.

mod compute;
mod credential;
mod error;
mod http;
mod image;
mod keygen;
mod network;
mod shares;
mod snapshot;

use camino::Utf8PathBuf;
use scaleway_rs::ScalewayApi;

use crate::backend::{
    Backend, BackendFuture, ComputeBackend, CredentialBackend, IngressRule, InstanceStatus,
    KeyPair, LaunchRequest, NetworkAccessBackend, SharePage, ShareBackend, SnapshotBackend,
    SnapshotRecord,
};
use crate::command::ProcessCommandRunner;
use crate::config::ScalewayConfig;
use keygen::KeyGenerator;

pub use error::ScalewayBackendError;

const SSH_KEYGEN_BIN: &str = "ssh-keygen";

/// Tags attached to every resource a run creates.
pub(crate) fn resource_tags() -> Vec<String> {
    vec![String::from("sharesnap"), String::from("ephemeral")]
}

/// Backend driving the Scaleway APIs.
#[derive(Clone)]
pub struct ScalewayBackend {
    api: ScalewayApi,
    config: ScalewayConfig,
    keygen: KeyGenerator<ProcessCommandRunner>,
}

impl ScalewayBackend {
    /// Constructs a new backend from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayBackendError::Config`] when the provided configuration
    /// fails validation or the temp directory is not valid UTF-8.
    pub fn new(config: ScalewayConfig) -> Result<Self, ScalewayBackendError> {
        config.validate()?;
        let scratch_root = Utf8PathBuf::from_path_buf(std::env::temp_dir()).map_err(|path| {
            ScalewayBackendError::Config(format!(
                "temp directory {} is not valid UTF-8",
                path.display()
            ))
        })?;
        Ok(Self {
            api: ScalewayApi::new(&config.secret_key),
            keygen: KeyGenerator::new(SSH_KEYGEN_BIN, scratch_root, ProcessCommandRunner),
            config,
        })
    }

    /// Configuration the backend was built from.
    #[must_use]
    pub const fn config(&self) -> &ScalewayConfig {
        &self.config
    }
}

impl Backend for ScalewayBackend {
    type Error = ScalewayBackendError;
}

impl ShareBackend for ScalewayBackend {
    fn list_shares(&self, page: u32, page_size: u32) -> BackendFuture<'_, SharePage, Self::Error> {
        Box::pin(async move { self.fetch_share_page(page, page_size).await })
    }
}

impl CredentialBackend for ScalewayBackend {
    fn delete_key_pair<'a>(&'a self, name: &'a str) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move { self.remove_ssh_keys(name).await })
    }

    fn create_key_pair<'a>(&'a self, name: &'a str) -> BackendFuture<'a, KeyPair, Self::Error> {
        Box::pin(async move { self.register_ssh_key(name).await })
    }
}

impl NetworkAccessBackend for ScalewayBackend {
    fn create_rule_set<'a>(&'a self, name: &'a str) -> BackendFuture<'a, String, Self::Error> {
        Box::pin(async move { self.create_security_group(name).await })
    }

    fn add_ingress_rule<'a>(
        &'a self,
        rule_set_id: &'a str,
        rule: &'a IngressRule,
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move { self.add_security_group_rule(rule_set_id, rule).await })
    }

    fn delete_rule_set<'a>(&'a self, name: &'a str) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move { self.delete_security_groups(name).await })
    }

    fn find_rule_set<'a>(
        &'a self,
        name: &'a str,
    ) -> BackendFuture<'a, Option<String>, Self::Error> {
        Box::pin(async move { self.find_security_group(name).await })
    }
}

impl ComputeBackend for ScalewayBackend {
    fn launch<'a>(&'a self, request: &'a LaunchRequest) -> BackendFuture<'a, String, Self::Error> {
        Box::pin(async move { self.launch_server(request).await })
    }

    fn describe_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> BackendFuture<'a, InstanceStatus, Self::Error> {
        Box::pin(async move { self.describe_server(instance_id).await })
    }

    fn terminate<'a>(&'a self, instance_id: &'a str) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move { self.terminate_server(instance_id).await })
    }
}

impl SnapshotBackend for ScalewayBackend {
    fn create_snapshot<'a>(
        &'a self,
        volume_id: &'a str,
        description: &'a str,
    ) -> BackendFuture<'a, SnapshotRecord, Self::Error> {
        Box::pin(async move { self.snapshot_volume(volume_id, description).await })
    }
}
