//! Release of everything a share's workflow acquired.
//!
//! Every acquisition is recorded in [`AcquiredResources`] as soon as it
//! succeeds. Teardown attempts every release step for the recorded resources
//! and aggregates failures instead of stopping at the first one.

use std::fmt;

use tracing::{info, warn};

use crate::backend::{ComputeBackend, CredentialBackend, NetworkAccessBackend};
use crate::compute::ComputeProvisioner;
use crate::credential::CredentialHandle;
use crate::keystore::KeyStore;
use crate::network::{NetworkAccessHandle, release_rule_set};
use crate::retry::{RetryPolicy, retry_transient};

/// Resources acquired so far for one share.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AcquiredResources {
    /// Key pair and local key file.
    pub credential: Option<CredentialHandle>,
    /// Rule set.
    pub network: Option<NetworkAccessHandle>,
    /// Launched instance.
    pub instance_id: Option<String>,
}

/// A single release step.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TeardownStep {
    /// Terminate the instance and wait until it is gone.
    TerminateInstance,
    /// Delete the rule set by name.
    DeleteRuleSet,
    /// Delete the key pair from the provider.
    DeleteCredential,
    /// Delete the local private key file.
    DeleteKeyFile,
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TerminateInstance => "terminate instance",
            Self::DeleteRuleSet => "delete rule set",
            Self::DeleteCredential => "delete key pair",
            Self::DeleteKeyFile => "delete key file",
        })
    }
}

/// A release step that failed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TeardownFailure {
    /// Step that failed.
    pub step: TeardownStep,
    /// Resource the step targeted.
    pub resource: String,
    /// Error text.
    pub message: String,
}

impl fmt::Display for TeardownFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.step, self.resource, self.message)
    }
}

/// Outcome of a teardown.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TeardownReport {
    /// Steps attempted, in order.
    pub attempted: Vec<TeardownStep>,
    /// Steps that failed.
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    /// Whether every attempted step succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record<E: fmt::Display>(
        &mut self,
        step: TeardownStep,
        resource: &str,
        result: Result<(), E>,
    ) {
        self.attempted.push(step);
        match result {
            Ok(()) => info!(%step, resource, "released"),
            Err(err) => {
                warn!(%step, resource, error = %err, "release failed");
                self.failures.push(TeardownFailure {
                    step,
                    resource: resource.to_owned(),
                    message: err.to_string(),
                });
            }
        }
    }
}

/// Releases acquired resources in dependency order.
#[derive(Debug)]
pub struct TeardownOrchestrator<'a, B, K> {
    backend: &'a B,
    key_store: &'a K,
    compute: ComputeProvisioner<'a, B>,
    api_policy: RetryPolicy,
}

impl<'a, B, K> TeardownOrchestrator<'a, B, K>
where
    B: ComputeBackend + NetworkAccessBackend + CredentialBackend,
    K: KeyStore,
{
    /// Creates an orchestrator; `poll_policy` bounds the wait for
    /// termination.
    #[must_use]
    pub const fn new(
        backend: &'a B,
        key_store: &'a K,
        poll_policy: RetryPolicy,
        api_policy: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            key_store,
            compute: ComputeProvisioner::new(backend, poll_policy, api_policy),
            api_policy,
        }
    }

    /// Releases every resource in `resources`.
    ///
    /// The instance goes first because rule sets cannot be removed while
    /// attached. Each step runs whether or not the earlier ones failed.
    pub async fn teardown(&self, resources: &AcquiredResources) -> TeardownReport {
        let mut report = TeardownReport::default();

        if let Some(instance_id) = &resources.instance_id {
            let result = self.compute.terminate(instance_id).await;
            report.record(TeardownStep::TerminateInstance, instance_id, result);
        }

        if let Some(network) = &resources.network {
            let result = release_rule_set(self.backend, &network.name, &self.api_policy).await;
            report.record(TeardownStep::DeleteRuleSet, &network.name, result);
        }

        if let Some(credential) = &resources.credential {
            let result = retry_transient(&self.api_policy, "delete_key_pair", || {
                self.backend.delete_key_pair(&credential.name)
            })
            .await;
            report.record(TeardownStep::DeleteCredential, &credential.name, result);

            let result = self
                .key_store
                .delete_private_key(&credential.private_key_path);
            report.record(
                TeardownStep::DeleteKeyFile,
                credential.private_key_path.as_str(),
                result,
            );
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::DirKeyStore;
    use crate::test_support::{CloudCall, FakeCloud, FaultKind, Operation};
    use camino::Utf8PathBuf;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct Harness {
        _tmp: TempDir,
        cloud: FakeCloud,
        store: DirKeyStore,
        resources: AcquiredResources,
    }

    #[fixture]
    async fn harness() -> Harness {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("non-utf8 tempdir: {}", path.display()));
        let store = DirKeyStore::new(&root).unwrap_or_else(|err| panic!("key store: {err}"));
        let cloud = FakeCloud::new();
        let resources = cloud.acquire_all(&store).await;
        Harness {
            _tmp: tmp,
            cloud,
            store,
            resources,
        }
    }

    fn orchestrator(harness: &Harness) -> TeardownOrchestrator<'_, FakeCloud, DirKeyStore> {
        TeardownOrchestrator::new(
            &harness.cloud,
            &harness.store,
            RetryPolicy::immediate(5),
            RetryPolicy::immediate(1),
        )
    }

    #[rstest]
    #[tokio::test]
    async fn releases_everything_in_order(#[future] harness: Harness) {
        let harness = harness.await;
        harness.cloud.clear_calls();

        let report = orchestrator(&harness).teardown(&harness.resources).await;

        assert!(report.is_clean(), "failures: {:?}", report.failures);
        assert_eq!(
            report.attempted,
            vec![
                TeardownStep::TerminateInstance,
                TeardownStep::DeleteRuleSet,
                TeardownStep::DeleteCredential,
                TeardownStep::DeleteKeyFile,
            ]
        );
        assert!(harness.cloud.live_rule_sets().is_empty());
        assert!(harness.cloud.live_key_pairs().is_empty());
        let key_path = harness
            .resources
            .credential
            .as_ref()
            .map(|credential| credential.private_key_path.clone())
            .expect("credential acquired");
        assert!(!key_path.exists());
    }

    #[rstest]
    #[case::terminate(Operation::Terminate, TeardownStep::TerminateInstance)]
    #[case::rule_set(Operation::DeleteRuleSet, TeardownStep::DeleteRuleSet)]
    #[case::credential(Operation::DeleteKeyPair, TeardownStep::DeleteCredential)]
    #[tokio::test]
    async fn a_failing_step_does_not_skip_the_others(
        #[future] harness: Harness,
        #[case] operation: Operation,
        #[case] failing: TeardownStep,
    ) {
        let harness = harness.await;
        harness.cloud.fail_next(operation, FaultKind::Fatal);

        let report = orchestrator(&harness).teardown(&harness.resources).await;

        assert_eq!(report.attempted.len(), 4);
        let failed: Vec<TeardownStep> = report.failures.iter().map(|f| f.step).collect();
        assert_eq!(failed, vec![failing]);
    }

    #[rstest]
    #[tokio::test]
    async fn key_file_failure_is_reported(#[future] harness: Harness) {
        let mut harness = harness.await;
        if let Some(credential) = harness.resources.credential.as_mut() {
            credential.private_key_path = Utf8PathBuf::from("/outside/the/store.pem");
        }

        let report = orchestrator(&harness).teardown(&harness.resources).await;

        let failed: Vec<TeardownStep> = report.failures.iter().map(|f| f.step).collect();
        assert_eq!(failed, vec![TeardownStep::DeleteKeyFile]);
        assert_eq!(report.attempted.len(), 4);
    }

    #[rstest]
    #[tokio::test]
    async fn only_recorded_resources_are_released(#[future] harness: Harness) {
        let harness = harness.await;
        harness.cloud.clear_calls();
        let partial = AcquiredResources {
            instance_id: None,
            ..harness.resources.clone()
        };

        let report = orchestrator(&harness).teardown(&partial).await;

        assert!(!report.attempted.contains(&TeardownStep::TerminateInstance));
        assert!(
            !harness
                .cloud
                .calls()
                .iter()
                .any(|call| matches!(call, CloudCall::Terminate(_)))
        );
    }

    #[rstest]
    #[tokio::test]
    async fn lost_rule_set_deletion_is_not_a_leftover(#[future] harness: Harness) {
        let harness = harness.await;
        harness
            .cloud
            .fail_next(Operation::DeleteRuleSet, FaultKind::LostResponse);
        let orchestrator = TeardownOrchestrator::new(
            &harness.cloud,
            &harness.store,
            RetryPolicy::immediate(5),
            RetryPolicy::immediate(3),
        );

        let report = orchestrator.teardown(&harness.resources).await;

        assert!(report.is_clean(), "failures: {:?}", report.failures);
        assert!(harness.cloud.live_rule_sets().is_empty());
    }

    #[tokio::test]
    async fn empty_resources_release_nothing() {
        let cloud = FakeCloud::new();
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("non-utf8 tempdir: {}", path.display()));
        let store = DirKeyStore::new(&root).unwrap_or_else(|err| panic!("key store: {err}"));
        let orchestrator = TeardownOrchestrator::new(
            &cloud,
            &store,
            RetryPolicy::immediate(1),
            RetryPolicy::immediate(1),
        );

        let report = orchestrator.teardown(&AcquiredResources::default()).await;

        assert!(report.attempted.is_empty());
        assert!(cloud.calls().is_empty());
    }
}
