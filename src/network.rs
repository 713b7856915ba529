//! Per-attempt rule sets admitting SSH from anywhere.

use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::backend::{IngressRule, NetworkAccessBackend, TransientError};
use crate::retry::{RetryPolicy, retry_transient};

/// A created rule set.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NetworkAccessHandle {
    /// Provider identifier.
    pub id: String,
    /// Unique name; deletion is by name.
    pub name: String,
}

/// Errors raised while provisioning a rule set.
#[derive(Debug, Error)]
pub enum NetworkAccessError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the rule set cannot be created.
    #[error("failed to create rule set {name}: {source}")]
    Create {
        /// Requested name.
        name: String,
        /// Provider error.
        #[source]
        source: E,
    },
    /// Raised when the SSH rule cannot be added. The rule set exists and is
    /// returned so the caller can release it.
    #[error("failed to add SSH rule to rule set {}: {source}", .handle.name)]
    AddRule {
        /// The rule set that was created.
        handle: NetworkAccessHandle,
        /// Provider error.
        #[source]
        source: E,
    },
}

/// Builds the rule-set name for attempt `run_index`.
#[must_use]
pub fn rule_set_name(prefix: &str, run_token: &str, run_index: u64) -> String {
    format!("{prefix}-{run_token}-{run_index}")
}

/// Creates rule sets named after the prefix, run token and attempt index.
#[derive(Debug)]
pub struct NetworkAccessProvisioner<'a, B> {
    backend: &'a B,
    prefix: &'a str,
    run_token: &'a str,
    ssh_port: u16,
    api_policy: RetryPolicy,
}

impl<'a, B: NetworkAccessBackend> NetworkAccessProvisioner<'a, B> {
    /// Creates a provisioner opening `ssh_port`.
    #[must_use]
    pub const fn new(
        backend: &'a B,
        prefix: &'a str,
        run_token: &'a str,
        ssh_port: u16,
        api_policy: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            prefix,
            run_token,
            ssh_port,
            api_policy,
        }
    }

    /// Creates the rule set for `run_index` and adds the SSH ingress rule.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkAccessError`] when either call fails. A rule set that
    /// was created before the failure is carried in
    /// [`NetworkAccessError::AddRule`]. After a transient create failure the
    /// rule set is looked up by name, so one created by a call whose response
    /// was lost is adopted instead of duplicated.
    pub async fn provision(
        &self,
        run_index: u64,
    ) -> Result<NetworkAccessHandle, NetworkAccessError<B::Error>> {
        let name = rule_set_name(self.prefix, self.run_token, run_index);
        let id = self
            .create_or_adopt(&name)
            .await
            .map_err(|source| NetworkAccessError::Create {
                name: name.clone(),
                source,
            })?;
        let handle = NetworkAccessHandle { id, name };

        let rule = IngressRule::tcp_from_anywhere(self.ssh_port);
        if let Err(source) = retry_transient(&self.api_policy, "add_ingress_rule", || {
            self.backend.add_ingress_rule(&handle.id, &rule)
        })
        .await
        {
            return Err(NetworkAccessError::AddRule { handle, source });
        }

        info!(name = %handle.name, id = %handle.id, port = self.ssh_port, "rule set provisioned");
        Ok(handle)
    }

    async fn create_or_adopt(&self, name: &str) -> Result<String, B::Error> {
        let mut retries = self.api_policy.handle();
        let mut interrupted = false;
        loop {
            let err = match self.backend.create_rule_set(name).await {
                Ok(id) => return Ok(id),
                Err(err) => err,
            };
            let transient = err.is_transient();
            let adopted = if transient || interrupted {
                lookup(self.backend, name).await
            } else {
                None
            };
            if let Some(id) = adopted {
                info!(name, id = %id, "adopted rule set created by an interrupted call");
                return Ok(id);
            }
            if !transient {
                return Err(err);
            }
            interrupted = true;
            let Some(delay) = retries.next_delay() else {
                return Err(err);
            };
            warn!(
                name,
                attempt = retries.attempts(),
                error = %err,
                "rule set creation interrupted, retrying"
            );
            sleep(delay).await;
        }
    }
}

/// Deletes the rule set named `name`, retrying transient failures.
///
/// A deletion whose response was lost is confirmed by looking the name up:
/// once it is gone the release counts as done, even if a retry reports that
/// nothing matched.
///
/// # Errors
///
/// Returns the last provider error when the rule set still exists or its
/// state cannot be confirmed.
pub async fn release_rule_set<B: NetworkAccessBackend>(
    backend: &B,
    name: &str,
    policy: &RetryPolicy,
) -> Result<(), B::Error> {
    let mut retries = policy.handle();
    let mut interrupted = false;
    loop {
        let err = match backend.delete_rule_set(name).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };
        let transient = err.is_transient();
        if (transient || interrupted) && backend.find_rule_set(name).await.ok() == Some(None) {
            info!(name, "rule set already gone");
            return Ok(());
        }
        if !transient {
            return Err(err);
        }
        interrupted = true;
        let Some(delay) = retries.next_delay() else {
            return Err(err);
        };
        warn!(
            name,
            attempt = retries.attempts(),
            error = %err,
            "rule set deletion interrupted, retrying"
        );
        sleep(delay).await;
    }
}

async fn lookup<B: NetworkAccessBackend>(backend: &B, name: &str) -> Option<String> {
    match backend.find_rule_set(name).await {
        Ok(found) => found,
        Err(err) => {
            warn!(name, error = %err, "rule set lookup failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::backend::Protocol;
    use crate::test_support::{CloudCall, FakeCloud, FaultKind, Operation};
    use rstest::rstest;

    #[tokio::test]
    async fn provision_opens_only_the_ssh_port() {
        let cloud = FakeCloud::new();
        let provisioner = NetworkAccessProvisioner::new(
            &cloud,
            "backup",
            "run1",
            2222,
            RetryPolicy::immediate(1),
        );

        let handle = provisioner.provision(4).await.expect("provision");

        assert_eq!(handle.name, "backup-run1-4");
        let rules = cloud.rules_for(&handle.id);
        assert_eq!(
            rules,
            vec![IngressRule {
                protocol: Protocol::Tcp,
                port: 2222,
                source_range: String::from("0.0.0.0/0"),
            }]
        );
    }

    #[tokio::test]
    async fn sequential_runs_produce_distinct_names() {
        let cloud = FakeCloud::new();
        let provisioner =
            NetworkAccessProvisioner::new(&cloud, "backup", "run1", 22, RetryPolicy::immediate(1));

        let mut names = BTreeSet::new();
        for index in 0..25 {
            let handle = provisioner.provision(index).await.expect("provision");
            assert!(names.insert(handle.name), "duplicate rule-set name");
        }
        assert_eq!(names.len(), 25);
    }

    #[tokio::test]
    async fn rule_failure_returns_the_created_rule_set() {
        let cloud = FakeCloud::new();
        cloud.fail_next(Operation::AddIngressRule, FaultKind::Fatal);
        let provisioner =
            NetworkAccessProvisioner::new(&cloud, "backup", "run1", 22, RetryPolicy::immediate(1));

        let err = provisioner.provision(0).await.expect_err("rule fails");

        let NetworkAccessError::AddRule { handle, .. } = err else {
            panic!("expected AddRule error, got {err:?}");
        };
        assert_eq!(handle.name, "backup-run1-0");
        assert!(cloud.live_rule_sets().contains(&handle.name));
    }

    #[tokio::test]
    async fn create_failure_adds_no_rules() {
        let cloud = FakeCloud::new();
        cloud.fail_next(Operation::CreateRuleSet, FaultKind::Fatal);
        let provisioner =
            NetworkAccessProvisioner::new(&cloud, "backup", "run1", 22, RetryPolicy::immediate(1));

        assert!(matches!(
            provisioner.provision(0).await,
            Err(NetworkAccessError::Create { .. })
        ));
        assert!(
            !cloud
                .calls()
                .iter()
                .any(|call| matches!(call, CloudCall::AddIngressRule { .. }))
        );
    }

    #[tokio::test]
    async fn lost_create_response_adopts_the_rule_set() {
        let cloud = FakeCloud::new();
        cloud.fail_next(Operation::CreateRuleSet, FaultKind::LostResponse);
        let provisioner =
            NetworkAccessProvisioner::new(&cloud, "pfx", "tok", 22, RetryPolicy::immediate(3));

        let handle = provisioner.provision(0).await.expect("provision");

        assert_eq!(handle.name, "pfx-tok-0");
        assert_eq!(cloud.live_rule_sets(), vec![String::from("pfx-tok-0")]);
        assert_eq!(cloud.count(Operation::CreateRuleSet), 1);
        assert_eq!(cloud.rules_for(&handle.id).len(), 1);
    }

    #[tokio::test]
    async fn failed_lookup_adopts_after_the_name_is_taken() {
        let cloud = FakeCloud::new();
        cloud.fail_next(Operation::CreateRuleSet, FaultKind::LostResponse);
        cloud.fail_next(Operation::FindRuleSet, FaultKind::Transient);
        let provisioner =
            NetworkAccessProvisioner::new(&cloud, "pfx", "tok", 22, RetryPolicy::immediate(3));

        let handle = provisioner.provision(0).await.expect("provision");

        assert_eq!(cloud.live_rule_sets(), vec![handle.name]);
        assert_eq!(cloud.count(Operation::CreateRuleSet), 2);
    }

    #[tokio::test]
    async fn fatal_create_failure_skips_the_lookup() {
        let cloud = FakeCloud::new();
        cloud.fail_next(Operation::CreateRuleSet, FaultKind::Fatal);
        let provisioner =
            NetworkAccessProvisioner::new(&cloud, "pfx", "tok", 22, RetryPolicy::immediate(3));

        assert!(provisioner.provision(0).await.is_err());
        assert_eq!(cloud.count(Operation::FindRuleSet), 0);
        assert_eq!(cloud.count(Operation::CreateRuleSet), 1);
    }

    #[tokio::test]
    async fn release_confirms_a_deletion_whose_response_was_lost() {
        let cloud = FakeCloud::new();
        let provisioner =
            NetworkAccessProvisioner::new(&cloud, "pfx", "tok", 22, RetryPolicy::immediate(1));
        let handle = provisioner.provision(0).await.expect("provision");
        cloud.fail_next(Operation::DeleteRuleSet, FaultKind::LostResponse);

        let result = release_rule_set(&cloud, &handle.name, &RetryPolicy::immediate(3)).await;

        assert!(result.is_ok(), "{result:?}");
        assert!(cloud.live_rule_sets().is_empty());
        assert_eq!(cloud.count(Operation::DeleteRuleSet), 1);
    }

    #[tokio::test]
    async fn release_of_an_unknown_rule_set_fails() {
        let cloud = FakeCloud::new();

        let result = release_rule_set(&cloud, "pfx-tok-9", &RetryPolicy::immediate(3)).await;

        assert!(result.is_err());
        assert_eq!(cloud.count(Operation::FindRuleSet), 0);
    }

    #[rstest]
    #[case("p", "t", 0, "p-t-0")]
    #[case("sharesnap-ephemeral", "1a2b3c4d", 17, "sharesnap-ephemeral-1a2b3c4d-17")]
    fn names_follow_prefix_token_index(
        #[case] prefix: &str,
        #[case] token: &str,
        #[case] index: u64,
        #[case] expected: &str,
    ) {
        assert_eq!(rule_set_name(prefix, token, index), expected);
    }
}
