//! Rotation of the ephemeral key pair used to reach copy instances.
//!
//! The key is always deleted before it is created so at most one live key of
//! the configured name exists. The private half is persisted through a
//! [`KeyStore`] with owner-only permissions.

use camino::Utf8PathBuf;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::backend::{CredentialBackend, KeyPair, TransientError};
use crate::keystore::{KeyStore, KeyStoreError};
use crate::retry::{RetryPolicy, retry_transient};

/// A provisioned key pair and the local file holding its private key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CredentialHandle {
    /// Name the key pair is registered under.
    pub name: String,
    /// Provider identifier of the key pair.
    pub key_id: String,
    /// Local private key file.
    pub private_key_path: Utf8PathBuf,
}

/// Errors raised while provisioning the key pair.
#[derive(Debug, Error)]
pub enum CredentialError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the provider refuses to create the key pair.
    #[error("failed to create key pair {name}: {source}")]
    Create {
        /// Requested key name.
        name: String,
        /// Provider error.
        #[source]
        source: E,
    },
    /// Raised when the private key cannot be written locally.
    #[error("failed to store private key for {name}: {source}")]
    Store {
        /// Key pair name.
        name: String,
        /// Key store error.
        #[source]
        source: KeyStoreError,
    },
}

/// Deletes and recreates the named key pair.
#[derive(Debug)]
pub struct CredentialProvisioner<'a, B, K> {
    backend: &'a B,
    key_store: &'a K,
    name: &'a str,
    api_policy: RetryPolicy,
}

impl<'a, B, K> CredentialProvisioner<'a, B, K>
where
    B: CredentialBackend,
    K: KeyStore,
{
    /// Creates a provisioner for the key pair `name`.
    #[must_use]
    pub const fn new(
        backend: &'a B,
        key_store: &'a K,
        name: &'a str,
        api_policy: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            key_store,
            name,
            api_policy,
        }
    }

    /// Rotates the key pair and writes its private key.
    ///
    /// Failures deleting the previous key are logged and ignored. A create
    /// that fails transiently may still have registered a key, so the name is
    /// cleared again before each retry and after the last attempt. When the
    /// private key cannot be stored the freshly created key is deleted again
    /// before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Create`] when creation fails and
    /// [`CredentialError::Store`] when the key file cannot be written.
    pub async fn provision(&self) -> Result<CredentialHandle, CredentialError<B::Error>> {
        self.delete_existing().await;

        let pair = self
            .create_fresh()
            .await
            .map_err(|source| CredentialError::Create {
                name: self.name.to_owned(),
                source,
            })?;

        let path = match self
            .key_store
            .write_private_key(&pair.name, &pair.private_key)
        {
            Ok(path) => path,
            Err(source) => {
                self.delete_existing().await;
                return Err(CredentialError::Store {
                    name: pair.name,
                    source,
                });
            }
        };

        info!(name = %pair.name, key_id = %pair.id, path = %path, "key pair provisioned");
        Ok(CredentialHandle {
            name: pair.name,
            key_id: pair.id,
            private_key_path: path,
        })
    }

    async fn create_fresh(&self) -> Result<KeyPair, B::Error> {
        let mut retries = self.api_policy.handle();
        loop {
            let err = match self.backend.create_key_pair(self.name).await {
                Ok(pair) => return Ok(pair),
                Err(err) if err.is_transient() => err,
                Err(err) => return Err(err),
            };
            self.delete_existing().await;
            let Some(delay) = retries.next_delay() else {
                return Err(err);
            };
            warn!(
                name = self.name,
                attempt = retries.attempts(),
                error = %err,
                "key pair creation interrupted, retrying"
            );
            sleep(delay).await;
        }
    }

    async fn delete_existing(&self) {
        let result = retry_transient(&self.api_policy, "delete_key_pair", || {
            self.backend.delete_key_pair(self.name)
        })
        .await;
        if let Err(err) = result {
            warn!(name = self.name, error = %err, "failed to delete existing key pair");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CloudCall, FakeCloud, FaultKind, Operation};
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use crate::keystore::DirKeyStore;

    struct Harness {
        _tmp: TempDir,
        cloud: FakeCloud,
        store: DirKeyStore,
    }

    #[fixture]
    fn harness() -> Harness {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("non-utf8 tempdir: {}", path.display()));
        let store = DirKeyStore::new(&root).unwrap_or_else(|err| panic!("key store: {err}"));
        Harness {
            _tmp: tmp,
            cloud: FakeCloud::new(),
            store,
        }
    }

    #[rstest]
    #[tokio::test]
    async fn provision_deletes_before_creating(harness: Harness) {
        let provisioner = CredentialProvisioner::new(
            &harness.cloud,
            &harness.store,
            "ephemeral",
            RetryPolicy::immediate(1),
        );

        let handle = provisioner.provision().await.expect("provision");

        assert_eq!(handle.name, "ephemeral");
        assert!(handle.private_key_path.exists());
        assert_eq!(
            harness.cloud.calls(),
            vec![
                CloudCall::DeleteKeyPair(String::from("ephemeral")),
                CloudCall::CreateKeyPair(String::from("ephemeral")),
            ]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn provisioning_twice_leaves_one_live_key(harness: Harness) {
        let provisioner = CredentialProvisioner::new(
            &harness.cloud,
            &harness.store,
            "ephemeral",
            RetryPolicy::immediate(1),
        );

        let first = provisioner.provision().await.expect("first provision");
        let second = provisioner.provision().await.expect("second provision");

        assert_ne!(first.key_id, second.key_id);
        assert_eq!(harness.cloud.live_key_pairs(), vec![String::from("ephemeral")]);
    }

    #[rstest]
    #[tokio::test]
    async fn delete_failures_are_ignored(harness: Harness) {
        harness
            .cloud
            .fail_next(Operation::DeleteKeyPair, FaultKind::Fatal);
        let provisioner = CredentialProvisioner::new(
            &harness.cloud,
            &harness.store,
            "ephemeral",
            RetryPolicy::immediate(1),
        );

        assert!(provisioner.provision().await.is_ok());
    }

    #[rstest]
    #[tokio::test]
    async fn transient_create_failures_are_retried(harness: Harness) {
        harness
            .cloud
            .fail_next(Operation::CreateKeyPair, FaultKind::Transient);
        let provisioner = CredentialProvisioner::new(
            &harness.cloud,
            &harness.store,
            "ephemeral",
            RetryPolicy::immediate(3),
        );

        assert!(provisioner.provision().await.is_ok());
        assert_eq!(harness.cloud.count(Operation::CreateKeyPair), 2);
    }

    #[rstest]
    #[tokio::test]
    async fn lost_create_response_does_not_leave_a_second_key(harness: Harness) {
        harness
            .cloud
            .fail_next(Operation::CreateKeyPair, FaultKind::LostResponse);
        let provisioner = CredentialProvisioner::new(
            &harness.cloud,
            &harness.store,
            "ephemeral",
            RetryPolicy::immediate(3),
        );

        let handle = provisioner.provision().await.expect("provision");

        assert_eq!(harness.cloud.live_key_pairs(), vec![String::from("ephemeral")]);
        assert_eq!(
            harness.cloud.calls(),
            vec![
                CloudCall::DeleteKeyPair(String::from("ephemeral")),
                CloudCall::CreateKeyPair(String::from("ephemeral")),
                CloudCall::DeleteKeyPair(String::from("ephemeral")),
                CloudCall::CreateKeyPair(String::from("ephemeral")),
            ]
        );
        let stored = std::fs::read_to_string(&handle.private_key_path).expect("read key");
        assert_eq!(stored, format!("private key {}", handle.key_id));
    }

    #[rstest]
    #[tokio::test]
    async fn exhausted_create_retries_clear_the_name(harness: Harness) {
        for _ in 0..2 {
            harness
                .cloud
                .fail_next(Operation::CreateKeyPair, FaultKind::LostResponse);
        }
        let provisioner = CredentialProvisioner::new(
            &harness.cloud,
            &harness.store,
            "ephemeral",
            RetryPolicy::immediate(2),
        );

        let err = provisioner.provision().await.expect_err("create fails");

        assert!(matches!(err, CredentialError::Create { .. }));
        assert!(harness.cloud.live_key_pairs().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn create_failure_is_fatal(harness: Harness) {
        harness
            .cloud
            .fail_next(Operation::CreateKeyPair, FaultKind::Fatal);
        let provisioner = CredentialProvisioner::new(
            &harness.cloud,
            &harness.store,
            "ephemeral",
            RetryPolicy::immediate(3),
        );

        let err = provisioner.provision().await.expect_err("create fails");
        assert!(matches!(err, CredentialError::Create { .. }));
        assert_eq!(harness.cloud.count(Operation::CreateKeyPair), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn store_failure_removes_the_new_key(harness: Harness) {
        let provisioner = CredentialProvisioner::new(
            &harness.cloud,
            &harness.store,
            "../outside",
            RetryPolicy::immediate(1),
        );

        let err = provisioner.provision().await.expect_err("store fails");

        assert!(matches!(err, CredentialError::Store { .. }));
        assert!(harness.cloud.live_key_pairs().is_empty());
    }
}
