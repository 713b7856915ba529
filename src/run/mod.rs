//! Sequential per-share backup pipeline.
//!
//! For each share the controller provisions a key pair, a rule set and an
//! instance, copies the share onto the instance's block volume, snapshots
//! that volume and releases everything it acquired. A share failing at any
//! stage is recorded in the [`RunSummary`] and the run moves on.

mod settings;

use std::fmt;

use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

pub use settings::WorkflowSettings;

use crate::backend::{CloudBackend, ShareVolume, SnapshotRecord};
use crate::compute::{ComputeProvisioner, LaunchConfig};
use crate::copy::{CopyError, CopyReport, RemoteCopyOrchestrator};
use crate::credential::CredentialProvisioner;
use crate::enumerate::{EnumerationError, VolumeEnumerator};
use crate::keystore::KeyStore;
use crate::network::{NetworkAccessError, NetworkAccessProvisioner, rule_set_name};
use crate::snapshot::SnapshotOrchestrator;
use crate::ssh::RemoteConnector;
use crate::teardown::{AcquiredResources, TeardownOrchestrator, TeardownReport};
use crate::units::block_volume_size_gb;

const RUN_TOKEN_LEN: usize = 8;

/// Per-process naming state threaded through the controller.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunContext {
    run_token: String,
    next_index: u64,
}

impl RunContext {
    /// Creates a context with a random run token.
    #[must_use]
    pub fn new() -> Self {
        let token: String = Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(RUN_TOKEN_LEN)
            .collect();
        Self::with_token(token)
    }

    /// Creates a context with a fixed run token.
    #[must_use]
    pub fn with_token(run_token: impl Into<String>) -> Self {
        Self {
            run_token: run_token.into(),
            next_index: 0,
        }
    }

    /// Token distinguishing names created by this process.
    #[must_use]
    pub fn run_token(&self) -> &str {
        &self.run_token
    }

    /// Index the next attempt will use.
    #[must_use]
    pub const fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Returns the index for the next attempt and advances the counter.
    pub const fn advance(&mut self) -> u64 {
        let index = self.next_index;
        self.next_index = self.next_index.saturating_add(1);
        index
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Stage of the pipeline a share failed in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    /// Key pair rotation.
    Credential,
    /// Rule-set creation.
    NetworkAccess,
    /// Instance launch and readiness.
    Launch,
    /// Remote copy.
    Copy,
    /// Snapshot request.
    Snapshot,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Credential => "credential",
            Self::NetworkAccess => "network access",
            Self::Launch => "launch",
            Self::Copy => "copy",
            Self::Snapshot => "snapshot",
        })
    }
}

/// How a share's pipeline ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VolumeStatus {
    /// The share was copied and snapshotted.
    Succeeded,
    /// The pipeline failed at `stage`.
    Failed {
        /// Failing stage.
        stage: Stage,
        /// Error text.
        message: String,
    },
}

/// Result of processing one share.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeOutcome {
    /// Share identifier.
    pub share_id: String,
    /// Attempt index used for naming.
    pub run_index: u64,
    /// Size of the block volume requested.
    pub volume_size_gb: u64,
    /// Pipeline result.
    pub status: VolumeStatus,
    /// Snapshot taken, if the pipeline got that far.
    pub snapshot: Option<SnapshotRecord>,
    /// Remote copy report, when a session was attempted.
    pub copy: Option<CopyReport>,
    /// Release of acquired resources.
    pub teardown: TeardownReport,
}

impl VolumeOutcome {
    /// Whether the share succeeded and nothing was left behind.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == VolumeStatus::Succeeded && self.teardown.is_clean()
    }
}

/// Aggregate result of a run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunSummary {
    /// One entry per processed share, in processing order.
    pub outcomes: Vec<VolumeOutcome>,
}

impl RunSummary {
    /// Shares that succeeded with a clean teardown.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Shares whose pipeline failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status != VolumeStatus::Succeeded)
            .count()
    }

    /// Shares whose teardown left resources behind.
    #[must_use]
    pub fn with_leftovers(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| !o.teardown.is_clean())
            .count()
    }

    /// Whether every share succeeded without leftovers.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(VolumeOutcome::is_success)
    }
}

struct StageFailure {
    stage: Stage,
    message: String,
    copy: Option<CopyReport>,
}

impl StageFailure {
    fn new(stage: Stage, err: &impl fmt::Display) -> Self {
        Self {
            stage,
            message: err.to_string(),
            copy: None,
        }
    }
}

struct Completed {
    snapshot: SnapshotRecord,
    copy: CopyReport,
}

/// Drives the backup of every share, one at a time.
#[derive(Debug)]
pub struct RunController<B, C, K> {
    backend: B,
    connector: C,
    key_store: K,
    settings: WorkflowSettings,
    context: RunContext,
}

impl<B, C, K> RunController<B, C, K>
where
    B: CloudBackend,
    C: RemoteConnector,
    K: KeyStore,
{
    /// Creates a controller with a fresh [`RunContext`].
    #[must_use]
    pub fn new(backend: B, connector: C, key_store: K, settings: WorkflowSettings) -> Self {
        Self::with_context(backend, connector, key_store, settings, RunContext::new())
    }

    /// Creates a controller continuing from `context`.
    #[must_use]
    pub const fn with_context(
        backend: B,
        connector: C,
        key_store: K,
        settings: WorkflowSettings,
        context: RunContext,
    ) -> Self {
        Self {
            backend,
            connector,
            key_store,
            settings,
            context,
        }
    }

    /// Naming state after the attempts made so far.
    #[must_use]
    pub const fn context(&self) -> &RunContext {
        &self.context
    }

    /// Lists every share.
    ///
    /// # Errors
    ///
    /// Returns [`EnumerationError`] when the listing fails.
    pub async fn list_shares(&self) -> Result<Vec<ShareVolume>, EnumerationError<B::Error>> {
        VolumeEnumerator::new(
            &self.backend,
            self.settings.share_page_size,
            self.settings.max_shares,
            self.settings.api_policy,
        )
        .list()
        .await
    }

    /// Enumerates and backs up every share.
    ///
    /// # Errors
    ///
    /// Returns [`EnumerationError`] when the shares cannot be listed. Per-share
    /// failures are reported in the summary instead.
    pub async fn run(&mut self) -> Result<RunSummary, EnumerationError<B::Error>> {
        self.run_selected(&[]).await
    }

    /// Enumerates shares and backs up those named in `share_ids`, or all of
    /// them when `share_ids` is empty.
    ///
    /// # Errors
    ///
    /// Returns [`EnumerationError`] when the shares cannot be listed.
    pub async fn run_selected(
        &mut self,
        share_ids: &[String],
    ) -> Result<RunSummary, EnumerationError<B::Error>> {
        let mut shares = self.list_shares().await?;
        if !share_ids.is_empty() {
            shares.retain(|share| share_ids.contains(&share.id));
            for missing in share_ids
                .iter()
                .filter(|id| !shares.iter().any(|share| &share.id == *id))
            {
                error!(share_id = %missing, "requested share not found");
            }
        }
        Ok(self.process(&shares).await)
    }

    /// Backs up `shares` in order.
    pub async fn process(&mut self, shares: &[ShareVolume]) -> RunSummary {
        let mut summary = RunSummary::default();
        for share in shares {
            let run_index = self.context.advance();
            let span = info_span!("share", share_id = %share.id, run_index);
            let outcome = self.process_share(share, run_index).instrument(span).await;
            summary.outcomes.push(outcome);
        }
        info!(
            total = summary.outcomes.len(),
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            leftovers = summary.with_leftovers(),
            "run finished"
        );
        summary
    }

    async fn process_share(&self, share: &ShareVolume, run_index: u64) -> VolumeOutcome {
        let volume_size_gb = block_volume_size_gb(share.size_bytes);
        info!(size_bytes = share.size_bytes, volume_size_gb, "backing up share");

        let mut resources = AcquiredResources::default();
        let result = self
            .backup_share(share, run_index, volume_size_gb, &mut resources)
            .await;

        let teardown = TeardownOrchestrator::new(
            &self.backend,
            &self.key_store,
            self.settings.poll_policy,
            self.settings.api_policy,
        )
        .teardown(&resources)
        .await;

        let (status, snapshot, copy) = match result {
            Ok(done) => {
                let status = if done.copy.has_critical_failure() {
                    VolumeStatus::Failed {
                        stage: Stage::Copy,
                        message: String::from("critical copy commands failed"),
                    }
                } else {
                    VolumeStatus::Succeeded
                };
                (status, Some(done.snapshot), Some(done.copy))
            }
            Err(failure) => {
                error!(stage = %failure.stage, error = %failure.message, "share backup failed");
                let status = VolumeStatus::Failed {
                    stage: failure.stage,
                    message: failure.message,
                };
                (status, None, failure.copy)
            }
        };

        VolumeOutcome {
            share_id: share.id.clone(),
            run_index,
            volume_size_gb,
            status,
            snapshot,
            copy,
            teardown,
        }
    }

    async fn backup_share(
        &self,
        share: &ShareVolume,
        run_index: u64,
        volume_size_gb: u64,
        resources: &mut AcquiredResources,
    ) -> Result<Completed, StageFailure> {
        let settings = &self.settings;

        let credential = CredentialProvisioner::new(
            &self.backend,
            &self.key_store,
            &settings.credential_name,
            settings.api_policy,
        )
        .provision()
        .await
        .map_err(|err| StageFailure::new(Stage::Credential, &err))?;
        resources.credential = Some(credential.clone());

        let network = match NetworkAccessProvisioner::new(
            &self.backend,
            &settings.name_prefix,
            self.context.run_token(),
            settings.copy.port,
            settings.api_policy,
        )
        .provision(run_index)
        .await
        {
            Ok(handle) => handle,
            Err(NetworkAccessError::AddRule { handle, source }) => {
                let failure = StageFailure::new(Stage::NetworkAccess, &source);
                resources.network = Some(handle);
                return Err(failure);
            }
            Err(err) => return Err(StageFailure::new(Stage::NetworkAccess, &err)),
        };
        resources.network = Some(network.clone());

        let launch = LaunchConfig {
            name: rule_set_name(&settings.name_prefix, self.context.run_token(), run_index),
            image: settings.image.clone(),
            instance_type: settings.instance_type.clone(),
            volume_size_gb,
            credential_name: credential.name.clone(),
            network_access_id: network.id.clone(),
        };
        let compute =
            ComputeProvisioner::new(&self.backend, settings.poll_policy, settings.api_policy);
        let instance = compute.launch(&launch).await.map_err(|err| {
            resources.instance_id = err.instance_id().map(str::to_owned);
            StageFailure::new(Stage::Launch, &err)
        })?;
        resources.instance_id = Some(instance.id.clone());

        let copy = RemoteCopyOrchestrator::new(&self.connector, &settings.copy)
            .copy(&instance, &credential, &share.id)
            .await
            .map_err(|err| match err {
                CopyError::CriticalStep { ref report, .. } => StageFailure {
                    copy: Some(report.as_ref().clone()),
                    ..StageFailure::new(Stage::Copy, &err)
                },
                CopyError::Connect { .. } => StageFailure::new(Stage::Copy, &err),
            })?;

        let snapshots =
            SnapshotOrchestrator::new(&self.backend, settings.flush_delay, settings.api_policy);
        let snapshot = snapshots
            .snapshot(&instance, &share.id)
            .await
            .map_err(|err| StageFailure {
                copy: Some(copy.clone()),
                ..StageFailure::new(Stage::Snapshot, &err)
            })?;

        Ok(Completed { snapshot, copy })
    }
}
