//! Remote copy of a share onto the instance's block volume.
//!
//! The orchestrator drives a small session state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Executing(0..n) -> Done
//!                      |                           |
//!                      +---------> Failed <--------+
//! ```
//!
//! Every command result is recorded in a [`CopyReport`]. A failing critical
//! command stops the copy unless the orchestrator runs in "run all" mode.

mod commands;

use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

pub use commands::{CopyCommand, CopyLayout, NFS_MOUNT_OPTIONS};

use crate::compute::ComputeInstance;
use crate::credential::CredentialHandle;
use crate::retry::RetryPolicy;
use crate::ssh::{RemoteConnector, RemoteError, RemoteSession, SessionTarget};

/// Session lifecycle as seen by the orchestrator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// No session yet.
    Disconnected,
    /// Attempting to connect.
    Connecting,
    /// Session open, no command started.
    Connected,
    /// Running the command at this index.
    Executing(usize),
    /// All commands ran.
    Done,
    /// Connecting failed or a critical command failed.
    Failed,
}

impl SessionState {
    /// Whether moving to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Disconnected, Self::Connecting)
            | (Self::Connecting, Self::Connecting | Self::Connected | Self::Failed)
            | (Self::Connected, Self::Executing(0) | Self::Done)
            | (Self::Executing(_), Self::Done | Self::Failed) => true,
            (Self::Executing(current), Self::Executing(following)) => following == current + 1,
            _ => false,
        }
    }
}

/// Result of one remote command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StepResult {
    /// Position in the command list.
    pub index: usize,
    /// Short name of the command.
    pub label: &'static str,
    /// Command line that ran.
    pub command: String,
    /// Whether the command was critical.
    pub critical: bool,
    /// Exit code; `None` when the command could not be delivered.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error, or the delivery error.
    pub stderr: String,
}

impl StepResult {
    /// Whether the command exited with status zero.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Everything that happened during one copy.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CopyReport {
    /// States visited, starting with [`SessionState::Disconnected`].
    pub transitions: Vec<SessionState>,
    /// Per-command results in execution order.
    pub steps: Vec<StepResult>,
    /// Connection attempts made.
    pub connect_attempts: u32,
}

impl CopyReport {
    /// Final session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(SessionState::Disconnected)
    }

    /// Steps that did not exit successfully.
    pub fn failed_steps(&self) -> impl Iterator<Item = &StepResult> {
        self.steps.iter().filter(|step| !step.succeeded())
    }

    /// Whether any critical step failed.
    #[must_use]
    pub fn has_critical_failure(&self) -> bool {
        self.failed_steps().any(|step| step.critical)
    }

    fn enter(&mut self, next: SessionState) {
        let current = self.state();
        debug_assert!(
            self.transitions.is_empty() || current.can_transition_to(next),
            "illegal session transition {current:?} -> {next:?}"
        );
        debug!(from = ?current, to = ?next, "session transition");
        self.transitions.push(next);
    }
}

/// Errors that end a copy early.
#[derive(Debug, Error)]
pub enum CopyError {
    /// Raised when no session could be opened.
    #[error("could not open a session after {attempts} attempts: {source}")]
    Connect {
        /// Connection attempts made.
        attempts: u32,
        /// Last connection error.
        #[source]
        source: RemoteError,
    },
    /// Raised when a critical command fails and the copy stops.
    #[error("critical step {step} ({label}) failed with status {status}")]
    CriticalStep {
        /// One-based position of the failing command.
        step: usize,
        /// Short name of the failing command.
        label: &'static str,
        /// Exit status text.
        status: String,
        /// Report up to and including the failure.
        report: Box<CopyReport>,
    },
}

/// Session parameters and copy behaviour.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CopySettings {
    /// Remote user.
    pub user: String,
    /// Remote SSH port.
    pub port: u16,
    /// Delay between the instance running and the first connection attempt.
    pub warmup: Duration,
    /// Bounds connection attempts and their backoff.
    pub connect_policy: RetryPolicy,
    /// Stop at the first failing critical command.
    pub stop_on_critical_failure: bool,
    /// Remote directory and device layout.
    pub layout: CopyLayout,
}

/// Connects to the instance and runs the copy commands in order.
#[derive(Debug)]
pub struct RemoteCopyOrchestrator<'a, C> {
    connector: &'a C,
    settings: &'a CopySettings,
}

impl<'a, C: RemoteConnector> RemoteCopyOrchestrator<'a, C> {
    /// Creates an orchestrator using `connector`.
    #[must_use]
    pub const fn new(connector: &'a C, settings: &'a CopySettings) -> Self {
        Self {
            connector,
            settings,
        }
    }

    /// Copies `share_id` onto the block volume of `instance`.
    ///
    /// In "run all" mode every command runs and failures are only recorded
    /// in the returned report.
    ///
    /// # Errors
    ///
    /// Returns [`CopyError::Connect`] when the connection policy is exhausted
    /// and [`CopyError::CriticalStep`] when a critical command fails while
    /// `stop_on_critical_failure` is set.
    pub async fn copy(
        &self,
        instance: &ComputeInstance,
        credential: &CredentialHandle,
        share_id: &str,
    ) -> Result<CopyReport, CopyError> {
        let mut report = CopyReport::default();
        report.enter(SessionState::Disconnected);

        let target = SessionTarget {
            address: instance.public_address.clone(),
            port: self.settings.port,
            user: self.settings.user.clone(),
            identity_file: credential.private_key_path.clone(),
        };

        if !self.settings.warmup.is_zero() {
            info!(
                instance_id = %instance.id,
                warmup_secs = self.settings.warmup.as_secs(),
                "waiting for instance to boot"
            );
            sleep(self.settings.warmup).await;
        }

        let session = self.connect(&target, &mut report).await?;
        report.enter(SessionState::Connected);
        info!(address = %target.address, attempts = report.connect_attempts, "session open");

        for (index, step) in self.settings.layout.commands(share_id).into_iter().enumerate() {
            report.enter(SessionState::Executing(index));
            let result = run_step(&session, index, step);
            let abort = result.critical
                && !result.succeeded()
                && self.settings.stop_on_critical_failure;
            let label = result.label;
            let status = status_text(result.code);
            report.steps.push(result);

            if abort {
                report.enter(SessionState::Failed);
                return Err(CopyError::CriticalStep {
                    step: index + 1,
                    label,
                    status,
                    report: Box::new(report),
                });
            }
        }

        report.enter(SessionState::Done);
        let failures = report.failed_steps().count();
        info!(share_id, failures, "copy finished");
        Ok(report)
    }

    async fn connect(
        &self,
        target: &SessionTarget,
        report: &mut CopyReport,
    ) -> Result<C::Session, CopyError> {
        let mut handle = self.settings.connect_policy.handle();
        loop {
            report.enter(SessionState::Connecting);
            report.connect_attempts += 1;
            let err = match self.connector.connect(target) {
                Ok(session) => return Ok(session),
                Err(err @ RemoteError::Connect { .. }) => err,
                Err(err) => {
                    report.enter(SessionState::Failed);
                    return Err(CopyError::Connect {
                        attempts: report.connect_attempts,
                        source: err,
                    });
                }
            };

            let Some(delay) = handle.next_delay() else {
                report.enter(SessionState::Failed);
                return Err(CopyError::Connect {
                    attempts: report.connect_attempts,
                    source: err,
                });
            };
            warn!(
                address = %target.address,
                attempt = report.connect_attempts,
                delay_secs = delay.as_secs(),
                error = %err,
                "connection failed, retrying"
            );
            sleep(delay).await;
        }
    }
}

fn run_step<S: RemoteSession>(session: &S, index: usize, step: CopyCommand) -> StepResult {
    info!(step = index + 1, label = step.label, "running remote command");
    let (code, stdout, stderr) = match session.execute(&step.command) {
        Ok(output) => (output.code, output.stdout, output.stderr),
        Err(err) => (None, String::new(), err.to_string()),
    };
    debug!(
        step = index + 1,
        stdout = %stdout.trim_end(),
        stderr = %stderr.trim_end(),
        "command output"
    );
    if code != Some(0) {
        warn!(
            step = index + 1,
            label = step.label,
            critical = step.critical,
            status = %status_text(code),
            "remote command failed"
        );
    }
    StepResult {
        index,
        label: step.label,
        command: step.command,
        critical: step.critical,
        code,
        stdout,
        stderr,
    }
}

fn status_text(code: Option<i32>) -> String {
    code.map_or_else(|| String::from("unknown"), |code| code.to_string())
}

#[cfg(test)]
mod tests;
