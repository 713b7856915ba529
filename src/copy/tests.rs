//! Tests for the remote copy orchestrator.

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};

use super::*;
use crate::test_support::{FakeRemote, copy_settings};

#[fixture]
fn instance() -> ComputeInstance {
    ComputeInstance {
        id: String::from("i-1"),
        public_address: String::from("198.51.100.7"),
        block_devices: vec![String::from("vol-root"), String::from("vol-data")],
    }
}

#[fixture]
fn credential() -> CredentialHandle {
    CredentialHandle {
        name: String::from("ephemeral"),
        key_id: String::from("key-1"),
        private_key_path: Utf8PathBuf::from("/keys/ephemeral.pem"),
    }
}

#[rstest]
#[tokio::test]
async fn runs_eight_commands_in_order(instance: ComputeInstance, credential: CredentialHandle) {
    let remote = FakeRemote::new();
    let settings = copy_settings();

    let report = RemoteCopyOrchestrator::new(&remote, &settings)
        .copy(&instance, &credential, "fs-123")
        .await
        .expect("copy succeeds");

    let expected: Vec<String> = settings
        .layout
        .commands("fs-123")
        .into_iter()
        .map(|command| command.command)
        .collect();
    assert_eq!(remote.commands(), expected);
    assert_eq!(remote.sessions_opened(), 1);
    assert_eq!(report.steps.len(), 8);
    assert_eq!(report.state(), SessionState::Done);
    assert_eq!(
        report.transitions.first(),
        Some(&SessionState::Disconnected)
    );
    assert!(report.transitions.contains(&SessionState::Executing(7)));
}

#[rstest]
#[tokio::test]
async fn connects_with_the_instance_address_and_key(
    instance: ComputeInstance,
    credential: CredentialHandle,
) {
    let remote = FakeRemote::new();
    let settings = copy_settings();

    RemoteCopyOrchestrator::new(&remote, &settings)
        .copy(&instance, &credential, "fs-1")
        .await
        .expect("copy succeeds");

    let targets = remote.connect_targets();
    let [target] = targets.as_slice() else {
        panic!("expected one connection attempt, got {targets:?}");
    };
    assert_eq!(target.address, "198.51.100.7");
    assert_eq!(target.identity_file, credential.private_key_path);
    assert_eq!(target.user, settings.user);
}

#[rstest]
#[tokio::test]
async fn connection_failures_are_retried(instance: ComputeInstance, credential: CredentialHandle) {
    let remote = FakeRemote::new();
    remote.fail_connects(2);
    let settings = copy_settings();

    let report = RemoteCopyOrchestrator::new(&remote, &settings)
        .copy(&instance, &credential, "fs-1")
        .await
        .expect("third attempt connects");

    assert_eq!(report.connect_attempts, 3);
    assert_eq!(remote.sessions_opened(), 1);
}

#[rstest]
#[tokio::test]
async fn connection_attempts_are_bounded(instance: ComputeInstance, credential: CredentialHandle) {
    let remote = FakeRemote::new();
    remote.fail_connects(u32::MAX);
    let settings = CopySettings {
        connect_policy: RetryPolicy::immediate(4),
        ..copy_settings()
    };

    let err = RemoteCopyOrchestrator::new(&remote, &settings)
        .copy(&instance, &credential, "fs-1")
        .await
        .expect_err("never connects");

    assert!(matches!(err, CopyError::Connect { attempts: 4, .. }));
    assert!(remote.commands().is_empty());
}

#[rstest]
#[tokio::test]
async fn critical_failure_stops_the_copy(instance: ComputeInstance, credential: CredentialHandle) {
    let remote = FakeRemote::new();
    remote.fail_command_containing("mount -t nfs4", 32);
    let settings = copy_settings();

    let err = RemoteCopyOrchestrator::new(&remote, &settings)
        .copy(&instance, &credential, "fs-1")
        .await
        .expect_err("mount fails");

    let CopyError::CriticalStep {
        step,
        label,
        report,
        ..
    } = err
    else {
        panic!("expected critical step error, got {err:?}");
    };
    assert_eq!(step, 5);
    assert_eq!(label, "mount share");
    assert_eq!(report.steps.len(), 5);
    assert_eq!(report.state(), SessionState::Failed);
    assert_eq!(remote.commands().len(), 5);
}

#[rstest]
#[tokio::test]
async fn non_critical_failure_does_not_stop_the_copy(
    instance: ComputeInstance,
    credential: CredentialHandle,
) {
    let remote = FakeRemote::new();
    remote.fail_command_containing("apt-get update", 100);
    let settings = copy_settings();

    let report = RemoteCopyOrchestrator::new(&remote, &settings)
        .copy(&instance, &credential, "fs-1")
        .await
        .expect("copy continues");

    assert_eq!(report.steps.len(), 8);
    assert_eq!(report.failed_steps().count(), 1);
    assert!(!report.has_critical_failure());
}

#[rstest]
#[tokio::test]
async fn run_all_mode_records_every_failure(
    instance: ComputeInstance,
    credential: CredentialHandle,
) {
    let remote = FakeRemote::new();
    remote.fail_command_containing("mkfs", 1);
    remote.fail_command_containing("cp -Rp", 1);
    let settings = CopySettings {
        stop_on_critical_failure: false,
        ..copy_settings()
    };

    let report = RemoteCopyOrchestrator::new(&remote, &settings)
        .copy(&instance, &credential, "fs-1")
        .await
        .expect("run-all mode returns a report");

    let failed: Vec<&str> = report.failed_steps().map(|step| step.label).collect();
    assert_eq!(failed, vec!["format block volume", "copy share contents"]);
    assert!(report.has_critical_failure());
    assert_eq!(report.state(), SessionState::Done);
}

#[rstest]
#[case(SessionState::Disconnected, SessionState::Connecting, true)]
#[case(SessionState::Connecting, SessionState::Connecting, true)]
#[case(SessionState::Connected, SessionState::Executing(0), true)]
#[case(SessionState::Executing(2), SessionState::Executing(3), true)]
#[case(SessionState::Executing(2), SessionState::Executing(4), false)]
#[case(SessionState::Disconnected, SessionState::Executing(0), false)]
#[case(SessionState::Done, SessionState::Connecting, false)]
#[case(SessionState::Connected, SessionState::Failed, false)]
fn transitions_follow_the_session_lifecycle(
    #[case] from: SessionState,
    #[case] to: SessionState,
    #[case] legal: bool,
) {
    assert_eq!(from.can_transition_to(to), legal);
}
