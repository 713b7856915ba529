//! BDD step definitions for the `sharesnap run` workflow.

use rstest_bdd_macros::{given, then, when};
use sharesnap::test_support::{FaultKind, Operation, workflow_settings};
use sharesnap::{
    DirKeyStore, RunContext, RunController, RunSummary, ShareVolume, VolumeOutcome, VolumeStatus,
};
use tokio::runtime::Runtime;

use super::test_helpers::BackupContext;

const LARGE_SHARE_BYTES: u64 = 10 * 1024 * 1024 * 1024;
const SMALL_SHARE_BYTES: u64 = 512;

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("run setup failed: {0}")]
    Setup(String),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("shares \"{first}\" and \"{second}\" awaiting backup")]
fn two_shares(mut backup_context: BackupContext, first: String, second: String) -> BackupContext {
    backup_context.cloud = backup_context.cloud.with_shares(vec![
        ShareVolume::new(first.trim(), LARGE_SHARE_BYTES),
        ShareVolume::new(second.trim(), SMALL_SHARE_BYTES),
    ]);
    backup_context
}

#[given("a share \"{share_id}\" awaiting backup")]
fn one_share(mut backup_context: BackupContext, share_id: String) -> BackupContext {
    backup_context.cloud = backup_context
        .cloud
        .with_shares(vec![ShareVolume::new(share_id.trim(), SMALL_SHARE_BYTES)]);
    backup_context
}

#[given("rule-set creation fails once")]
fn rule_set_creation_fails(backup_context: BackupContext) -> BackupContext {
    backup_context
        .cloud
        .fail_next(Operation::CreateRuleSet, FaultKind::Fatal);
    backup_context
}

#[given("instance launch fails")]
fn launch_fails(backup_context: BackupContext) -> BackupContext {
    backup_context
        .cloud
        .fail_next(Operation::Launch, FaultKind::Fatal);
    backup_context
}

#[given("rule-set deletion fails")]
fn rule_set_deletion_fails(backup_context: BackupContext) -> BackupContext {
    backup_context
        .cloud
        .fail_next(Operation::DeleteRuleSet, FaultKind::Fatal);
    backup_context
}

#[given("the rule-set creation response is lost")]
fn rule_set_response_lost(backup_context: BackupContext) -> BackupContext {
    backup_context
        .cloud
        .fail_next(Operation::CreateRuleSet, FaultKind::LostResponse);
    backup_context
}

#[given("the key pair creation response is lost")]
fn key_pair_response_lost(backup_context: BackupContext) -> BackupContext {
    backup_context
        .cloud
        .fail_next(Operation::CreateKeyPair, FaultKind::LostResponse);
    backup_context
}

#[when("I run the backup")]
fn run_backup(mut backup_context: BackupContext) -> Result<BackupContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Setup(err.to_string()))?;
    let key_store = DirKeyStore::new(backup_context.key_root())
        .map_err(|err| StepError::Setup(err.to_string()))?;
    let mut controller = RunController::with_context(
        backup_context.cloud.clone(),
        backup_context.remote.clone(),
        key_store,
        workflow_settings(),
        RunContext::with_token("bdd"),
    );

    let summary = runtime
        .block_on(controller.run())
        .map_err(|err| StepError::Setup(err.to_string()))?;
    backup_context.summary = Some(summary);
    Ok(backup_context)
}

fn summary(backup_context: &BackupContext) -> Result<&RunSummary, StepError> {
    backup_context
        .summary
        .as_ref()
        .ok_or_else(|| StepError::Assertion(String::from("missing run summary")))
}

fn outcome<'a>(
    backup_context: &'a BackupContext,
    share_id: &str,
) -> Result<&'a VolumeOutcome, StepError> {
    backup_context
        .outcome(share_id.trim())
        .ok_or_else(|| StepError::Assertion(format!("no outcome for share {share_id}")))
}

#[then("the run succeeds for {count} shares")]
fn run_succeeds(backup_context: &BackupContext, count: usize) -> Result<(), StepError> {
    let summary = summary(backup_context)?;
    if summary.is_success() && summary.succeeded() == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} clean successes, got {summary:?}"
        )))
    }
}

#[then("{failed} share fails and {succeeded} share succeeds")]
fn mixed_results(
    backup_context: &BackupContext,
    failed: usize,
    succeeded: usize,
) -> Result<(), StepError> {
    let summary = summary(backup_context)?;
    if summary.failed() == failed && summary.succeeded() == succeeded {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {failed} failed and {succeeded} succeeded, got {summary:?}"
        )))
    }
}

#[then("share \"{share_id}\" fails during \"{stage}\"")]
fn share_fails_during(
    backup_context: &BackupContext,
    share_id: String,
    stage: String,
) -> Result<(), StepError> {
    match &outcome(backup_context, &share_id)?.status {
        VolumeStatus::Failed { stage: actual, .. } if actual.to_string() == stage.trim() => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected failure during {stage}, got {other:?}"
        ))),
    }
}

#[then("{count} snapshots are created")]
fn snapshots_created(backup_context: &BackupContext, count: usize) -> Result<(), StepError> {
    let created = backup_context.cloud.snapshots().len();
    if created == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} snapshots, got {created}"
        )))
    }
}

#[then("no cloud resources remain")]
fn nothing_remains(backup_context: &BackupContext) -> Result<(), StepError> {
    let key_pairs = backup_context.cloud.live_key_pairs();
    let rule_sets = backup_context.cloud.live_rule_sets();
    let key_files = backup_context.key_files();
    if key_pairs.is_empty() && rule_sets.is_empty() && key_files == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "left behind key pairs {key_pairs:?}, rule sets {rule_sets:?}, {key_files} key files"
        )))
    }
}

#[then("no instance is terminated")]
fn no_instance_terminated(backup_context: &BackupContext) -> Result<(), StepError> {
    let terminations = backup_context.cloud.count(Operation::Terminate);
    if terminations == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no terminate calls, got {terminations}"
        )))
    }
}

#[then("share \"{share_id}\" leaves \"{step}\" behind")]
fn share_leaves_behind(
    backup_context: &BackupContext,
    share_id: String,
    step: String,
) -> Result<(), StepError> {
    let teardown = &outcome(backup_context, &share_id)?.teardown;
    let failed: Vec<String> = teardown
        .failures
        .iter()
        .map(|failure| failure.step.to_string())
        .collect();
    if failed == [step.trim()] && teardown.attempted.len() == 4 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected only {step} to fail with every step attempted, got {teardown:?}"
        )))
    }
}

#[then("the key pair and key file are still released")]
fn credential_released(backup_context: &BackupContext) -> Result<(), StepError> {
    let key_pairs = backup_context.cloud.live_key_pairs();
    let key_files = backup_context.key_files();
    if key_pairs.is_empty() && key_files == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "left behind key pairs {key_pairs:?} and {key_files} key files"
        )))
    }
}

#[then("the rule set was created once")]
fn rule_set_created_once(backup_context: &BackupContext) -> Result<(), StepError> {
    let creates = backup_context.cloud.count(Operation::CreateRuleSet);
    if creates == 1 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected one rule-set create call, got {creates}"
        )))
    }
}
