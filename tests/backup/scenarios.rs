//! BDD scenarios for the backup workflow.

use rstest_bdd_macros::scenario;

use super::test_helpers::{BackupContext, backup_context};

#[scenario(
    path = "tests/features/backup.feature",
    name = "Snapshot every share and leave nothing behind"
)]
fn scenario_snapshot_every_share(backup_context: BackupContext) {
    let _ = backup_context;
}

#[scenario(
    path = "tests/features/backup.feature",
    name = "A failing share does not stop the run"
)]
fn scenario_failing_share_continues(backup_context: BackupContext) {
    let _ = backup_context;
}

#[scenario(
    path = "tests/features/backup.feature",
    name = "Launch failure releases the rule set and key pair"
)]
fn scenario_launch_failure_releases(backup_context: BackupContext) {
    let _ = backup_context;
}

#[scenario(
    path = "tests/features/backup.feature",
    name = "Teardown continues past a failing step"
)]
fn scenario_teardown_continues(backup_context: BackupContext) {
    let _ = backup_context;
}

#[scenario(
    path = "tests/features/backup.feature",
    name = "A lost rule-set creation response is not leaked"
)]
fn scenario_lost_rule_set_response(backup_context: BackupContext) {
    let _ = backup_context;
}

#[scenario(
    path = "tests/features/backup.feature",
    name = "A lost key pair creation response is not duplicated"
)]
fn scenario_lost_key_pair_response(backup_context: BackupContext) {
    let _ = backup_context;
}
