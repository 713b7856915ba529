//! Tests for the `ssh`-backed remote session.

use super::*;
use crate::test_support::ScriptedRunner;
use rstest::{fixture, rstest};

#[fixture]
fn options() -> SshOptions {
    SshOptions {
        ssh_bin: String::from("ssh"),
        known_hosts_file: String::from("/dev/null"),
    }
}

#[fixture]
fn target() -> SessionTarget {
    SessionTarget {
        address: String::from("203.0.113.10"),
        port: 2222,
        user: String::from("root"),
        identity_file: Utf8PathBuf::from("/keys/ephemeral.pem"),
    }
}

#[rstest]
fn connect_probes_with_a_no_op_command(options: SshOptions, target: SessionTarget) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let connector = SshConnector::new(options, runner.clone());

    connector.connect(&target).expect("probe succeeds");

    let invocations = runner.invocations();
    let [probe] = invocations.as_slice() else {
        panic!("expected a single probe, got {invocations:?}");
    };
    assert_eq!(probe.program, "ssh");
    let command = probe.command_string();
    for fragment in [
        "-p 2222",
        "-i /keys/ephemeral.pem",
        "BatchMode=yes",
        "StrictHostKeyChecking=no",
        "UserKnownHostsFile=/dev/null",
        "root@203.0.113.10 true",
    ] {
        assert!(command.contains(fragment), "missing {fragment} in {command}");
    }
}

#[rstest]
#[case(Some(SSH_CONNECTION_FAILURE), "Permission denied (publickey).")]
#[case(None, "")]
fn connect_classifies_client_failures(
    options: SshOptions,
    target: SessionTarget,
    #[case] code: Option<i32>,
    #[case] stderr: &str,
) {
    let runner = ScriptedRunner::new();
    runner.push_output(code, "", stderr);
    let connector = SshConnector::new(options, runner);

    let err = connector
        .connect(&target)
        .expect_err("connection should fail");

    let RemoteError::Connect { message, .. } = err else {
        panic!("expected connect error, got {err:?}");
    };
    if stderr.is_empty() {
        assert!(message.contains("status unknown"), "message: {message}");
    } else {
        assert_eq!(message, stderr);
    }
}

#[rstest]
fn connect_surfaces_spawn_failures(options: SshOptions, target: SessionTarget) {
    let connector = SshConnector::new(options, ScriptedRunner::new());
    let err = connector
        .connect(&target)
        .expect_err("no scripted response means spawn failure");
    assert!(matches!(err, RemoteError::Command(CommandError::Spawn { .. })));
}

#[rstest]
fn execute_returns_remote_output_verbatim(options: SshOptions, target: SessionTarget) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    runner.push_output(Some(3), "partial", "boom");
    let session = SshConnector::new(options, runner.clone())
        .connect(&target)
        .expect("connect");

    let output = session.execute("sudo mkdir -p share").expect("execute");

    assert_eq!(output.code, Some(3));
    assert_eq!(output.stdout, "partial");
    assert_eq!(output.stderr, "boom");
    let last = runner
        .invocations()
        .pop()
        .expect("execute should record an invocation");
    assert!(last.command_string().ends_with("root@203.0.113.10 sudo mkdir -p share"));
}

#[rstest]
fn blank_known_hosts_file_is_omitted(target: SessionTarget) {
    let options = SshOptions {
        ssh_bin: String::from("/usr/bin/ssh"),
        known_hosts_file: String::from("  "),
    };
    let args = build_ssh_args(&options, &target, "true");
    assert!(
        !args
            .iter()
            .any(|arg| arg.to_string_lossy().starts_with("UserKnownHostsFile"))
    );
}
