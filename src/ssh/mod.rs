//! Remote sessions over the system `ssh` client.
//!
//! A session is "opened" by running a no-op command; exit status 255 is how
//! OpenSSH reports connection, host-key, and authentication failures, so it
//! is classified as a connection error rather than a command result.

use std::ffi::OsString;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::command::{CommandError, CommandOutput, CommandRunner};

/// Exit status `ssh` uses for its own failures.
pub const SSH_CONNECTION_FAILURE: i32 = 255;

const CONNECT_PROBE: &str = "true";
const CONNECT_TIMEOUT_SECS: u32 = 10;

/// Where and how to open a session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionTarget {
    /// Host name or address of the instance.
    pub address: String,
    /// SSH port.
    pub port: u16,
    /// Remote user.
    pub user: String,
    /// Private key used to authenticate.
    pub identity_file: Utf8PathBuf,
}

/// Errors raised while opening or using a remote session.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RemoteError {
    /// Raised when the session cannot be established.
    #[error("could not connect to {user}@{address}: {message}")]
    Connect {
        /// Remote user.
        user: String,
        /// Remote address.
        address: String,
        /// Diagnostic from the client.
        message: String,
    },
    /// Raised when the local client cannot be started.
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Opens remote sessions.
pub trait RemoteConnector {
    /// Session type produced by this connector.
    type Session: RemoteSession;

    /// Opens a session to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Connect`] when the host cannot be reached or
    /// rejects the credentials.
    fn connect(&self, target: &SessionTarget) -> Result<Self::Session, RemoteError>;
}

/// An open remote session.
pub trait RemoteSession {
    /// Runs `command` remotely and waits for it to finish.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the command could not be delivered;
    /// non-zero remote exit codes are reported through [`CommandOutput`].
    fn execute(&self, command: &str) -> Result<CommandOutput, RemoteError>;
}

/// Client options shared by every session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshOptions {
    /// Path to the `ssh` executable.
    pub ssh_bin: String,
    /// Known hosts file; `/dev/null` for throwaway hosts.
    pub known_hosts_file: String,
}

/// Connector backed by the system `ssh` client.
#[derive(Clone, Debug)]
pub struct SshConnector<R: CommandRunner + Clone> {
    options: SshOptions,
    runner: R,
}

impl<R: CommandRunner + Clone> SshConnector<R> {
    /// Creates a connector running `ssh` through `runner`.
    #[must_use]
    pub const fn new(options: SshOptions, runner: R) -> Self {
        Self { options, runner }
    }
}

impl<R: CommandRunner + Clone> RemoteConnector for SshConnector<R> {
    type Session = SshSession<R>;

    fn connect(&self, target: &SessionTarget) -> Result<Self::Session, RemoteError> {
        let session = SshSession {
            options: self.options.clone(),
            target: target.clone(),
            runner: self.runner.clone(),
        };
        let probe = session.run(CONNECT_PROBE)?;
        if probe.code == Some(SSH_CONNECTION_FAILURE) || probe.code.is_none() {
            return Err(RemoteError::Connect {
                user: target.user.clone(),
                address: target.address.clone(),
                message: connect_message(&probe),
            });
        }
        Ok(session)
    }
}

/// Session that runs each command as a separate `ssh` invocation.
#[derive(Clone, Debug)]
pub struct SshSession<R: CommandRunner> {
    options: SshOptions,
    target: SessionTarget,
    runner: R,
}

impl<R: CommandRunner> SshSession<R> {
    fn run(&self, command: &str) -> Result<CommandOutput, CommandError> {
        let args = build_ssh_args(&self.options, &self.target, command);
        self.runner.run(&self.options.ssh_bin, &args)
    }
}

impl<R: CommandRunner> RemoteSession for SshSession<R> {
    fn execute(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        Ok(self.run(command)?)
    }
}

fn build_ssh_args(options: &SshOptions, target: &SessionTarget, command: &str) -> Vec<OsString> {
    let mut args = vec![
        OsString::from("-p"),
        OsString::from(target.port.to_string()),
        OsString::from("-i"),
        OsString::from(target.identity_file.as_str()),
        OsString::from("-o"),
        OsString::from("BatchMode=yes"),
        OsString::from("-o"),
        OsString::from("IdentitiesOnly=yes"),
        OsString::from("-o"),
        OsString::from("StrictHostKeyChecking=no"),
        OsString::from("-o"),
        OsString::from(format!("ConnectTimeout={CONNECT_TIMEOUT_SECS}")),
    ];

    if !options.known_hosts_file.trim().is_empty() {
        args.push(OsString::from("-o"));
        args.push(OsString::from(format!(
            "UserKnownHostsFile={}",
            options.known_hosts_file
        )));
    }

    args.push(OsString::from(format!("{}@{}", target.user, target.address)));
    args.push(OsString::from(command));
    args
}

fn connect_message(probe: &CommandOutput) -> String {
    let stderr = probe.stderr.trim();
    if stderr.is_empty() {
        format!("ssh exited with status {}", probe.status_text())
    } else {
        stderr.to_owned()
    }
}

#[cfg(test)]
mod tests;
