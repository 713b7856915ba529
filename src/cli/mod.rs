//! Command-line interface definitions for the `sharesnap` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

const CONFIGURATION_HELP: &str = "\
Configuration:
  Scaleway credentials and placement come from SCW_* variables such as
  SCW_SECRET_KEY, SCW_DEFAULT_PROJECT_ID and SCW_DEFAULT_ZONE. Workflow
  settings come from sharesnap.toml or SHARESNAP_* variables; the share DNS
  suffix (SHARESNAP_SHARE_DNS_SUFFIX) has no default.

Exit status:
  0 when every share was backed up and every resource released, 1 otherwise.";

/// Top-level CLI for the `sharesnap` binary.
#[derive(Debug, Parser)]
#[command(
    name = "sharesnap",
    about = "Back up network file shares to block volume snapshots",
    after_long_help = CONFIGURATION_HELP,
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Copy each share onto a fresh block volume and snapshot it.
    #[command(
        name = "run",
        about = "Copy each share onto a fresh block volume and snapshot it"
    )]
    Run(RunCommand),
    /// List the shares a run would back up.
    #[command(name = "list", about = "List the shares a run would back up")]
    List,
}

/// Arguments for the `sharesnap run` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RunCommand {
    /// Back up only this share. Repeat to select several; all shares are
    /// processed when omitted.
    #[arg(long = "share", value_name = "ID")]
    pub(crate) shares: Vec<String>,
}
