//! Binary entry point for the sharesnap CLI.

mod cli;

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use cli::{Cli, RunCommand};
use sharesnap::units::{SizeUnit, block_volume_size_gb, bytes_to};
use sharesnap::{
    BackupConfig, DirKeyStore, ProcessCommandRunner, RunController, RunSummary, ScalewayBackend,
    ScalewayConfig, ShareVolume, SshConnector, SshOptions, VolumeStatus, WorkflowSettings,
};

type Controller = RunController<ScalewayBackend, SshConnector<ProcessCommandRunner>, DirKeyStore>;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("key store error: {0}")]
    KeyStore(String),
    #[error("share listing failed: {0}")]
    Enumeration(String),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();
    let exit_code = match dispatch(cli, &mut io::stdout()).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli, out: &mut impl Write) -> Result<i32, CliError> {
    let mut controller = build_controller()?;
    match cli {
        Cli::Run(command) => run_command(&mut controller, &command, out).await,
        Cli::List => list_command(&controller, out).await,
    }
}

fn load_configuration() -> Result<(BackupConfig, ScalewayConfig), CliError> {
    let backup =
        BackupConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    backup
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let scaleway =
        ScalewayConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    scaleway
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;
    Ok((backup, scaleway))
}

fn build_controller() -> Result<Controller, CliError> {
    let (backup, scaleway) = load_configuration()?;
    let settings = WorkflowSettings::from_config(&backup, &scaleway);
    let key_store =
        DirKeyStore::new(&backup.key_directory).map_err(|err| CliError::KeyStore(err.to_string()))?;
    let connector = SshConnector::new(
        SshOptions {
            ssh_bin: backup.ssh_bin,
            known_hosts_file: backup.ssh_known_hosts_file,
        },
        ProcessCommandRunner,
    );
    let backend = ScalewayBackend::new(scaleway).map_err(|err| CliError::Backend(err.to_string()))?;
    Ok(RunController::new(backend, connector, key_store, settings))
}

async fn run_command(
    controller: &mut Controller,
    command: &RunCommand,
    out: &mut impl Write,
) -> Result<i32, CliError> {
    let summary = controller
        .run_selected(&command.shares)
        .await
        .map_err(|err| CliError::Enumeration(err.to_string()))?;
    out.write_all(render_summary(&summary).as_bytes())?;
    Ok(if summary.is_success() { 0 } else { 1 })
}

async fn list_command(controller: &Controller, out: &mut impl Write) -> Result<i32, CliError> {
    let shares = controller
        .list_shares()
        .await
        .map_err(|err| CliError::Enumeration(err.to_string()))?;
    out.write_all(render_listing(&shares).as_bytes())?;
    Ok(0)
}

fn render_listing(shares: &[ShareVolume]) -> String {
    let mut rendered = String::new();
    for share in shares {
        rendered.push_str(&format!(
            "{}\t{:.2} {}\t{} GiB volume\n",
            share.id,
            bytes_to(share.size_bytes, SizeUnit::Giga),
            SizeUnit::Giga,
            block_volume_size_gb(share.size_bytes)
        ));
    }
    rendered.push_str(&format!("{} shares\n", shares.len()));
    rendered
}

fn render_summary(summary: &RunSummary) -> String {
    let mut rendered = String::new();
    for outcome in &summary.outcomes {
        let status = match (&outcome.status, &outcome.snapshot) {
            (VolumeStatus::Succeeded, Some(snapshot)) => format!("ok, snapshot {}", snapshot.id),
            (VolumeStatus::Succeeded, None) => String::from("ok"),
            (VolumeStatus::Failed { stage, message }, _) => {
                format!("failed during {stage}: {message}")
            }
        };
        rendered.push_str(&format!("{}\t{status}\n", outcome.share_id));
        for failure in &outcome.teardown.failures {
            rendered.push_str(&format!("{}\tleft behind: {failure}\n", outcome.share_id));
        }
    }
    rendered.push_str(&format!(
        "{} shares: {} succeeded, {} failed, {} with leftovers\n",
        summary.outcomes.len(),
        summary.succeeded(),
        summary.failed(),
        summary.with_leftovers()
    ));
    rendered
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
