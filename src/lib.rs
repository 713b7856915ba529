//! Core library for the sharesnap backup tool.
//!
//! Each network file share is copied onto a fresh block volume attached to a
//! short-lived instance, the volume is snapshotted, and every resource
//! created along the way is released again. Cloud access sits behind the
//! capability traits in [`backend`]; [`scaleway`] implements them against the
//! Scaleway APIs and [`test_support`] provides in-memory doubles.

pub mod backend;
pub mod command;
pub mod compute;
pub mod config;
pub mod copy;
pub mod credential;
pub mod enumerate;
pub mod keystore;
pub mod network;
pub mod retry;
pub mod run;
pub mod scaleway;
pub mod snapshot;
pub mod ssh;
pub mod teardown;
pub mod test_support;
pub mod units;

pub use backend::{Backend, CloudBackend, ShareVolume, TransientError};
pub use command::{CommandOutput, CommandRunner, ProcessCommandRunner};
pub use config::{BackupConfig, ConfigError, ScalewayConfig};
pub use keystore::{DirKeyStore, KeyStore};
pub use run::{RunContext, RunController, RunSummary, VolumeOutcome, VolumeStatus, WorkflowSettings};
pub use scaleway::{ScalewayBackend, ScalewayBackendError};
pub use ssh::{SshConnector, SshOptions};
