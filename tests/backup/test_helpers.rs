//! Shared fixtures for backup BDD scenarios.

use std::sync::Arc;

use camino::Utf8PathBuf;
use rstest::fixture;
use sharesnap::test_support::{FakeCloud, FakeRemote};
use sharesnap::{RunSummary, VolumeOutcome};
use tempfile::TempDir;

#[derive(Clone, Debug)]
pub struct BackupContext {
    pub cloud: FakeCloud,
    pub remote: FakeRemote,
    pub summary: Option<RunSummary>,
    key_tmp: Arc<TempDir>,
}

#[fixture]
pub fn backup_context() -> BackupContext {
    let key_tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    BackupContext {
        cloud: FakeCloud::new(),
        remote: FakeRemote::new(),
        summary: None,
        key_tmp: Arc::new(key_tmp),
    }
}

impl BackupContext {
    /// Directory the run writes private keys into.
    pub fn key_root(&self) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.key_tmp.path().join("keys"))
            .unwrap_or_else(|path| panic!("non-utf8 tempdir: {}", path.display()))
    }

    /// Private key files still on disk.
    pub fn key_files(&self) -> usize {
        std::fs::read_dir(self.key_root()).map_or(0, Iterator::count)
    }

    pub fn outcome(&self, share_id: &str) -> Option<&VolumeOutcome> {
        self.summary
            .as_ref()?
            .outcomes
            .iter()
            .find(|outcome| outcome.share_id == share_id)
    }
}
