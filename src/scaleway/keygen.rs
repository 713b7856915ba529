//! Local key pair generation with `ssh-keygen`.
//!
//! The key is written into a scratch directory under the system temp
//! directory, read back, and the directory removed before returning.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use uuid::Uuid;

use crate::command::CommandRunner;

use super::ScalewayBackendError;

const KEY_FILE: &str = "key";
const PUBLIC_KEY_FILE: &str = "key.pub";

/// Freshly generated key material.
#[derive(Clone, Eq, PartialEq)]
pub(super) struct GeneratedKey {
    pub(super) public_key: String,
    pub(super) private_key: String,
}

#[derive(Clone, Debug)]
pub(super) struct KeyGenerator<R> {
    program: String,
    scratch_root: Utf8PathBuf,
    runner: R,
}

impl<R: CommandRunner> KeyGenerator<R> {
    pub(super) fn new(program: impl Into<String>, scratch_root: Utf8PathBuf, runner: R) -> Self {
        Self {
            program: program.into(),
            scratch_root,
            runner,
        }
    }

    /// Generates an ed25519 key pair commented with `name`.
    pub(super) fn generate(&self, name: &str) -> Result<GeneratedKey, ScalewayBackendError> {
        let scratch_name = format!("sharesnap-keygen-{}", Uuid::new_v4().simple());
        let root = Dir::open_ambient_dir(&self.scratch_root, ambient_authority())
            .map_err(|err| io_failure(&self.scratch_root, &err))?;
        root.create_dir(&scratch_name)
            .map_err(|err| io_failure(&self.scratch_root, &err))?;

        let scratch = self.scratch_root.join(&scratch_name);
        let generated = self.generate_in(&root, &scratch_name, &scratch, name);
        let cleanup = root
            .remove_dir_all(&scratch_name)
            .map_err(|err| io_failure(&scratch, &err));
        let key = generated?;
        cleanup?;
        Ok(key)
    }

    fn generate_in(
        &self,
        root: &Dir,
        scratch_name: &str,
        scratch: &Utf8Path,
        name: &str,
    ) -> Result<GeneratedKey, ScalewayBackendError> {
        let key_path = scratch.join(KEY_FILE);
        let args: Vec<OsString> = [
            "-q", "-t", "ed25519", "-N", "", "-C", name, "-f", key_path.as_str(),
        ]
        .into_iter()
        .map(OsString::from)
        .collect();
        let output = self.runner.run(&self.program, &args)?;
        if !output.is_success() {
            return Err(ScalewayBackendError::KeyGeneration {
                message: format!(
                    "{} exited with status {}: {}",
                    self.program,
                    output.status_text(),
                    output.stderr.trim()
                ),
            });
        }

        let dir = root
            .open_dir(scratch_name)
            .map_err(|err| io_failure(scratch, &err))?;
        let private_key = dir
            .read_to_string(KEY_FILE)
            .map_err(|err| io_failure(&key_path, &err))?;
        let public_key = dir
            .read_to_string(PUBLIC_KEY_FILE)
            .map_err(|err| io_failure(&scratch.join(PUBLIC_KEY_FILE), &err))?;
        Ok(GeneratedKey {
            public_key: public_key.trim().to_owned(),
            private_key,
        })
    }
}

fn io_failure(path: &Utf8Path, err: &std::io::Error) -> ScalewayBackendError {
    ScalewayBackendError::KeyGeneration {
        message: format!("{path}: {err}"),
    }
}
