//! Local storage for ephemeral private keys.
//!
//! Keys are written with owner-only permissions into a single directory
//! opened through `cap-std`, so the store cannot touch paths outside it.
//! Key files are created with their final mode and never exist with wider
//! permissions.

use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs::Permissions;
use cap_std::fs_utf8::{Dir, File, OpenOptions};
use thiserror::Error;

#[cfg(unix)]
use cap_std::fs_utf8::OpenOptionsExt;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

const PRIVATE_KEY_MODE: u32 = 0o600;
const KEY_EXTENSION: &str = "pem";

/// Errors raised by key stores.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum KeyStoreError {
    /// Raised when the key directory or file cannot be accessed.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path being accessed.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a key name would escape the key directory.
    #[error("invalid key name '{0}'")]
    InvalidName(String),
}

/// Persists and removes private key files.
pub trait KeyStore {
    /// Writes `private_key` for `name`, replacing any existing file, and
    /// returns the absolute path of the written file.
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreError`] when the file cannot be written.
    fn write_private_key(&self, name: &str, private_key: &[u8])
    -> Result<Utf8PathBuf, KeyStoreError>;

    /// Deletes the key file at `path`. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreError`] when the file exists but cannot be removed.
    fn delete_private_key(&self, path: &Utf8Path) -> Result<(), KeyStoreError>;
}

/// Key store backed by a local directory.
#[derive(Clone, Debug)]
pub struct DirKeyStore {
    root: Utf8PathBuf,
}

impl DirKeyStore {
    /// Creates a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreError::Io`] when the directory cannot be created or
    /// resolved to an absolute path.
    pub fn new(root: impl AsRef<Utf8Path>) -> Result<Self, KeyStoreError> {
        let requested = root.as_ref();
        Dir::create_ambient_dir_all(requested, ambient_authority())
            .map_err(|err| io_error(requested, &err))?;
        let canonical = requested
            .canonicalize_utf8()
            .map_err(|err| io_error(requested, &err))?;
        Ok(Self { root: canonical })
    }

    /// Directory holding the key files.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn open(&self) -> Result<Dir, KeyStoreError> {
        Dir::open_ambient_dir(&self.root, ambient_authority())
            .map_err(|err| io_error(&self.root, &err))
    }

    fn file_name(name: &str) -> Result<String, KeyStoreError> {
        let trimmed = name.trim();
        if trimmed.is_empty()
            || trimmed.starts_with('.')
            || trimmed.contains(['/', '\\'])
            || trimmed.contains('\0')
        {
            return Err(KeyStoreError::InvalidName(name.to_owned()));
        }
        Ok(format!("{trimmed}.{KEY_EXTENSION}"))
    }
}

impl KeyStore for DirKeyStore {
    fn write_private_key(
        &self,
        name: &str,
        private_key: &[u8],
    ) -> Result<Utf8PathBuf, KeyStoreError> {
        let file_name = Self::file_name(name)?;
        let path = self.root.join(&file_name);
        let dir = self.open()?;

        if dir
            .try_exists(&file_name)
            .map_err(|err| io_error(&path, &err))?
        {
            dir.remove_file(&file_name)
                .map_err(|err| io_error(&path, &err))?;
        }
        let mut file = create_private(&dir, &file_name).map_err(|err| io_error(&path, &err))?;
        file.write_all(private_key)
            .map_err(|err| io_error(&path, &err))?;
        restrict_permissions(&dir, &file_name).map_err(|err| io_error(&path, &err))?;
        Ok(path)
    }

    fn delete_private_key(&self, path: &Utf8Path) -> Result<(), KeyStoreError> {
        let relative = path
            .strip_prefix(&self.root)
            .map_err(|_| KeyStoreError::InvalidName(path.to_string()))?;
        let dir = self.open()?;
        match dir.remove_file(relative) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(path, &err)),
        }
    }
}

/// Creates `file_name`, failing if it exists, with owner-only mode from the
/// first moment it is visible.
fn create_private(dir: &Dir, file_name: &str) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(PRIVATE_KEY_MODE);
    dir.open_with(file_name, &options)
}

#[cfg(unix)]
fn restrict_permissions(dir: &Dir, file_name: &str) -> std::io::Result<()> {
    let permissions = Permissions::from_std(std::fs::Permissions::from_mode(PRIVATE_KEY_MODE));
    dir.set_permissions(file_name, permissions)
}

#[cfg(not(unix))]
fn restrict_permissions(dir: &Dir, file_name: &str) -> std::io::Result<()> {
    let mut permissions = dir.metadata(file_name)?.permissions();
    permissions.set_readonly(false);
    dir.set_permissions(file_name, permissions)
}

fn io_error(path: &Utf8Path, err: &std::io::Error) -> KeyStoreError {
    KeyStoreError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct StoreFixture {
        _tmp: TempDir,
        store: DirKeyStore,
    }

    #[fixture]
    fn fixture() -> StoreFixture {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(tmp.path().join("keys"))
            .unwrap_or_else(|path| panic!("non-utf8 tempdir: {}", path.display()));
        let store = DirKeyStore::new(&root).unwrap_or_else(|err| panic!("key store: {err}"));
        StoreFixture { _tmp: tmp, store }
    }

    #[rstest]
    fn writes_key_with_owner_only_permissions(fixture: StoreFixture) {
        let path = fixture
            .store
            .write_private_key("ephemeral", b"key-material")
            .expect("write key");

        assert_eq!(path, fixture.store.root().join("ephemeral.pem"));
        let contents = std::fs::read(&path).expect("read key");
        assert_eq!(contents, b"key-material");

        #[cfg(unix)]
        {
            let mode = std::fs::metadata(&path)
                .expect("metadata")
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, PRIVATE_KEY_MODE);
        }
    }

    #[cfg(unix)]
    #[rstest]
    fn key_files_start_out_owner_only(fixture: StoreFixture) {
        let dir = fixture.store.open().expect("open store");

        let _file = create_private(&dir, "fresh.pem").expect("create key file");

        let mode = std::fs::metadata(fixture.store.root().join("fresh.pem"))
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o077, 0, "group or other bits set: {mode:o}");
    }

    #[cfg(unix)]
    #[rstest]
    fn replaces_a_world_readable_file(fixture: StoreFixture) {
        let path = fixture.store.root().join("ephemeral.pem");
        std::fs::write(&path, b"stale").expect("seed stale key");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))
            .expect("widen stale key");

        fixture
            .store
            .write_private_key("ephemeral", b"fresh")
            .expect("write key");

        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, PRIVATE_KEY_MODE);
        assert_eq!(std::fs::read(&path).expect("read key"), b"fresh");
    }

    #[rstest]
    fn overwrites_existing_key(fixture: StoreFixture) {
        fixture
            .store
            .write_private_key("ephemeral", b"first")
            .expect("first write");
        let path = fixture
            .store
            .write_private_key("ephemeral", b"second")
            .expect("second write");
        assert_eq!(std::fs::read(&path).expect("read key"), b"second");
    }

    #[rstest]
    fn delete_is_idempotent(fixture: StoreFixture) {
        let path = fixture
            .store
            .write_private_key("ephemeral", b"key")
            .expect("write key");

        fixture.store.delete_private_key(&path).expect("first delete");
        assert!(!path.exists());
        fixture
            .store
            .delete_private_key(&path)
            .expect("second delete should be a no-op");
    }

    #[rstest]
    #[case("")]
    #[case("../escape")]
    #[case(".hidden")]
    #[case("nested/key")]
    fn rejects_names_escaping_the_directory(fixture: StoreFixture, #[case] name: &str) {
        let err = fixture
            .store
            .write_private_key(name, b"key")
            .expect_err("name should be rejected");
        assert_eq!(err, KeyStoreError::InvalidName(name.to_owned()));
    }

    #[rstest]
    fn delete_rejects_paths_outside_the_store(fixture: StoreFixture) {
        let err = fixture
            .store
            .delete_private_key(Utf8Path::new("/etc/passwd"))
            .expect_err("outside path should be rejected");
        assert!(matches!(err, KeyStoreError::InvalidName(_)));
    }
}
