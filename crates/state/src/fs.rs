//! File-backed state store.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Error, Result};
use crate::{LifecycleState, StateStore};

const FILE_MODE: u32 = 0o644;

/// Stores the lifecycle state as a single token in a file.
///
/// Writes go to a temporary file in the same directory which is then renamed
/// over the target. The file is world-readable, so health checks running as
/// the application user can read a state written by root.
#[derive(Clone, Debug)]
pub struct FsStateStore {
    path: PathBuf,
}

impl FsStateStore {
    /// Creates a store backed by the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent(&self) -> &Path {
        self.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }
}

impl StateStore for FsStateStore {
    fn get(&self) -> Result<Option<LifecycleState>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => content.parse().map(Some),
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io("error reading state file", e)),
        }
    }

    fn set(&self, state: LifecycleState) -> Result<()> {
        let dir = self.parent();
        fs::create_dir_all(dir).map_err(|e| Error::Io("error creating state directory", e))?;

        let mut file =
            NamedTempFile::new_in(dir).map_err(|e| Error::Io("error creating temp file", e))?;
        writeln!(file, "{state}").map_err(|e| Error::Io("error writing state", e))?;
        file.as_file()
            .set_permissions(fs::Permissions::from_mode(FILE_MODE))
            .map_err(|e| Error::Io("error setting state permissions", e))?;
        file.as_file()
            .sync_all()
            .map_err(|e| Error::Io("error syncing state", e))?;
        file.persist(&self.path)
            .map_err(|e| Error::Io("error replacing state file", e.error))?;

        debug!("lifecycle state is now {}", state);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempdir().unwrap();
        let store = FsStateStore::new(dir.path().join("state"));

        assert_eq!(store.get().unwrap(), None);
    }

    #[test]
    fn test_set_and_get() {
        let dir = tempdir().unwrap();
        let store = FsStateStore::new(dir.path().join("state"));

        store.set(LifecycleState::Initializing).unwrap();
        assert_eq!(store.get().unwrap(), Some(LifecycleState::Initializing));

        store.set(LifecycleState::Running).unwrap();
        assert_eq!(store.get().unwrap(), Some(LifecycleState::Running));
        assert_eq!(
            fs::read_to_string(store.path()).unwrap(),
            "RUNNING\n".to_string()
        );
    }

    #[test]
    fn test_set_creates_directories() {
        let dir = tempdir().unwrap();
        let store = FsStateStore::new(dir.path().join("nested/dir/state"));

        store.set(LifecycleState::Starting).unwrap();

        assert_eq!(store.get().unwrap(), Some(LifecycleState::Starting));
    }

    #[test]
    fn test_replace_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = FsStateStore::new(dir.path().join("state"));

        for state in LifecycleState::ALL {
            store.set(state).unwrap();
        }

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_state_file_is_readable_by_others() {
        let dir = tempdir().unwrap();
        let store = FsStateStore::new(dir.path().join("state"));

        store.set(LifecycleState::Running).unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[test]
    fn test_garbage_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state");
        fs::write(&path, "HALF_WRIT").unwrap();

        let store = FsStateStore::new(path);

        assert!(matches!(store.get(), Err(Error::UnknownState(_))));
    }
}
