//! Exclusive lock serializing upgrade runs across processes.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fs3::FileExt;
use tracing::debug;

use crate::error::{Error, Result};

const LOCK_FILE: &str = ".lock";

/// Advisory lock on `<runs_dir>/.lock`, released on drop.
#[derive(Debug)]
pub struct RunLock {
    _file: File,
    path: PathBuf,
}

impl RunLock {
    /// Takes the lock without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRunning`] if another holder exists, or an IO
    /// error if the lock file could not be opened.
    pub fn acquire(runs_dir: &Path) -> Result<Self> {
        fs::create_dir_all(runs_dir)
            .map_err(|e| Error::Io("failed to create runs directory", e))?;

        let path = runs_dir.join(LOCK_FILE);
        let file = match OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
        {
            Ok(file) => file,
            // Created by another user; flock works on a read-only handle.
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                File::open(&path).map_err(|e| Error::Io("failed to open run lock", e))?
            }
            Err(e) => return Err(Error::Io("failed to open run lock", e)),
        };

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == fs3::lock_contended_error().raw_os_error() => {
                return Err(Error::AlreadyRunning);
            }
            Err(e) => return Err(Error::Io("failed to take run lock", e)),
        }

        debug!("holding run lock {}", path.display());

        Ok(Self { _file: file, path })
    }

    /// The lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
