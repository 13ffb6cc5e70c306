//! Installs Python requirements shipped with add-on directories.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Requirements file looked for in each directory.
pub const REQUIREMENTS_FILE: &str = "requirements.txt";

/// Options for configuring a `PackageInstaller`.
#[derive(Clone, Debug)]
pub struct PackageInstallerOptions {
    /// Installer executable, invoked as `<pip> install -r <file>`.
    pub pip: String,

    /// Directories that may contain a requirements file.
    pub requirement_dirs: Vec<PathBuf>,

    /// Where content stamps of installed files are kept.
    pub stamp_dir: PathBuf,
}

/// Installs each directory's requirements once per content version.
#[derive(Clone, Debug)]
pub struct PackageInstaller {
    pip: String,
    requirement_dirs: Vec<PathBuf>,
    stamp_dir: PathBuf,
}

impl PackageInstaller {
    /// Creates a new `PackageInstaller`.
    #[must_use]
    pub fn new(
        PackageInstallerOptions {
            pip,
            requirement_dirs,
            stamp_dir,
        }: PackageInstallerOptions,
    ) -> Self {
        Self {
            pip,
            requirement_dirs,
            stamp_dir,
        }
    }

    /// Installs every changed requirements file and returns how many were
    /// installed. Failures are logged and leave the stamp untouched, so the
    /// next start retries.
    pub async fn install(&self) -> usize {
        let mut installed = 0;

        for dir in &self.requirement_dirs {
            let file = dir.join(REQUIREMENTS_FILE);
            let Ok(contents) = fs::read(&file) else {
                debug!("no {} in {}", REQUIREMENTS_FILE, dir.display());
                continue;
            };

            let checksum = format!("{:x}", Sha256::digest(&contents));
            let stamp = self.stamp_path(dir);
            if fs::read_to_string(&stamp).is_ok_and(|s| s.trim() == checksum) {
                debug!("requirements in {} already installed", dir.display());
                continue;
            }

            if self.run_pip(&file).await {
                installed += 1;
                if let Err(e) = write_stamp(&stamp, &checksum) {
                    warn!("failed to record install of {}: {}", file.display(), e);
                }
            }
        }

        installed
    }

    async fn run_pip(&self, file: &Path) -> bool {
        info!("installing requirements from {}", file.display());

        let output = match Command::new(&self.pip)
            .arg("install")
            .arg("-r")
            .arg(file)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!("failed to run {}: {}", self.pip, e);
                return false;
            }
        };

        if output.status.success() {
            true
        } else {
            warn!(
                "installing {} failed ({}): {}",
                file.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            false
        }
    }

    fn stamp_path(&self, dir: &Path) -> PathBuf {
        let key = format!("{:x}", Sha256::digest(dir.to_string_lossy().as_bytes()));
        self.stamp_dir.join(format!("requirements-{}.sha256", &key[..16]))
    }
}

fn write_stamp(path: &Path, checksum: &str) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mut file = NamedTempFile::new_in(dir)?;
    writeln!(file, "{checksum}")?;
    file.persist(path).map_err(|e| e.error)?;

    Ok(())
}
