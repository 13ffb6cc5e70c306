//! Per-database module upgrades.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use steward_process::{ServerApplication, SupervisedApplication, resolve_user};
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

const MANIFEST_FILE: &str = "__manifest__.py";
const STAMP_MODE: u32 = 0o644;

/// Result of a non-mutating pending-change check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingCheck {
    /// Whether the database needs an upgrade.
    pub pending: bool,

    /// Human-readable explanation, written to the run log.
    pub detail: String,
}

/// Result of applying an upgrade.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Whether the upgrade succeeded.
    pub success: bool,

    /// Captured output of the upgrade.
    pub log: String,
}

/// Checks and applies module upgrades for one database at a time.
#[async_trait]
pub trait ModuleUpgrader: Send + Sync + 'static {
    /// Checks `database` for pending changes without mutating it.
    ///
    /// # Errors
    ///
    /// Returns an error if the check could not run.
    async fn check(&self, database: &str) -> Result<PendingCheck>;

    /// Applies pending changes to `database`.
    ///
    /// # Errors
    ///
    /// Returns an error if the upgrade could not be started.
    async fn apply(&self, database: &str) -> Result<ApplyOutcome>;
}

/// Options for configuring `ManifestUpgrader`.
#[derive(Clone, Debug)]
pub struct ManifestUpgraderOptions {
    /// Directories containing one sub-directory per module.
    pub addons_paths: Vec<PathBuf>,

    /// The application, invoked with `-u all --stop-after-init` to upgrade.
    pub application: ServerApplication,

    /// Where per-database checksum stamps are kept.
    pub stamp_dir: PathBuf,
}

/// Detects pending changes by checksumming module manifests.
///
/// A database is up to date when the checksum over every manifest equals the
/// stamp recorded after its last successful upgrade.
#[derive(Clone, Debug)]
pub struct ManifestUpgrader {
    addons_paths: Vec<PathBuf>,
    application: ServerApplication,
    stamp_dir: PathBuf,
}

impl ManifestUpgrader {
    /// Creates a new `ManifestUpgrader`.
    #[must_use]
    pub fn new(
        ManifestUpgraderOptions {
            addons_paths,
            application,
            stamp_dir,
        }: ManifestUpgraderOptions,
    ) -> Self {
        Self {
            addons_paths,
            application,
            stamp_dir,
        }
    }

    /// Checksum over every module manifest under the addons paths.
    ///
    /// # Errors
    ///
    /// Returns an error if a manifest could not be read.
    pub fn manifest_checksum(&self) -> Result<String> {
        let mut hasher = Sha256::new();

        for addons_path in &self.addons_paths {
            let Ok(entries) = fs::read_dir(addons_path) else {
                debug!("skipping unreadable addons path {}", addons_path.display());
                continue;
            };

            let mut modules: Vec<PathBuf> = entries
                .filter_map(std::result::Result::ok)
                .map(|entry| entry.path())
                .filter(|path| is_module_dir(path))
                .collect();
            modules.sort();

            for module in modules {
                let manifest = fs::read(module.join(MANIFEST_FILE))
                    .map_err(|e| Error::Io("failed to read module manifest", e))?;

                hasher.update(module.to_string_lossy().as_bytes());
                hasher.update([0]);
                hasher.update(&manifest);
                hasher.update([0]);
            }
        }

        Ok(format!("{:x}", hasher.finalize()))
    }

    fn stamp_path(&self, database: &str) -> PathBuf {
        self.stamp_dir
            .join(format!("{}.sha256", encode_file_name(database)))
    }

    fn read_stamp(&self, database: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.stamp_path(database)) {
            Ok(stamp) => Ok(Some(stamp.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io("failed to read upgrade stamp", e)),
        }
    }

    fn write_stamp(&self, database: &str, checksum: &str) -> Result<()> {
        fs::create_dir_all(&self.stamp_dir)
            .map_err(|e| Error::Io("failed to create stamp directory", e))?;

        let mut file = NamedTempFile::new_in(&self.stamp_dir)
            .map_err(|e| Error::Io("failed to create temp file", e))?;
        writeln!(file, "{checksum}").map_err(|e| Error::Io("failed to write stamp", e))?;
        file.as_file()
            .set_permissions(fs::Permissions::from_mode(STAMP_MODE))
            .map_err(|e| Error::Io("failed to set stamp permissions", e))?;
        file.persist(self.stamp_path(database))
            .map_err(|e| Error::Io("failed to replace stamp", e.error))?;

        Ok(())
    }

    fn upgrade_command(&self, database: &str) -> Result<Command> {
        let application = self.application.with_extra_args([
            "-d",
            database,
            "-u",
            "all",
            "--stop-after-init",
        ]);

        let mut cmd = Command::new(application.executable());
        cmd.args(application.args());
        cmd.envs(application.env());
        cmd.stdin(Stdio::null());

        if let Some(user) = application.user() {
            let (uid, gid) = resolve_user(user)?;
            cmd.uid(uid.as_raw());
            cmd.gid(gid.as_raw());
        }

        Ok(cmd)
    }
}

#[async_trait]
impl ModuleUpgrader for ManifestUpgrader {
    async fn check(&self, database: &str) -> Result<PendingCheck> {
        let current = self.manifest_checksum()?;
        let recorded = self.read_stamp(database)?;

        let check = match recorded {
            Some(recorded) if recorded == current => PendingCheck {
                pending: false,
                detail: format!("manifest checksum {current} matches last upgrade\n"),
            },
            Some(recorded) => PendingCheck {
                pending: true,
                detail: format!("manifest checksum {current} differs from {recorded}\n"),
            },
            None => PendingCheck {
                pending: true,
                detail: format!("no upgrade recorded, manifest checksum {current}\n"),
            },
        };

        Ok(check)
    }

    async fn apply(&self, database: &str) -> Result<ApplyOutcome> {
        let checksum = self.manifest_checksum()?;

        info!("upgrading all modules of {}", database);

        let output = self
            .upgrade_command(database)?
            .output()
            .await
            .map_err(|e| Error::Io("failed to run upgrade", e))?;

        let mut log = String::from_utf8_lossy(&output.stdout).to_string();
        log.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            if let Err(e) = self.write_stamp(database, &checksum) {
                warn!("upgraded {} but could not record its stamp: {}", database, e);
            }
        } else {
            warn!("upgrade of {} exited with {}", database, output.status);
        }

        Ok(ApplyOutcome {
            success: output.status.success(),
            log,
        })
    }
}

fn is_module_dir(path: &Path) -> bool {
    path.join(MANIFEST_FILE).is_file()
}

/// Maps a database name onto a file name, percent-encoding every byte outside
/// `[A-Za-z0-9._-]`. Distinct names give distinct file names.
pub(crate) fn encode_file_name(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

/// Returns the addons search path entries from a comma-separated value.
#[must_use]
pub fn split_addons_path(value: &str) -> Vec<PathBuf> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(PathBuf::from)
        .collect()
}
