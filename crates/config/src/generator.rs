//! Builds a fresh [`ConfigDocument`] from declared options and resources.

use std::fs;
use std::path::{Path, PathBuf};

use steward_resources::ResourceProfile;
use tracing::{debug, info};

use crate::document::ConfigDocument;
use crate::error::{Error, Result};
use crate::options::DeclaredOptions;

/// Option holding the comma-separated addons search path.
pub const ADDONS_PATH_KEY: &str = "addons_path";

/// Generated option: number of HTTP workers.
pub const WORKERS_KEY: &str = "workers";

/// Generated option: number of cron threads.
pub const CRON_THREADS_KEY: &str = "max_cron_threads";

/// Generated option: per-worker soft memory limit in bytes.
pub const MEM_SOFT_KEY: &str = "limit_memory_soft";

/// Generated option: per-worker hard memory limit in bytes.
pub const MEM_HARD_KEY: &str = "limit_memory_hard";

/// Option name used before the rename.
pub const LEGACY_LONGPOLLING_PORT_KEY: &str = "longpolling_port";

/// Option name used from [`RENAME_MIN_MAJOR_VERSION`] on.
pub const GEVENT_PORT_KEY: &str = "gevent_port";

/// First application major version that only understands [`GEVENT_PORT_KEY`].
pub const RENAME_MIN_MAJOR_VERSION: u32 = 16;

const ENTERPRISE_SUBDIR: &str = "enterprise";

/// Options for configuring a `ConfigGenerator`.
#[derive(Clone, Debug, Default)]
pub struct GeneratorOptions {
    /// Major version of the supervised application, if known.
    pub app_major_version: Option<u32>,

    /// Directory that addons are synced into from outside the image.
    pub synced_addons_dir: Option<PathBuf>,
}

/// Builds configuration documents.
#[derive(Clone, Debug, Default)]
pub struct ConfigGenerator {
    app_major_version: Option<u32>,
    synced_addons_dir: Option<PathBuf>,
}

impl ConfigGenerator {
    /// Creates a new `ConfigGenerator`.
    #[must_use]
    pub fn new(
        GeneratorOptions {
            app_major_version,
            synced_addons_dir,
        }: GeneratorOptions,
    ) -> Self {
        Self {
            app_major_version,
            synced_addons_dir,
        }
    }

    /// Generates the document.
    ///
    /// Declared options come first, verbatim and in order. Resource-derived
    /// keys are appended only when not declared.
    #[must_use]
    pub fn generate(&self, options: &DeclaredOptions, profile: &ResourceProfile) -> ConfigDocument {
        let mut document: ConfigDocument = options.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        self.augment_addons_path(&mut document);
        self.rename_legacy_keys(&mut document);

        let derived = [
            (WORKERS_KEY, profile.workers),
            (CRON_THREADS_KEY, profile.cron_threads),
            (MEM_SOFT_KEY, profile.mem_soft_bytes),
            (MEM_HARD_KEY, profile.mem_hard_bytes),
        ];

        for (key, value) in derived {
            if document.contains_key(key) {
                debug!("{} declared explicitly, not auto-tuning it", key);
            } else {
                document.insert(key, value.to_string());
            }
        }

        document
    }

    fn augment_addons_path(&self, document: &mut ConfigDocument) {
        let Some(synced) = self.synced_addons_dir.as_deref() else {
            return;
        };
        let Some(current) = document.get(ADDONS_PATH_KEY) else {
            return;
        };
        if !is_non_empty_dir(synced) {
            return;
        }

        let mut entries: Vec<String> = current
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .collect();

        let mut changed = false;
        for extra in [synced.to_path_buf(), synced.join(ENTERPRISE_SUBDIR)] {
            let extra = extra.to_string_lossy().to_string();
            let listed = entries
                .iter()
                .any(|e| e.trim_end_matches('/') == extra.trim_end_matches('/'));
            if !listed {
                entries.push(extra);
                changed = true;
            }
        }

        if changed {
            info!("adding synced addons from {} to addons path", synced.display());
            document.insert(ADDONS_PATH_KEY, entries.join(","));
        }
    }

    fn rename_legacy_keys(&self, document: &mut ConfigDocument) {
        let Some(major) = self.app_major_version else {
            return;
        };

        if major >= RENAME_MIN_MAJOR_VERSION
            && document.rename(LEGACY_LONGPOLLING_PORT_KEY, GEVENT_PORT_KEY)
        {
            info!(
                "renamed {} to {} for application version {}",
                LEGACY_LONGPOLLING_PORT_KEY, GEVENT_PORT_KEY, major
            );
        }
    }
}

/// Extracts the major version from strings such as `17.0`, `16` or `saas~17.2`.
///
/// # Errors
///
/// Returns an error if no leading version number can be found.
pub fn parse_major_version(version: &str) -> Result<u32> {
    let digits: String = version
        .trim()
        .trim_start_matches(|c: char| !c.is_ascii_digit())
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();

    digits
        .parse()
        .map_err(|_| Error::InvalidVersion(version.to_string()))
}

fn is_non_empty_dir(path: &Path) -> bool {
    fs::read_dir(path).is_ok_and(|mut entries| entries.next().is_some())
}
