//! Detection, tuning, and config generation as one step.

use std::os::unix::fs::chown;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::unistd::Uid;
use steward_config::{ConfigDocument, ConfigGenerator, OptionSource};
use steward_process::resolve_user;
use steward_resources::{
    Detector, ResourceOverrides, ResourceProfile, ResourceReading, TuningBounds,
};
use tracing::{info, warn};

use crate::error::Result;

/// Options for configuring a `Configurator`.
pub struct ConfiguratorOptions {
    /// Soft memory band.
    pub bounds: TuningBounds,

    /// Where the generated file is written.
    pub config_path: PathBuf,

    /// Resource detector.
    pub detector: Arc<dyn Detector>,

    /// Document generator.
    pub generator: ConfigGenerator,

    /// Declared application options.
    pub options: Arc<dyn OptionSource>,

    /// Pinned profile fields.
    pub overrides: ResourceOverrides,

    /// User the written file is handed to when running as root.
    pub owner: Option<String>,
}

/// Turns a resource reading into a written configuration file.
pub struct Configurator {
    bounds: TuningBounds,
    config_path: PathBuf,
    detector: Arc<dyn Detector>,
    generator: ConfigGenerator,
    options: Arc<dyn OptionSource>,
    overrides: ResourceOverrides,
    owner: Option<String>,
}

impl Configurator {
    /// Creates a new `Configurator`.
    #[must_use]
    pub fn new(
        ConfiguratorOptions {
            bounds,
            config_path,
            detector,
            generator,
            options,
            overrides,
            owner,
        }: ConfiguratorOptions,
    ) -> Self {
        Self {
            bounds,
            config_path,
            detector,
            generator,
            options,
            overrides,
            owner,
        }
    }

    /// Path of the generated file.
    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Runs a detection pass.
    #[must_use]
    pub fn detect(&self) -> ResourceReading {
        self.detector.detect()
    }

    /// Derives the profile for `reading`.
    #[must_use]
    pub fn profile(&self, reading: ResourceReading) -> ResourceProfile {
        ResourceProfile::derive(reading, &self.overrides, &self.bounds)
    }

    /// Builds the document for `profile` from freshly read options.
    #[must_use]
    pub fn document(&self, profile: &ResourceProfile) -> ConfigDocument {
        self.generator.generate(&self.options.options(), profile)
    }

    /// Derives the profile for `reading` and writes its document.
    ///
    /// # Errors
    ///
    /// Returns an error if the file could not be written.
    pub fn write(&self, reading: ResourceReading) -> Result<ResourceProfile> {
        let profile = self.profile(reading);
        self.document(&profile).write_to(&self.config_path)?;
        self.hand_over();

        info!(
            "configured for {} cpu(s), {} bytes: {} workers, {} cron threads, soft {} / hard {}",
            profile.cpu_count,
            profile.ram_bytes,
            profile.workers,
            profile.cron_threads,
            profile.mem_soft_bytes,
            profile.mem_hard_bytes
        );

        Ok(profile)
    }

    fn hand_over(&self) {
        let Some(user) = &self.owner else {
            return;
        };
        if !Uid::effective().is_root() {
            return;
        }

        let result = resolve_user(user).map(|(uid, gid)| {
            chown(&self.config_path, Some(uid.as_raw()), Some(gid.as_raw()))
        });
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("failed to chown {}: {}", self.config_path.display(), e),
            Err(e) => warn!("cannot hand config to {}: {}", user, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    use nix::unistd::User;
    use pretty_assertions::assert_eq;
    use steward_config::DeclaredOptions;

    struct Fixed(ResourceReading);

    impl Detector for Fixed {
        fn detect(&self) -> ResourceReading {
            self.0
        }
    }

    #[test]
    fn test_write_renders_declared_then_derived() {
        let dir = tempfile::tempdir().unwrap();
        let mut declared = DeclaredOptions::new();
        declared.insert("db_host".to_string(), "db".to_string());
        declared.insert("max_cron_threads".to_string(), "0".to_string());

        let configurator = Configurator::new(ConfiguratorOptions {
            bounds: TuningBounds::default(),
            config_path: dir.path().join("app.conf"),
            detector: Arc::new(Fixed(ResourceReading {
                cpu_count: 2,
                ram_bytes: 4 << 30,
            })),
            generator: ConfigGenerator::default(),
            options: Arc::new(declared),
            overrides: ResourceOverrides {
                workers: Some(3),
                ..ResourceOverrides::default()
            },
            owner: None,
        });

        let profile = configurator.write(configurator.detect()).unwrap();

        assert_eq!(profile.workers, 3);
        assert_eq!(
            fs::read_to_string(dir.path().join("app.conf")).unwrap(),
            format!(
                "[options]\ndb_host = db\nmax_cron_threads = 0\nworkers = 3\nlimit_memory_soft = {}\nlimit_memory_hard = {}\n",
                profile.mem_soft_bytes, profile.mem_hard_bytes
            )
        );
    }

    #[test]
    fn test_written_config_is_readable_by_owner() {
        let dir = tempfile::tempdir().unwrap();
        let me = User::from_uid(Uid::effective()).unwrap().unwrap();

        let configurator = Configurator::new(ConfiguratorOptions {
            bounds: TuningBounds::default(),
            config_path: dir.path().join("app.conf"),
            detector: Arc::new(Fixed(ResourceReading {
                cpu_count: 1,
                ram_bytes: 2 << 30,
            })),
            generator: ConfigGenerator::default(),
            options: Arc::new(DeclaredOptions::new()),
            overrides: ResourceOverrides::default(),
            owner: Some(me.name),
        });

        configurator.write(configurator.detect()).unwrap();

        let metadata = fs::metadata(dir.path().join("app.conf")).unwrap();
        assert_eq!(metadata.permissions().mode() & 0o777, 0o644);
        assert_eq!(metadata.uid(), me.uid.as_raw());
    }
}
