//! Settings shared by every subcommand, and the components built from them.

use crate::error::Result;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use steward_config::{
    ADDONS_PATH_KEY, ConfigGenerator, EnvOptionSource, GeneratorOptions, parse_major_version,
};
use steward_health::{HealthReporter, HealthReporterOptions, HttpProbe};
use steward_process::{
    ServerApplication, ServerApplicationOptions, SignalSuspender, SysinfoProcessFinder,
};
use steward_resources::{
    CgroupDetector, DEFAULT_MEM_SOFT_MAX_BYTES, DEFAULT_MEM_SOFT_MIN_BYTES, ResourceOverrides,
    TuningBounds,
};
use steward_state::FsStateStore;
use steward_supervisor::{Configurator, ConfiguratorOptions};
use steward_upgrade::{
    ManifestUpgrader, ManifestUpgraderOptions, PsqlDatabaseService, PsqlDatabaseServiceOptions,
    RunStore, UpgradeCoordinator, UpgradeCoordinatorOptions, split_addons_path,
};
use tracing::{Level, debug};

#[derive(Clone, Debug, Args)]
pub struct Settings {
    /// Application executable
    #[arg(long, default_value = "odoo", env = "STEWARD_APP_BINARY", global = true)]
    pub app_binary: String,

    /// Extra argument passed to the application (repeatable)
    #[arg(long = "app-arg", env = "STEWARD_APP_ARGS", value_delimiter = ' ', global = true)]
    pub app_args: Vec<String>,

    /// User the application runs as and owns its directories
    #[arg(long, env = "STEWARD_APP_USER", global = true)]
    pub app_user: Option<String>,

    /// Application version, e.g. 17.0
    #[arg(long, env = "STEWARD_APP_VERSION", global = true)]
    pub app_version: Option<String>,

    /// Root of the cgroup filesystem
    #[arg(long, default_value = "/sys/fs/cgroup", env = "STEWARD_CGROUP_ROOT", global = true)]
    pub cgroup_root: PathBuf,

    /// Generated configuration file
    #[arg(long, default_value = "/etc/steward/app.conf", env = "STEWARD_CONFIG_PATH", global = true)]
    pub config_path: PathBuf,

    /// Pinned CPU count
    #[arg(long, env = "STEWARD_CPU_COUNT", global = true)]
    pub cpu_count: Option<u64>,

    /// Pinned cron thread count
    #[arg(long, env = "STEWARD_CRON_THREADS", global = true)]
    pub cron_threads: Option<u64>,

    /// Application data directory
    #[arg(long, default_value = "/var/lib/app", env = "STEWARD_DATA_DIR", global = true)]
    pub data_dir: PathBuf,

    /// Database host
    #[arg(long, env = "STEWARD_DB_HOST", global = true)]
    pub db_host: Option<String>,

    /// Database password; `PGPASSWORD` is inherited when unset
    #[arg(long, env = "STEWARD_DB_PASSWORD", hide_env_values = true, global = true)]
    pub db_password: Option<String>,

    /// Database port
    #[arg(long, env = "STEWARD_DB_PORT", global = true)]
    pub db_port: Option<u16>,

    /// Database readiness attempts
    #[arg(long, default_value_t = 30, env = "STEWARD_DB_READY_ATTEMPTS", global = true)]
    pub db_ready_attempts: u32,

    /// Seconds between database readiness attempts
    #[arg(long, default_value_t = 2, env = "STEWARD_DB_READY_INTERVAL_SECS", global = true)]
    pub db_ready_interval_secs: u64,

    /// Database user
    #[arg(long, env = "STEWARD_DB_USER", global = true)]
    pub db_user: Option<String>,

    /// Health endpoint of the application
    #[arg(
        long,
        default_value = "http://127.0.0.1:8069/web/health",
        env = "STEWARD_HEALTH_URL",
        global = true
    )]
    pub health_url: String,

    /// Health endpoint timeout in seconds
    #[arg(long, default_value_t = 5, env = "STEWARD_HEALTH_TIMEOUT_SECS", global = true)]
    pub health_timeout_secs: u64,

    /// Log level
    #[arg(long, default_value_t = Level::INFO, env = "STEWARD_LOG_LEVEL", global = true)]
    pub log_level: Level,

    /// Pinned hard memory limit in bytes
    #[arg(long, env = "STEWARD_MEM_HARD_BYTES", global = true)]
    pub mem_hard_bytes: Option<u64>,

    /// Pinned soft memory limit in bytes
    #[arg(long, env = "STEWARD_MEM_SOFT_BYTES", global = true)]
    pub mem_soft_bytes: Option<u64>,

    /// Upper bound of the derived soft memory limit
    #[arg(long, default_value_t = DEFAULT_MEM_SOFT_MAX_BYTES, env = "STEWARD_MEM_SOFT_MAX_BYTES", global = true)]
    pub mem_soft_max_bytes: u64,

    /// Lower bound of the derived soft memory limit
    #[arg(long, default_value_t = DEFAULT_MEM_SOFT_MIN_BYTES, env = "STEWARD_MEM_SOFT_MIN_BYTES", global = true)]
    pub mem_soft_min_bytes: u64,

    /// Prefix of environment variables declaring application options
    #[arg(long, default_value = "APP_OPT_", env = "STEWARD_OPTION_PREFIX", global = true)]
    pub option_prefix: String,

    /// Pinned memory in bytes
    #[arg(long, env = "STEWARD_RAM_BYTES", global = true)]
    pub ram_bytes: Option<u64>,

    /// Upgrade run records directory
    #[arg(long, default_value = "/var/lib/steward/upgrades", env = "STEWARD_RUNS_DIR", global = true)]
    pub runs_dir: PathBuf,

    /// Upgrade runs kept
    #[arg(long, default_value_t = 10, env = "STEWARD_RUNS_RETAINED", global = true)]
    pub runs_retained: usize,

    /// Install and upgrade stamps directory
    #[arg(long, default_value = "/var/lib/steward/stamps", env = "STEWARD_STAMPS_DIR", global = true)]
    pub stamps_dir: PathBuf,

    /// Lifecycle state file
    #[arg(long, default_value = "/var/lib/steward/state", env = "STEWARD_STATE_FILE", global = true)]
    pub state_file: PathBuf,

    /// Directory of add-ons synced at runtime
    #[arg(long, default_value = "/mnt/synced-addons", env = "STEWARD_SYNCED_ADDONS_DIR", global = true)]
    pub synced_addons_dir: PathBuf,

    /// Pinned worker count
    #[arg(long, env = "STEWARD_WORKERS", global = true)]
    pub workers: Option<u64>,
}

impl Settings {
    pub fn state(&self) -> Arc<FsStateStore> {
        Arc::new(FsStateStore::new(&self.state_file))
    }

    pub fn application(&self) -> ServerApplication {
        ServerApplication::new(ServerApplicationOptions {
            config_path: self.config_path.clone(),
            env: Vec::new(),
            executable: self.app_binary.clone(),
            extra_args: self.app_args.clone(),
            user: self.app_user.clone(),
        })
    }

    pub fn configurator(&self) -> Result<Configurator> {
        let app_major_version = self
            .app_version
            .as_deref()
            .map(parse_major_version)
            .transpose()?;

        Ok(Configurator::new(ConfiguratorOptions {
            bounds: TuningBounds::new(self.mem_soft_min_bytes, self.mem_soft_max_bytes),
            config_path: self.config_path.clone(),
            detector: Arc::new(CgroupDetector::new(&self.cgroup_root)),
            generator: ConfigGenerator::new(GeneratorOptions {
                app_major_version,
                synced_addons_dir: Some(self.synced_addons_dir.clone()),
            }),
            options: Arc::new(EnvOptionSource::new(&self.option_prefix)),
            overrides: ResourceOverrides {
                cpu_count: self.cpu_count,
                ram_bytes: self.ram_bytes,
                workers: self.workers,
                cron_threads: self.cron_threads,
                mem_soft_bytes: self.mem_soft_bytes,
                mem_hard_bytes: self.mem_hard_bytes,
            },
            owner: self.app_user.clone(),
        }))
    }

    pub fn database(&self) -> Arc<PsqlDatabaseService> {
        Arc::new(PsqlDatabaseService::new(PsqlDatabaseServiceOptions {
            host: self.db_host.clone(),
            password: self.db_password.clone(),
            port: self.db_port,
            user: self.db_user.clone(),
        }))
    }

    pub const fn database_interval(&self) -> Duration {
        Duration::from_secs(self.db_ready_interval_secs)
    }

    pub fn finder(&self) -> Arc<SysinfoProcessFinder> {
        Arc::new(SysinfoProcessFinder::new(&self.app_binary))
    }

    pub fn health_reporter(&self) -> HealthReporter {
        HealthReporter::new(HealthReporterOptions {
            finder: self.finder(),
            probe: Arc::new(HttpProbe::new(
                self.health_url.clone(),
                Duration::from_secs(self.health_timeout_secs),
            )),
            state: self.state(),
        })
    }

    /// Builds the coordinator, scanning the add-on paths the generated
    /// configuration would list.
    pub fn coordinator(&self, configurator: &Configurator) -> UpgradeCoordinator {
        let profile = configurator.profile(configurator.detect());
        let addons_paths = configurator
            .document(&profile)
            .get(ADDONS_PATH_KEY)
            .map(split_addons_path)
            .unwrap_or_default();
        debug!("scanning add-on paths {:?}", addons_paths);

        UpgradeCoordinator::new(UpgradeCoordinatorOptions {
            database: self.database(),
            finder: self.finder(),
            runs: RunStore::new(&self.runs_dir, self.runs_retained),
            state: self.state(),
            suspender: Arc::new(SignalSuspender),
            upgrader: Arc::new(ManifestUpgrader::new(ManifestUpgraderOptions {
                addons_paths,
                application: self.application(),
                stamp_dir: self.stamps_dir.clone(),
            })),
        })
    }
}
