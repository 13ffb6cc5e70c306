//! Phased startup and the long-running supervision of the application.

mod step_01_starting;
mod step_02_initializing;
mod step_03_upgrading;
mod step_04_running;

use crate::configurator::Configurator;
use crate::error::Result;
use crate::installer::PackageInstaller;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use steward_process::ServerApplication;
use steward_resources::ResourceReading;
use steward_state::StateStore;
use steward_upgrade::{DatabaseService, UpgradeCoordinator};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default grace period between SIGTERM and SIGKILL.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(30);

/// Exit code when shutdown interrupts startup, as for a SIGTERM'd process.
pub const INTERRUPTED_EXIT_CODE: i32 = 143;

/// How the application runs once startup is complete.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    /// The supervisor replaces itself with the application.
    #[default]
    Direct,

    /// The supervisor stays as parent, watches resources, and restarts the
    /// application when they change.
    Managed,
}

/// A database created on first start.
#[derive(Clone, Debug)]
pub struct DatabaseInit {
    /// Comma-separated modules installed into it.
    pub modules: String,

    /// Database name.
    pub name: String,
}

/// Options for configuring a `Supervisor`.
pub struct SupervisorOptions {
    /// The application server.
    pub application: ServerApplication,

    /// Writes the application's configuration.
    pub configurator: Arc<Configurator>,

    /// The database service the application depends on.
    pub database: Arc<dyn DatabaseService>,

    /// Readiness attempts before giving up.
    pub database_attempts: u32,

    /// Delay between readiness attempts.
    pub database_interval: Duration,

    /// Directories created, and handed to the application user, on start.
    pub directories: Vec<PathBuf>,

    /// Database to create on first start, if any.
    pub init: Option<DatabaseInit>,

    /// Requirements installer, if any.
    pub installer: Option<PackageInstaller>,

    /// Direct or managed execution.
    pub mode: Mode,

    /// The lifecycle state.
    pub state: Arc<dyn StateStore>,

    /// Grace period when stopping the application.
    pub stop_grace: Duration,

    /// Runs module upgrades on start when set.
    pub upgrade: Option<Arc<UpgradeCoordinator>>,

    /// Resource polling interval in managed mode.
    pub watch_interval: Duration,
}

/// Drives the container through its startup phases and then runs the
/// application.
pub struct Supervisor {
    application: ServerApplication,
    configurator: Arc<Configurator>,
    database: Arc<dyn DatabaseService>,
    database_attempts: u32,
    database_interval: Duration,
    directories: Vec<PathBuf>,
    init: Option<DatabaseInit>,
    installer: Option<PackageInstaller>,
    mode: Mode,
    state: Arc<dyn StateStore>,
    stop_grace: Duration,
    upgrade: Option<Arc<UpgradeCoordinator>>,
    watch_interval: Duration,

    // added during startup
    reading: Option<ResourceReading>,
}

impl Supervisor {
    /// Creates a new `Supervisor`.
    #[must_use]
    pub fn new(
        SupervisorOptions {
            application,
            configurator,
            database,
            database_attempts,
            database_interval,
            directories,
            init,
            installer,
            mode,
            state,
            stop_grace,
            upgrade,
            watch_interval,
        }: SupervisorOptions,
    ) -> Self {
        Self {
            application,
            configurator,
            database,
            database_attempts,
            database_interval,
            directories,
            init,
            installer,
            mode,
            state,
            stop_grace,
            upgrade,
            watch_interval,
            reading: None,
        }
    }

    /// Runs every startup phase, then the application.
    ///
    /// In direct mode this only returns on failure or when `shutdown` is
    /// cancelled before the handover. In managed mode it returns the
    /// application's exit code once it exits or `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration or state could not be written,
    /// or the application could not be launched.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<i32> {
        info!("starting in {:?} mode", self.mode);

        tokio::select! {
            result = self.start() => result?,
            () = shutdown.cancelled() => {
                warn!("shutdown requested during startup");
                return Ok(INTERRUPTED_EXIT_CODE);
            }
        }

        step_04_running::execute(self, shutdown).await
    }

    async fn start(&mut self) -> Result<()> {
        step_01_starting::execute(self).await?;
        step_02_initializing::execute(self).await?;
        step_03_upgrading::execute(self).await
    }
}

/// Polls the database until it is ready or `attempts` are used up, calling
/// `on_retry` before every wait.
pub(crate) async fn wait_for_database(
    database: &dyn DatabaseService,
    attempts: u32,
    interval: Duration,
    mut on_retry: impl FnMut(u32) + Send,
) -> bool {
    let attempts = attempts.max(1);

    for attempt in 1..=attempts {
        if database.is_ready().await {
            info!("database ready");
            return true;
        }

        if attempt < attempts {
            warn!("database not ready (attempt {}/{})", attempt, attempts);
            on_retry(attempt);
            tokio::time::sleep(interval).await;
        }
    }

    warn!("database not ready after {} attempts", attempts);
    false
}
