//! Pause, upgrade sequentially, resume.

use std::sync::Arc;

use chrono::Utc;
use steward_process::{ProcessFinder, Suspender};
use steward_state::{LifecycleState, StateStore};
use tracing::{error, info, warn};

use crate::database::DatabaseService;
use crate::error::Result;
use crate::lock::RunLock;
use crate::records::{
    DatabaseUpgradeResult, RunStore, UpgradeOutcome, UpgradeRun, log_file_name,
};
use crate::upgrader::ModuleUpgrader;

/// Options for configuring an `UpgradeCoordinator`.
pub struct UpgradeCoordinatorOptions {
    /// The database service.
    pub database: Arc<dyn DatabaseService>,

    /// Finds the running application processes to pause.
    pub finder: Arc<dyn ProcessFinder>,

    /// Where run records go.
    pub runs: RunStore,

    /// The lifecycle state.
    pub state: Arc<dyn StateStore>,

    /// Pauses and resumes processes.
    pub suspender: Arc<dyn Suspender>,

    /// Checks and applies upgrades.
    pub upgrader: Arc<dyn ModuleUpgrader>,
}

/// Runs module upgrades against a possibly running application.
///
/// The application is frozen for the duration of the run and always resumed,
/// including when the run future is dropped or panics. The coordinator never
/// restarts the application; a successful run means a restart is needed to
/// load the new code.
pub struct UpgradeCoordinator {
    database: Arc<dyn DatabaseService>,
    finder: Arc<dyn ProcessFinder>,
    runs: RunStore,
    state: Arc<dyn StateStore>,
    suspender: Arc<dyn Suspender>,
    upgrader: Arc<dyn ModuleUpgrader>,
}

impl UpgradeCoordinator {
    /// Creates a new `UpgradeCoordinator`.
    #[must_use]
    pub fn new(
        UpgradeCoordinatorOptions {
            database,
            finder,
            runs,
            state,
            suspender,
            upgrader,
        }: UpgradeCoordinatorOptions,
    ) -> Self {
        Self {
            database,
            finder,
            runs,
            state,
            suspender,
            upgrader,
        }
    }

    /// The run record store.
    #[must_use]
    pub const fn runs(&self) -> &RunStore {
        &self.runs
    }

    /// Upgrades `target`, or every database when `None`.
    ///
    /// A dry run records what is pending without pausing anything, applying
    /// anything, or touching the lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::AlreadyRunning`] if another run holds the lock,
    /// or an error if the lifecycle state could not be written.
    pub async fn run(&self, target: Option<&str>, dry_run: bool) -> Result<UpgradeRun> {
        let _lock = RunLock::acquire(self.runs.dir())?;

        let started_at = Utc::now();
        let run_id = self.runs.next_run_id(started_at);

        info!(
            "starting upgrade run {} (target: {}, dry run: {})",
            run_id,
            target.unwrap_or("all"),
            dry_run
        );

        let mut pause = if dry_run {
            None
        } else {
            let previous = match self.state.get() {
                Ok(previous) => previous,
                Err(e) => {
                    warn!("could not read lifecycle state: {}", e);
                    None
                }
            };
            self.state.set(LifecycleState::Upgrading)?;

            Some(PauseGuard::pause(
                Arc::clone(&self.suspender),
                Arc::clone(&self.state),
                previous,
                &self.finder.find(),
            ))
        };

        let databases = self.discover(target).await;

        let mut results = Vec::with_capacity(databases.len());
        let mut logs = Vec::with_capacity(databases.len());

        for database in databases {
            let (outcome, log) = self.upgrade_database(&database, dry_run).await;

            results.push(DatabaseUpgradeResult {
                log_reference: log_file_name(&database),
                name: database.clone(),
                outcome,
            });
            logs.push((database, log));
        }

        let run = UpgradeRun {
            run_id,
            started_at,
            finished_at: Utc::now(),
            dry_run,
            target: target.map(str::to_string),
            overall_status: UpgradeRun::status_of(&results),
            results,
        };

        if let Err(e) = self.runs.persist(&run, &logs) {
            error!("failed to record upgrade run {}: {}", run.run_id, e);
        }

        if let Some(guard) = pause.take() {
            guard.finish(run.is_success())?;
        }

        if run.is_success() {
            info!("upgrade run {} succeeded", run.run_id);
        } else {
            error!("upgrade run {} had failures", run.run_id);
        }

        Ok(run)
    }

    async fn discover(&self, target: Option<&str>) -> Vec<String> {
        if let Some(target) = target {
            return vec![target.to_string()];
        }

        match self.database.list_databases().await {
            Ok(databases) => {
                info!("found {} database(s)", databases.len());
                databases
            }
            Err(e) => {
                warn!("database discovery failed, treating as none: {}", e);
                Vec::new()
            }
        }
    }

    async fn upgrade_database(&self, database: &str, dry_run: bool) -> (UpgradeOutcome, String) {
        let check = match self.upgrader.check(database).await {
            Ok(check) => check,
            Err(e) => {
                warn!("pending-change check of {} failed: {}", database, e);
                return (UpgradeOutcome::Failed, format!("pending-change check failed: {e}\n"));
            }
        };

        if !check.pending {
            info!("{} is up to date", database);
            return (UpgradeOutcome::SkippedUpToDate, check.detail);
        }

        if dry_run {
            info!("{} has pending changes", database);
            return (UpgradeOutcome::Pending, check.detail);
        }

        match self.upgrader.apply(database).await {
            Ok(applied) if applied.success => {
                info!("upgraded {}", database);
                (UpgradeOutcome::Succeeded, check.detail + &applied.log)
            }
            Ok(applied) => {
                warn!("upgrade of {} failed", database);
                (UpgradeOutcome::Failed, check.detail + &applied.log)
            }
            Err(e) => {
                warn!("upgrade of {} could not run: {}", database, e);
                (UpgradeOutcome::Failed, format!("{}upgrade could not run: {e}\n", check.detail))
            }
        }
    }
}

/// Holds paused processes and the state to restore.
///
/// Dropping an unfinished guard resumes every paused process and marks the
/// upgrade failed.
struct PauseGuard {
    finished: bool,
    paused: Vec<u32>,
    previous: Option<LifecycleState>,
    state: Arc<dyn StateStore>,
    suspender: Arc<dyn Suspender>,
}

impl PauseGuard {
    fn pause(
        suspender: Arc<dyn Suspender>,
        state: Arc<dyn StateStore>,
        previous: Option<LifecycleState>,
        pids: &[u32],
    ) -> Self {
        let mut guard = Self {
            finished: false,
            paused: Vec::with_capacity(pids.len()),
            previous,
            state,
            suspender,
        };

        for &pid in pids {
            match guard.suspender.suspend(pid) {
                Ok(()) => guard.paused.push(pid),
                Err(e) => warn!("could not pause pid {}: {}", pid, e),
            }
        }

        if guard.paused.is_empty() {
            info!("no running application process to pause");
        } else {
            info!("paused {} application process(es)", guard.paused.len());
        }

        guard
    }

    fn resume_all(&mut self) {
        for pid in self.paused.drain(..) {
            if let Err(e) = self.suspender.resume(pid) {
                error!("could not resume pid {}: {}", pid, e);
            }
        }
    }

    /// Resumes, then writes the final state.
    fn finish(mut self, success: bool) -> Result<()> {
        self.resume_all();
        self.finished = true;

        let next = if success {
            match self.previous {
                // A successful run clears a previous failure.
                None | Some(LifecycleState::UpgradeFailed) => LifecycleState::Running,
                Some(previous) => previous,
            }
        } else {
            LifecycleState::UpgradeFailed
        };

        self.state.set(next)?;
        Ok(())
    }
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        warn!("upgrade interrupted, resuming paused processes");
        self.resume_all();

        if let Err(e) = self.state.set(LifecycleState::UpgradeFailed) {
            error!("could not record interrupted upgrade: {}", e);
        }
    }
}
