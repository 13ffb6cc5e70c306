//! Out-of-band module upgrades that freeze the running application instead
//! of stopping it.
//!
//! Every run holds an exclusive lock on the runs directory, pauses the
//! application's processes, upgrades databases one at a time, records the
//! run, and resumes the processes on every exit path.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod coordinator;
mod database;
mod error;
mod lock;
mod records;
mod upgrader;

pub use coordinator::{UpgradeCoordinator, UpgradeCoordinatorOptions};
pub use database::{DatabaseService, PsqlDatabaseService, PsqlDatabaseServiceOptions};
pub use error::{Error, Result};
pub use lock::RunLock;
pub use records::{
    DEFAULT_RUNS_RETAINED, DatabaseUpgradeResult, OverallStatus, RunStore, UpgradeOutcome,
    UpgradeRun, log_file_name,
};
pub use upgrader::{
    ApplyOutcome, ManifestUpgrader, ManifestUpgraderOptions, ModuleUpgrader, PendingCheck,
    split_addons_path,
};
