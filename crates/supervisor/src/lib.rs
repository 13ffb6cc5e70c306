//! Per-container lifecycle supervision of the application server.
//!
//! A [`Supervisor`] walks the container through `STARTING`, `INITIALIZING`,
//! optionally `UPGRADING`, and `RUNNING`, writing each phase to the state
//! store before it begins. It then either replaces itself with the
//! application or, in managed mode, keeps it as a child and restarts it
//! whenever the detected resource limits change.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod configurator;
mod error;
mod installer;
mod supervisor;
mod watcher;

pub use configurator::{Configurator, ConfiguratorOptions};
pub use error::{Error, Result};
pub use installer::{PackageInstaller, PackageInstallerOptions, REQUIREMENTS_FILE};
pub use supervisor::{
    DEFAULT_STOP_GRACE, DatabaseInit, INTERRUPTED_EXIT_CODE, Mode, Supervisor, SupervisorOptions,
};
pub use watcher::{DEFAULT_WATCH_INTERVAL, ResourceWatcher, RestartRequest};
