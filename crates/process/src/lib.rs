//! Launching, finding, and pausing the supervised application.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use steward_process::{ServerApplication, ServerApplicationOptions, exit_code, spawn};
//!
//! async fn run() -> steward_process::Result<i32> {
//!     let app = ServerApplication::new(ServerApplicationOptions {
//!         config_path: "/etc/steward/app.conf".into(),
//!         env: Vec::new(),
//!         executable: "odoo".to_string(),
//!         extra_args: Vec::new(),
//!         user: None,
//!     });
//!
//!     let mut process = spawn(Arc::new(app))?;
//!     let status = process.terminate(Duration::from_secs(30)).await?;
//!
//!     Ok(exit_code(status))
//! }
//! ```
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod application;
mod error;
mod exec;
mod finder;
mod signals;
mod spawn;

pub use application::{ServerApplication, ServerApplicationOptions, SupervisedApplication};
pub use error::{Error, Result};
pub use exec::{exec, resolve_user};
pub use finder::{ProcessFinder, SysinfoProcessFinder};
pub use nix::sys::signal::Signal;
pub use signals::{SignalSuspender, Suspender};
pub use spawn::{SupervisedProcess, exit_code, run_to_completion, spawn};
