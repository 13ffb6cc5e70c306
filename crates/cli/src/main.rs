//! Container entrypoint: supervises the application server, answers health
//! checks, and runs out-of-band module upgrades.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod error;
mod settings;

use error::{Error, Result};
use settings::Settings;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::json;
use steward_supervisor::{
    DatabaseInit, Mode, PackageInstaller, PackageInstallerOptions, Supervisor, SupervisorOptions,
};
use steward_upgrade::UpgradeRun;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Prepare the container and run the application
    Run {
        /// Install modules into this database when it does not exist yet
        #[arg(long, env = "STEWARD_INIT_DATABASE")]
        init_database: Option<String>,

        /// Modules installed into a newly created database
        #[arg(long, default_value = "base", env = "STEWARD_INIT_MODULES")]
        init_modules: String,

        /// Stay in the foreground and restart the application when resource
        /// limits change
        #[arg(long, env = "STEWARD_MANAGED")]
        managed: bool,

        /// Requirements installer executable
        #[arg(long, default_value = "pip", env = "STEWARD_PIP")]
        pip: String,

        /// Directory whose requirements.txt is installed on start (repeatable)
        #[arg(long = "requirements-dir", env = "STEWARD_REQUIREMENTS_DIRS", value_delimiter = ',')]
        requirements_dirs: Vec<PathBuf>,

        /// Seconds until the application is killed after SIGTERM
        #[arg(long, default_value_t = 30, env = "STEWARD_STOP_GRACE_SECS")]
        stop_grace_secs: u64,

        /// Upgrade every database before starting the application
        #[arg(long, env = "STEWARD_UPGRADE_ON_START")]
        upgrade_on_start: bool,

        /// Seconds between resource checks in managed mode
        #[arg(long, default_value_t = 30, env = "STEWARD_WATCH_INTERVAL_SECS")]
        watch_interval_secs: u64,
    },

    /// Print the health token and exit 0 when healthy, 1 otherwise
    Health,

    /// Upgrade modules without stopping the running application
    Upgrade {
        /// Only upgrade this database
        #[arg(long)]
        database: Option<String>,

        /// Report pending upgrades without applying them
        #[arg(long)]
        check: bool,
    },

    /// Print detected resources and the derived tuning as JSON
    Resources,

    /// Print the configuration that would be generated
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(Cli { settings, command }: Cli) -> Result<i32> {
    // stdout is reserved for command output.
    tracing::subscriber::set_global_default(
        FmtSubscriber::builder()
            .with_max_level(settings.log_level)
            .with_writer(std::io::stderr)
            .finish(),
    )?;

    match command {
        Command::Run {
            init_database,
            init_modules,
            managed,
            pip,
            requirements_dirs,
            stop_grace_secs,
            upgrade_on_start,
            watch_interval_secs,
        } => {
            let configurator = settings.configurator()?;
            let upgrade = upgrade_on_start.then(|| Arc::new(settings.coordinator(&configurator)));
            let installer = (!requirements_dirs.is_empty()).then(|| {
                PackageInstaller::new(PackageInstallerOptions {
                    pip,
                    requirement_dirs: requirements_dirs,
                    stamp_dir: settings.stamps_dir.clone(),
                })
            });

            let supervisor = Supervisor::new(SupervisorOptions {
                application: settings.application(),
                configurator: Arc::new(configurator),
                database: settings.database(),
                database_attempts: settings.db_ready_attempts,
                database_interval: settings.database_interval(),
                directories: directories(&settings),
                init: init_database.map(|name| DatabaseInit {
                    modules: init_modules,
                    name,
                }),
                installer,
                mode: if managed { Mode::Managed } else { Mode::Direct },
                state: settings.state(),
                stop_grace: Duration::from_secs(stop_grace_secs),
                upgrade,
                watch_interval: Duration::from_secs(watch_interval_secs),
            });

            Ok(supervisor.run(shutdown_token()?).await?)
        }

        Command::Health => {
            let status = settings.health_reporter().check().await;
            println!("{status}");
            Ok(status.exit_code())
        }

        Command::Upgrade { database, check } => {
            let coordinator = settings.coordinator(&settings.configurator()?);
            let shutdown = shutdown_token()?;

            tokio::select! {
                result = coordinator.run(database.as_deref(), check) => {
                    let run = result?;
                    println!("{}", render_run(&run)?);
                    Ok(if run.is_success() { 0 } else { 1 })
                }
                () = shutdown.cancelled() => {
                    warn!("upgrade interrupted");
                    Ok(1)
                }
            }
        }

        Command::Resources => {
            let configurator = settings.configurator()?;
            let reading = configurator.detect();
            let profile = configurator.profile(reading);
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "detected": reading, "profile": profile }))?
            );
            Ok(0)
        }

        Command::Config => {
            let configurator = settings.configurator()?;
            let profile = configurator.profile(configurator.detect());
            print!("{}", configurator.document(&profile));
            Ok(0)
        }
    }
}

/// The upgrade command's stdout.
fn render_run(run: &UpgradeRun) -> Result<String> {
    Ok(serde_json::to_string_pretty(run)?)
}

fn directories(settings: &Settings) -> Vec<PathBuf> {
    let mut directories = vec![
        settings.data_dir.clone(),
        settings.runs_dir.clone(),
        settings.stamps_dir.clone(),
    ];
    for file in [&settings.state_file, &settings.config_path] {
        if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
            directories.push(parent.to_path_buf());
        }
    }
    directories.dedup();
    directories
}

/// Returns a token cancelled on SIGTERM or SIGINT.
fn shutdown_token() -> Result<CancellationToken> {
    let mut sigterm =
        signal(SignalKind::terminate()).map_err(|e| Error::Signal("SIGTERM", e))?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(|e| Error::Signal("SIGINT", e))?;

    let shutdown_token = CancellationToken::new();
    let signal_shutdown_token = shutdown_token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        info!("Shutting down");
        signal_shutdown_token.cancel();
    });

    Ok(shutdown_token)
}
