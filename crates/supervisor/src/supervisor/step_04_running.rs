//! Startup Phase 4: Running
//!
//! Marks the container as running and hands over to the application:
//! - Direct mode replaces the supervisor with the application
//! - Managed mode keeps the application as a child, restarts it when the
//!   resource watcher regenerates the configuration, and stops it on shutdown

use super::{Mode, Supervisor};
use crate::error::Result;
use crate::watcher::{ResourceWatcher, RestartRequest};

use std::sync::Arc;
use std::time::Duration;

use steward_process::{SupervisedApplication, exec, exit_code, spawn};
use steward_state::LifecycleState;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

pub async fn execute(supervisor: Supervisor, shutdown: CancellationToken) -> Result<i32> {
    match supervisor.state.get() {
        Ok(Some(LifecycleState::UpgradeFailed)) => {
            warn!("starting the application with a failed upgrade recorded");
        }
        _ => supervisor.state.set(LifecycleState::Running)?,
    }

    match supervisor.mode {
        Mode::Direct => {
            info!("handing over to {}", supervisor.application.name());
            Err(exec(&supervisor.application).into())
        }
        Mode::Managed => supervise(supervisor, shutdown).await,
    }
}

async fn supervise(supervisor: Supervisor, shutdown: CancellationToken) -> Result<i32> {
    let reading = supervisor
        .reading
        .unwrap_or_else(|| supervisor.configurator.detect());

    let (restarts_tx, restarts) = mpsc::channel(1);
    let watcher = ResourceWatcher::new(
        Arc::clone(&supervisor.configurator),
        supervisor.watch_interval,
        restarts_tx,
    );
    let watcher_token = shutdown.child_token();

    let task_tracker = TaskTracker::new();
    task_tracker.spawn(watcher.run(reading, watcher_token.clone()));
    task_tracker.close();

    let application: Arc<dyn SupervisedApplication> = Arc::new(supervisor.application);
    let result = supervise_child(application, restarts, supervisor.stop_grace, &shutdown).await;

    watcher_token.cancel();
    task_tracker.wait().await;

    result
}

/// Owns the application process until it exits or shutdown is requested.
async fn supervise_child(
    application: Arc<dyn SupervisedApplication>,
    mut restarts: mpsc::Receiver<RestartRequest>,
    stop_grace: Duration,
    shutdown: &CancellationToken,
) -> Result<i32> {
    let mut child = spawn(Arc::clone(&application))?;

    loop {
        tokio::select! {
            status = child.wait() => {
                let code = exit_code(status?);
                info!("{} exited with code {}", application.name(), code);
                return Ok(code);
            }
            Some(request) = restarts.recv() => {
                info!("restarting {} for new resource limits", application.name());

                child.terminate(stop_grace).await?;
                child = spawn(Arc::clone(&application))?;

                if request.ack.send(()).is_err() {
                    warn!("resource watcher went away before the restart completed");
                }
            }
            () = shutdown.cancelled() => {
                info!("stopping {}", application.name());

                let code = exit_code(child.terminate(stop_grace).await?);
                info!("{} stopped with code {}", application.name(), code);
                return Ok(code);
            }
        }
    }
}
