//! Startup Phase 2: Initializing
//!
//! Waits for the database service and creates the configured database on
//! first start. Nothing here is fatal; the application reports its own
//! database problems once running.

use super::{Supervisor, wait_for_database};
use crate::error::Result;

use std::sync::Arc;

use steward_process::run_to_completion;
use steward_state::LifecycleState;
use tracing::{info, warn};

pub async fn execute(supervisor: &mut Supervisor) -> Result<()> {
    supervisor.state.set(LifecycleState::Initializing)?;

    let ready = wait_for_database(
        supervisor.database.as_ref(),
        supervisor.database_attempts,
        supervisor.database_interval,
        |_| {},
    )
    .await;

    let Some(init) = &supervisor.init else {
        return Ok(());
    };
    if !ready {
        warn!("skipping creation of {}, database not ready", init.name);
        return Ok(());
    }

    match supervisor.database.exists(&init.name).await {
        Ok(true) => info!("database {} already exists", init.name),
        Ok(false) => {
            info!("creating database {} with {}", init.name, init.modules);

            let application = supervisor.application.with_extra_args([
                "-d",
                init.name.as_str(),
                "-i",
                init.modules.as_str(),
                "--stop-after-init",
            ]);
            match run_to_completion(Arc::new(application)).await {
                Ok(status) if status.success() => info!("database {} created", init.name),
                Ok(status) => warn!("creating database {} failed: {}", init.name, status),
                Err(e) => warn!("creating database {} failed: {}", init.name, e),
            }
        }
        Err(e) => warn!("could not check for database {}: {}", init.name, e),
    }

    Ok(())
}
