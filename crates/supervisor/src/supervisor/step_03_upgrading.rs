//! Startup Phase 3: Upgrading
//!
//! Runs when upgrades on start are enabled. Waits for the database, marking
//! `UPGRADE_RETRY` between attempts, then upgrades every database through the
//! coordinator. A failed upgrade leaves `UPGRADE_FAILED` in place but does
//! not stop the application from starting.

use super::{Supervisor, wait_for_database};
use crate::error::Result;

use std::sync::Arc;

use steward_state::LifecycleState;
use tracing::{info, warn};

pub async fn execute(supervisor: &mut Supervisor) -> Result<()> {
    let Some(coordinator) = supervisor.upgrade.clone() else {
        return Ok(());
    };

    supervisor.state.set(LifecycleState::Upgrading)?;

    let state = Arc::clone(&supervisor.state);
    let ready = wait_for_database(
        supervisor.database.as_ref(),
        supervisor.database_attempts,
        supervisor.database_interval,
        |_| {
            if let Err(e) = state.set(LifecycleState::UpgradeRetry) {
                warn!("failed to record upgrade retry: {}", e);
            }
        },
    )
    .await;

    if !ready {
        warn!("skipping startup upgrade, database not ready");
        return Ok(());
    }

    supervisor.state.set(LifecycleState::Upgrading)?;

    match coordinator.run(None, false).await {
        Ok(run) if run.is_success() => {
            info!("startup upgrade finished for {} database(s)", run.results.len());
        }
        Ok(run) => warn!("startup upgrade {} failed", run.run_id),
        Err(e) => warn!("startup upgrade did not run: {}", e),
    }

    Ok(())
}
