//! Re-detection of resource limits while the application runs.

use std::sync::Arc;
use std::time::Duration;

use steward_resources::ResourceReading;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::configurator::Configurator;

/// Default interval between detection passes.
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(30);

/// Asks the owner of the application process to restart it.
///
/// The configuration for `reading` has already been written. The owner
/// answers on `ack` once the new process is up.
#[derive(Debug)]
pub struct RestartRequest {
    /// Acknowledged after the restart.
    pub ack: oneshot::Sender<()>,

    /// The reading the new configuration was generated for.
    pub reading: ResourceReading,
}

/// Polls resource limits and requests restarts when they change.
pub struct ResourceWatcher {
    configurator: Arc<Configurator>,
    interval: Duration,
    restarts: mpsc::Sender<RestartRequest>,
}

impl ResourceWatcher {
    /// Creates a watcher that polls every `interval`.
    #[must_use]
    pub const fn new(
        configurator: Arc<Configurator>,
        interval: Duration,
        restarts: mpsc::Sender<RestartRequest>,
    ) -> Self {
        Self {
            configurator,
            interval,
            restarts,
        }
    }

    /// Polls until cancelled or the receiving side goes away.
    ///
    /// `last` is the reading the running configuration was generated for. At
    /// most one restart is outstanding: the next poll starts only after the
    /// previous request was acknowledged.
    pub async fn run(self, mut last: ResourceReading, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {}
            }

            let reading = self.configurator.detect();
            if reading == last {
                debug!("resource limits unchanged");
                continue;
            }

            info!(
                "resource limits changed: {} -> {} cpu(s), {} -> {} bytes",
                last.cpu_count, reading.cpu_count, last.ram_bytes, reading.ram_bytes
            );

            if let Err(e) = self.configurator.write(reading) {
                warn!("failed to regenerate configuration, retrying next poll: {}", e);
                continue;
            }

            let (ack, acked) = oneshot::channel();
            if self
                .restarts
                .send(RestartRequest { ack, reading })
                .await
                .is_err()
            {
                debug!("restart receiver gone, stopping watcher");
                break;
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                result = acked => {
                    if result.is_err() {
                        warn!("restart was not acknowledged");
                    }
                }
            }

            last = reading;
        }

        debug!("resource watcher stopped");
    }
}
