//! Supervises the per-device poller tasks.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::client::DeviceClient;
use crate::poller::DevicePoller;

/// Outcome of [`PollerRunner::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Pollers that stopped on their own within the grace period.
    pub stopped: usize,
    /// Pollers aborted after the grace period.
    pub aborted: usize,
    /// Pollers whose task panicked.
    pub failed: usize,
}

/// Owns one task per device and the shutdown signal they listen on.
pub struct PollerRunner {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl PollerRunner {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    /// Spawn a poller on its own task.
    pub fn spawn<C: DeviceClient>(&mut self, poller: DevicePoller<C>) {
        let device_id = poller.device_id().to_string();
        let handle = tokio::spawn(poller.run(self.shutdown_tx.subscribe()));
        self.tasks.push((device_id, handle));
    }

    /// A receiver for the shared shutdown signal, for other components.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Signal shutdown and wait up to `grace` for every poller to stop.
    ///
    /// Pollers still running after the grace period are aborted. Every task
    /// has finished when this returns.
    pub async fn shutdown(self, grace: Duration) -> ShutdownReport {
        self.shutdown_tx.send_replace(true);

        // An unrepresentable deadline means waiting without a limit
        let deadline = tokio::time::Instant::now().checked_add(grace);
        let mut report = ShutdownReport::default();

        for (device_id, mut handle) in self.tasks {
            let joined = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, &mut handle).await,
                None => Ok((&mut handle).await),
            };
            match joined {
                Ok(Ok(())) => report.stopped += 1,
                Ok(Err(e)) => {
                    warn!(device = %device_id, error = %e, "Poller task failed");
                    report.failed += 1;
                }
                Err(_) => {
                    warn!(device = %device_id, "Poller did not stop in time, aborting");
                    handle.abort();
                    let _ = handle.await;
                    report.aborted += 1;
                }
            }
        }

        info!(
            stopped = report.stopped,
            aborted = report.aborted,
            failed = report.failed,
            "Pollers shut down"
        );
        report
    }
}

impl Default for PollerRunner {
    fn default() -> Self {
        Self::new()
    }
}
