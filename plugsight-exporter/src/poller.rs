//! Per-device polling loop.

use std::sync::Arc;
use std::time::Duration;

use plugsight_common::{DeviceDescriptor, current_timestamp_millis};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::backoff::Backoff;
use crate::client::{DeviceClient, FetchError};
use crate::decoder::{FieldTable, decode};
use crate::health::SharedHealth;
use crate::registry::SharedRegistry;

/// Where a poller is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Fetching,
    Decoding,
    Updating,
    /// Last fetch failed; waiting out the backoff delay.
    Backoff,
}

/// Timing settings for one poller.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    /// Delay between successful polls, also the backoff base.
    pub interval: Duration,
    /// Upper bound on a single fetch.
    pub timeout: Duration,
    /// Cap for the backoff delay.
    pub max_backoff: Duration,
}

/// Polls one device on its own schedule and feeds the registry.
pub struct DevicePoller<C> {
    device: DeviceDescriptor,
    client: Arc<C>,
    fields: Arc<FieldTable>,
    registry: SharedRegistry,
    health: SharedHealth,
    settings: PollSettings,
    backoff: Backoff,
    state: PollState,
}

impl<C: DeviceClient> DevicePoller<C> {
    pub fn new(
        device: DeviceDescriptor,
        client: Arc<C>,
        fields: Arc<FieldTable>,
        registry: SharedRegistry,
        health: SharedHealth,
        settings: PollSettings,
    ) -> Self {
        health.register(&device.id);
        Self {
            backoff: Backoff::new(settings.interval, settings.max_backoff),
            device,
            client,
            fields,
            registry,
            health,
            settings,
            state: PollState::Idle,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    fn set_state(&mut self, state: PollState) {
        trace!(device = %self.device.id, from = ?self.state, to = ?state, "Poll state");
        self.state = state;
    }

    /// Run one fetch/decode/update pass.
    ///
    /// Returns how long to wait before the next pass: the poll interval after
    /// a success, the backoff delay after a failure.
    pub async fn cycle(&mut self) -> Duration {
        self.set_state(PollState::Fetching);

        let fetched = tokio::time::timeout(self.settings.timeout, self.client.fetch(&self.device))
            .await
            .unwrap_or(Err(FetchError::Timeout));

        match fetched {
            Ok(raw) => {
                self.set_state(PollState::Decoding);
                let timestamp_ms = current_timestamp_millis();
                let output = decode(&raw, &self.fields, &self.device.id, timestamp_ms);

                for error in &output.errors {
                    warn!(device = %self.device.id, error = %error, "Dropped field");
                }

                self.set_state(PollState::Updating);
                let updated = output.records.len();
                for record in output.records {
                    self.registry.upsert(record);
                }

                self.health
                    .record_success(&self.device.id, timestamp_ms, output.errors.len());
                self.backoff.reset();
                self.set_state(PollState::Idle);

                debug!(
                    device = %self.device.id,
                    fields = raw.len(),
                    updated,
                    "Poll succeeded"
                );
                self.settings.interval
            }
            Err(e) => {
                let delay = self.backoff.next_delay();
                warn!(
                    device = %self.device.id,
                    kind = e.kind(),
                    error = %e,
                    failures = self.backoff.failures(),
                    retry_in_ms = delay.as_millis() as u64,
                    "Poll failed"
                );
                self.health.record_failure(&self.device.id, e.to_string());
                self.set_state(PollState::Backoff);
                delay
            }
        }
    }

    /// Poll until the shutdown signal turns true.
    ///
    /// A signal that arrives while sleeping ends the loop immediately; an
    /// in-flight fetch is left to finish.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            device = %self.device.id,
            address = %self.device.address,
            interval_secs = self.settings.interval.as_secs(),
            "Starting poller"
        );

        while !*shutdown.borrow() {
            let delay = self.cycle().await;

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }

        info!(device = %self.device.id, "Poller stopped");
    }
}
