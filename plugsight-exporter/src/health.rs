//! Per-device poll health tracking.
//!
//! Pollers report every cycle outcome here; the exporter turns the tracked
//! state into `*_exporter_device_up` and failure counters, and the HTTP
//! server uses it for readiness.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Device availability status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Device has not been polled yet.
    #[default]
    Unknown,
    /// Last poll succeeded.
    Online,
    /// Last poll failed; retries are backing off.
    Backoff,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceStatus::Unknown => write!(f, "unknown"),
            DeviceStatus::Online => write!(f, "online"),
            DeviceStatus::Backoff => write!(f, "backoff"),
        }
    }
}

/// Health of one device, as reported to readers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceHealth {
    pub device_id: String,
    pub status: DeviceStatus,
    pub consecutive_failures: u32,
    /// Timestamp (millis since epoch) of the last successful poll.
    pub last_success_ms: Option<i64>,
    pub last_error: Option<String>,
    pub polls_total: u64,
    pub fetch_failures_total: u64,
    pub decode_errors_total: u64,
}

/// Thread-safe device health tracker.
#[derive(Debug, Default)]
pub struct HealthTracker {
    devices: RwLock<HashMap<String, DeviceHealth>>,
}

/// Create a shareable tracker handle.
pub type SharedHealth = Arc<HealthTracker>;

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a device in the `Unknown` state.
    pub fn register(&self, device_id: &str) {
        self.devices
            .write()
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceHealth {
                device_id: device_id.to_string(),
                ..Default::default()
            });
    }

    /// Record a successful poll cycle.
    pub fn record_success(&self, device_id: &str, timestamp_ms: i64, decode_errors: usize) {
        self.update(device_id, |health| {
            health.status = DeviceStatus::Online;
            health.consecutive_failures = 0;
            health.last_success_ms = Some(timestamp_ms);
            health.last_error = None;
            health.polls_total += 1;
            health.decode_errors_total += decode_errors as u64;
        });
    }

    /// Record a failed poll cycle.
    pub fn record_failure(&self, device_id: &str, error: impl Into<String>) {
        let error = error.into();
        self.update(device_id, move |health| {
            health.status = DeviceStatus::Backoff;
            health.consecutive_failures = health.consecutive_failures.saturating_add(1);
            health.last_error = Some(error);
            health.polls_total += 1;
            health.fetch_failures_total += 1;
        });
    }

    fn update(&self, device_id: &str, f: impl FnOnce(&mut DeviceHealth)) {
        let mut devices = self.devices.write();
        let health = devices
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceHealth {
                device_id: device_id.to_string(),
                ..Default::default()
            });
        f(health);
    }

    /// Get the health of one device.
    pub fn device(&self, device_id: &str) -> Option<DeviceHealth> {
        self.devices.read().get(device_id).cloned()
    }

    /// Get all tracked devices, sorted by id.
    pub fn devices(&self) -> Vec<DeviceHealth> {
        let mut devices: Vec<_> = self.devices.read().values().cloned().collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        devices
    }

    /// Whether any device has been polled successfully at least once.
    pub fn any_success(&self) -> bool {
        self.devices
            .read()
            .values()
            .any(|h| h.last_success_ms.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_unknown() {
        let tracker = HealthTracker::new();
        tracker.register("p1");

        let health = tracker.device("p1").unwrap();
        assert_eq!(health.status, DeviceStatus::Unknown);
        assert_eq!(health.polls_total, 0);
        assert!(!tracker.any_success());
    }

    #[test]
    fn test_failures_then_success() {
        let tracker = HealthTracker::new();
        tracker.register("p1");

        tracker.record_failure("p1", "timeout");
        tracker.record_failure("p1", "network error: refused");

        let health = tracker.device("p1").unwrap();
        assert_eq!(health.status, DeviceStatus::Backoff);
        assert_eq!(health.consecutive_failures, 2);
        assert_eq!(health.last_error.as_deref(), Some("network error: refused"));

        tracker.record_success("p1", 1234, 1);

        let health = tracker.device("p1").unwrap();
        assert_eq!(health.status, DeviceStatus::Online);
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.last_error, None);
        assert_eq!(health.last_success_ms, Some(1234));
        assert_eq!(health.polls_total, 3);
        assert_eq!(health.fetch_failures_total, 2);
        assert_eq!(health.decode_errors_total, 1);
        assert!(tracker.any_success());
    }

    #[test]
    fn test_devices_sorted() {
        let tracker = HealthTracker::new();
        tracker.register("b");
        tracker.register("a");
        tracker.record_success("c", 1, 0);

        let ids: Vec<_> = tracker.devices().into_iter().map(|h| h.device_id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(DeviceStatus::Online.to_string(), "online");
        assert_eq!(DeviceStatus::Backoff.to_string(), "backoff");
        assert_eq!(DeviceStatus::Unknown.to_string(), "unknown");
    }
}
