//! Device descriptors loaded from configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::config::load_config;
use crate::error::{Error, Result};

/// A device to poll.
///
/// Accepts the original device list field names (`ip`, `friendly_name`) as
/// aliases.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Unique device identifier, exported as the `device_id` label.
    pub id: String,

    /// Authentication key used by the device client.
    pub key: String,

    /// Network address (host or host:port).
    #[serde(alias = "ip")]
    pub address: String,

    /// Optional human-readable name, exported as the `device_name` label.
    #[serde(default, alias = "friendly_name")]
    pub name: Option<String>,

    /// Poll interval override in seconds.
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
}

impl DeviceDescriptor {
    pub fn new(id: impl Into<String>, key: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
            address: address.into(),
            name: None,
            poll_interval_secs: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_poll_interval(mut self, secs: u64) -> Self {
        self.poll_interval_secs = Some(secs);
        self
    }
}

impl std::fmt::Debug for DeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceDescriptor")
            .field("id", &self.id)
            .field("key", &"<redacted>")
            .field("address", &self.address)
            .field("name", &self.name)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .finish()
    }
}

/// A standalone device list document: `{ devices: [...] }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceList {
    #[serde(default)]
    pub devices: Vec<DeviceDescriptor>,
}

impl DeviceList {
    /// Load a device list from a JSON or JSON5 file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        load_config(path)
    }
}

/// Check that device ids are non-empty and unique.
pub fn validate_devices(devices: &[DeviceDescriptor]) -> Result<()> {
    let mut seen = HashSet::new();

    for device in devices {
        if device.id.trim().is_empty() {
            return Err(Error::Config("Device id must not be empty".to_string()));
        }
        if device.address.trim().is_empty() {
            return Err(Error::Config(format!(
                "Device '{}' has an empty address",
                device.id
            )));
        }
        if !seen.insert(device.id.as_str()) {
            return Err(Error::Config(format!("Duplicate device id '{}'", device.id)));
        }
    }

    Ok(())
}
