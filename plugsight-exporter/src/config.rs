//! Configuration for the exporter.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use plugsight_common::{DeviceDescriptor, DeviceList, LoggingConfig, validate_devices};

use crate::decoder::{FieldSpec, FieldTable, tuya_plug_fields};
use crate::mapping::is_valid_metric_name;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Failed to load device list: {0}")]
    Devices(#[from] plugsight_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// HTTP endpoint settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Polling schedule and timeouts.
    #[serde(default)]
    pub polling: PollingConfig,

    /// Device client settings.
    #[serde(default)]
    pub client: ClientConfig,

    /// Field table mapping vendor field codes to metrics.
    #[serde(default = "tuya_plug_fields")]
    pub fields: Vec<FieldSpec>,

    /// Inline device list.
    #[serde(default)]
    pub devices: Vec<DeviceDescriptor>,

    /// Separate device list file (`{ devices: [...] }`), merged with `devices`.
    #[serde(default)]
    pub devices_file: Option<PathBuf>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address to listen on (default: "0.0.0.0:9080").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Metric name prefix (default: "smartplug").
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Default labels to add to all metrics.
    #[serde(default)]
    pub default_labels: HashMap<String, String>,

    /// Append the reading timestamp to each sample.
    #[serde(default)]
    pub include_timestamps: bool,

    /// Export the exporter's own series and per-device poll metrics once
    /// the registry holds data.
    #[serde(default = "default_true")]
    pub self_metrics: bool,
}

/// Default listen port.
pub const DEFAULT_PORT: u16 = 9080;

fn default_listen() -> String {
    format!("0.0.0.0:{}", DEFAULT_PORT)
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_prefix() -> String {
    "smartplug".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            prefix: default_prefix(),
            default_labels: HashMap::new(),
            include_timestamps: false,
            self_metrics: true,
        }
    }
}

/// Polling schedule configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Poll interval for devices without their own (seconds).
    #[serde(default = "default_interval")]
    pub default_interval_secs: u64,

    /// Per-fetch timeout (milliseconds); must be shorter than every interval.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Upper bound for the backoff delay after failures (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// How long pollers get to finish in-flight work on shutdown (milliseconds).
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_interval() -> u64 {
    30
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_max_backoff() -> u64 {
    300 // 5 minutes
}

fn default_shutdown_grace_ms() -> u64 {
    2000
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            default_interval_secs: default_interval(),
            timeout_ms: default_timeout_ms(),
            max_backoff_secs: default_max_backoff(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

/// HTTP authentication scheme used against devices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    /// Credentials sent with every request (default).
    #[default]
    Basic,
    /// Challenge-response digest authentication (Shelly Gen2).
    Digest,
}

/// HTTP device client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Status path on the device; `{id}` is replaced with the device id.
    #[serde(default = "default_status_path")]
    pub status_path: String,

    /// Authentication scheme (default: basic).
    #[serde(default)]
    pub auth: AuthScheme,

    /// Auth username; the device key is the password.
    #[serde(default = "default_username")]
    pub username: String,

    /// JSON member holding the datapoints (`null` for the whole body).
    #[serde(default = "default_payload_root")]
    pub payload_root: Option<String>,
}

fn default_status_path() -> String {
    "/dps".to_string()
}

fn default_username() -> String {
    "admin".to_string()
}

fn default_payload_root() -> Option<String> {
    Some("dps".to_string())
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            status_path: default_status_path(),
            auth: AuthScheme::default(),
            username: default_username(),
            payload_root: default_payload_root(),
        }
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    ///
    /// Call [`prepare`](Self::prepare) after applying overrides.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(json5::from_str(content)?)
    }

    /// Merge the external device list (if any) and validate.
    pub fn prepare(&mut self) -> Result<(), ConfigError> {
        if let Some(path) = self.devices_file.take() {
            let list = DeviceList::load(&path)?;
            self.devices.extend(list.devices);
        }
        self.validate()
    }

    /// Replace the port of the listen address.
    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        let mut addr = self.listen_addr()?;
        addr.set_port(port);
        self.http.listen = addr.to_string();
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;

        if !self.http.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if !self.http.prefix.is_empty() && !is_valid_metric_name(&self.http.prefix) {
            return Err(ConfigError::Validation(format!(
                "Invalid metric prefix: {}",
                self.http.prefix
            )));
        }

        if self.polling.default_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "default_interval_secs must be > 0".to_string(),
            ));
        }

        if self.polling.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "timeout_ms must be > 0".to_string(),
            ));
        }

        if self.polling.max_backoff_secs == 0 {
            return Err(ConfigError::Validation(
                "max_backoff_secs must be > 0".to_string(),
            ));
        }

        self.field_table()?;

        if self.devices.is_empty() {
            return Err(ConfigError::Validation(
                "No devices configured".to_string(),
            ));
        }

        validate_devices(&self.devices)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        for device in &self.devices {
            let interval = self.poll_interval(device);
            if interval.is_zero() {
                return Err(ConfigError::Validation(format!(
                    "Device '{}': poll interval must be > 0",
                    device.id
                )));
            }
            if self.timeout() >= interval {
                return Err(ConfigError::Validation(format!(
                    "Device '{}': timeout_ms ({}) must be shorter than the poll interval ({}s)",
                    device.id,
                    self.polling.timeout_ms,
                    interval.as_secs()
                )));
            }
        }

        Ok(())
    }

    /// Parsed listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.http.listen.parse().map_err(|_| {
            ConfigError::Validation(format!("Invalid listen address: {}", self.http.listen))
        })
    }

    /// Build the field table.
    pub fn field_table(&self) -> Result<FieldTable, ConfigError> {
        FieldTable::new(self.fields.clone())
            .map_err(|e| ConfigError::Validation(format!("Invalid field table: {}", e)))
    }

    /// Poll interval for a device.
    pub fn poll_interval(&self, device: &DeviceDescriptor) -> Duration {
        Duration::from_secs(
            device
                .poll_interval_secs
                .unwrap_or(self.polling.default_interval_secs),
        )
    }

    /// Per-fetch timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.polling.timeout_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.polling.max_backoff_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.polling.shutdown_grace_ms)
    }
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            polling: PollingConfig::default(),
            client: ClientConfig::default(),
            fields: tuya_plug_fields(),
            devices: Vec::new(),
            devices_file: None,
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugsight_common::{LogFormat, MetricKind};
    use std::io::Write;

    const ONE_DEVICE: &str = r#"{
        devices: [ { id: "bf01", key: "k", ip: "10.0.0.5" } ]
    }"#;

    #[test]
    fn test_parse_minimal_config() {
        let config = ExporterConfig::parse(ONE_DEVICE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.http.listen, "0.0.0.0:9080");
        assert_eq!(config.http.path, "/metrics");
        assert_eq!(config.http.prefix, "smartplug");
        assert!(config.http.self_metrics);
        assert!(!config.http.include_timestamps);
        assert_eq!(config.polling.default_interval_secs, 30);
        assert_eq!(config.polling.timeout_ms, 5000);
        assert_eq!(config.client.payload_root.as_deref(), Some("dps"));
        assert_eq!(config.client.auth, AuthScheme::Basic);
        assert_eq!(config.fields.len(), 5);
        assert_eq!(config.devices[0].address, "10.0.0.5");
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            http: {
                listen: "127.0.0.1:9100",
                path: "/prometheus/metrics",
                prefix: "shelly",
                default_labels: { site: "home" },
                include_timestamps: true,
                self_metrics: false
            },
            polling: {
                default_interval_secs: 10,
                timeout_ms: 2000,
                max_backoff_secs: 120,
                shutdown_grace_ms: 500
            },
            client: {
                status_path: "/rpc/Switch.GetStatus?id={id}",
                auth: "digest",
                username: "admin",
                payload_root: null
            },
            fields: [
                {
                    code: "apower",
                    name: "power_watts",
                    kind: "gauge",
                    unit: "watts",
                    help: "Smartplug power reading (watts)"
                },
                { code: "aenergy.total", name: "energy_watthours", kind: "counter", unit: "Wh" },
                { code: "output", name: "enabled", kind: "boolean_state" },
                { code: "current", name: "current_amps", kind: "gauge", unit: "amps", scale: 0.001 }
            ],
            devices: [
                { id: "0", key: "pw", address: "10.0.0.30", name: "desk", poll_interval_secs: 5 }
            ],
            logging: { level: "debug", format: "json" }
        }"#;

        let config = ExporterConfig::parse(json).unwrap();
        config.validate().unwrap();

        assert_eq!(config.http.listen, "127.0.0.1:9100");
        assert_eq!(config.http.prefix, "shelly");
        assert_eq!(
            config.http.default_labels.get("site"),
            Some(&"home".to_string())
        );
        assert!(config.http.include_timestamps);
        assert!(!config.http.self_metrics);
        assert_eq!(config.client.payload_root, None);
        assert_eq!(config.client.auth, AuthScheme::Digest);
        assert_eq!(
            config.fields[0].help.as_deref(),
            Some("Smartplug power reading (watts)")
        );
        assert_eq!(config.fields[1].help, None);
        assert_eq!(config.fields[1].kind, MetricKind::Counter);
        assert_eq!(config.fields[2].unit, "");
        assert_eq!(config.fields[3].scale, 0.001);
        assert_eq!(
            config.poll_interval(&config.devices[0]),
            Duration::from_secs(5)
        );
        assert_eq!(config.timeout(), Duration::from_millis(2000));
        assert_eq!(config.max_backoff(), Duration::from_secs(120));
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_validate_no_devices() {
        let config = ExporterConfig::parse("{}").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("No devices configured"));
    }

    #[test]
    fn test_validate_duplicate_devices() {
        let json = r#"{
            devices: [
                { id: "a", key: "k", address: "10.0.0.1" },
                { id: "a", key: "k", address: "10.0.0.2" }
            ]
        }"#;
        let err = ExporterConfig::parse(json).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate device id"));
    }

    #[test]
    fn test_validate_timeout_not_shorter_than_interval() {
        let json = r#"{
            polling: { timeout_ms: 5000 },
            devices: [ { id: "a", key: "k", address: "10.0.0.1", poll_interval_secs: 5 } ]
        }"#;
        let err = ExporterConfig::parse(json).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("must be shorter than the poll interval"));
    }

    #[test]
    fn test_validate_invalid_listen() {
        let mut config = ExporterConfig::parse(ONE_DEVICE).unwrap();
        config.http.listen = "not-an-address".to_string();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid listen address"));
    }

    #[test]
    fn test_validate_invalid_path() {
        let mut config = ExporterConfig::parse(ONE_DEVICE).unwrap();
        config.http.path = "no-leading-slash".to_string();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must start with /"));
    }

    #[test]
    fn test_validate_invalid_field_table() {
        let json = r#"{
            fields: [
                { code: "1", name: "a", kind: "gauge" },
                { code: "1", name: "b", kind: "gauge" }
            ],
            devices: [ { id: "a", key: "k", address: "10.0.0.1" } ]
        }"#;
        let err = ExporterConfig::parse(json).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("duplicate field code"));
    }

    #[test]
    fn test_validate_reserved_field_name() {
        let json = r#"{
            fields: [ { code: "1", name: "exporter_series", kind: "gauge" } ],
            devices: [ { id: "a", key: "k", address: "10.0.0.1" } ]
        }"#;
        let err = ExporterConfig::parse(json).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("reserved for exporter metrics"));
    }

    #[test]
    fn test_set_port() {
        let mut config = ExporterConfig::default();
        config.set_port(9555).unwrap();
        assert_eq!(config.http.listen, "0.0.0.0:9555");
    }

    #[test]
    fn test_prepare_merges_devices_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"devices": [
                {{"id": "bf02", "key": "k2", "ip": "10.0.0.6", "friendly_name": "tv"}}
            ]}}"#
        )
        .unwrap();

        let mut config = ExporterConfig::parse(ONE_DEVICE).unwrap();
        config.devices_file = Some(file.path().to_path_buf());
        config.prepare().unwrap();

        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[1].name.as_deref(), Some("tv"));
    }

    #[test]
    fn test_prepare_missing_devices_file() {
        let mut config = ExporterConfig::parse(ONE_DEVICE).unwrap();
        config.devices_file = Some(PathBuf::from("/nonexistent/devices.json"));

        assert!(matches!(config.prepare(), Err(ConfigError::Devices(_))));
    }
}
