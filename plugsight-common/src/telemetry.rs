use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An untyped scalar reported by a device for a single datapoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    /// Boolean value.
    Bool(bool),

    /// Numeric value.
    Number(f64),

    /// Text value.
    Text(String),

    /// Explicit null.
    Null,
}

impl RawValue {
    /// Name of the value's type, used in decode error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            RawValue::Bool(_) => "boolean",
            RawValue::Number(_) => "number",
            RawValue::Text(_) => "string",
            RawValue::Null => "null",
        }
    }
}

impl From<bool> for RawValue {
    fn from(v: bool) -> Self {
        RawValue::Bool(v)
    }
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        RawValue::Number(v)
    }
}

impl From<i64> for RawValue {
    fn from(v: i64) -> Self {
        RawValue::Number(v as f64)
    }
}

impl From<&str> for RawValue {
    fn from(v: &str) -> Self {
        RawValue::Text(v.to_string())
    }
}

impl From<String> for RawValue {
    fn from(v: String) -> Self {
        RawValue::Text(v)
    }
}

/// One batch of vendor datapoints fetched from a device.
///
/// Keys are vendor field codes (e.g. Tuya DPS ids like `"20"`, or flattened
/// paths like `"temperature.tC"`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawDatapoint {
    fields: BTreeMap<String, RawValue>,
}

impl RawDatapoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, builder style.
    pub fn with_field(mut self, code: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.insert(code, value);
        self
    }

    pub fn insert(&mut self, code: impl Into<String>, value: impl Into<RawValue>) {
        self.fields.insert(code.into(), value.into());
    }

    pub fn get(&self, code: &str) -> Option<&RawValue> {
        self.fields.get(code)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over `(field code, value)` pairs in code order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<RawValue>> FromIterator<(K, V)> for RawDatapoint {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut datapoint = RawDatapoint::new();
        for (k, v) in iter {
            datapoint.insert(k, v);
        }
        datapoint
    }
}

/// How a metric behaves over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Can go up or down.
    Gauge,

    /// Monotonically increasing.
    Counter,

    /// On/off state, exported as 1 or 0.
    BooleanState,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
            MetricKind::BooleanState => "boolean_state",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed metric value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Bool(bool),
}

impl MetricValue {
    /// Numeric representation for exposition (`true` = 1, `false` = 0).
    pub fn as_f64(&self) -> f64 {
        match self {
            MetricValue::Number(v) => *v,
            MetricValue::Bool(v) => {
                if *v {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// A decoded, typed measurement for one device.
///
/// Records are never modified after construction; a newer reading produces a
/// new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    name: String,
    kind: MetricKind,
    value: MetricValue,
    unit: String,
    device_id: String,
    timestamp_ms: i64,
}

impl MetricRecord {
    pub fn new(
        name: impl Into<String>,
        kind: MetricKind,
        value: MetricValue,
        unit: impl Into<String>,
        device_id: impl Into<String>,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            value,
            unit: unit.into(),
            device_id: device_id.into(),
            timestamp_ms,
        }
    }

    /// Metric name (without any exporter prefix).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn value(&self) -> MetricValue {
        self.value
    }

    /// Unit label, empty when the metric is unitless.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Unix epoch milliseconds when the reading was taken.
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
pub fn current_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
