//! Datapoint decoding: vendor payloads to typed metric records.
//!
//! Decoding is driven by an explicit [`FieldTable`] that maps each vendor
//! field code to a metric name, kind and unit. Fields missing from the table
//! are ignored, so devices that report extra datapoints keep working.

use std::collections::{HashMap, HashSet};

use plugsight_common::{MetricKind, MetricRecord, MetricValue, RawDatapoint, RawValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::mapping::is_valid_metric_name;

/// Errors produced while decoding a payload or one of its fields.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// The raw value type cannot be represented as the mapped metric kind.
    #[error("field '{code}' ({metric}): expected {expected}, found {found}")]
    TypeMismatch {
        code: String,
        metric: String,
        expected: &'static str,
        found: &'static str,
    },

    /// A counter field carried a negative value.
    #[error("field '{code}' ({metric}): counter value {value} is negative")]
    NegativeCounter {
        code: String,
        metric: String,
        value: f64,
    },

    /// The payload as a whole could not be interpreted.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Errors in a field table definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldTableError {
    #[error("duplicate field code '{0}'")]
    DuplicateCode(String),
    #[error("duplicate metric name '{0}'")]
    DuplicateName(String),
    #[error("invalid metric name '{0}'")]
    InvalidName(String),
    #[error("field '{0}' has an invalid scale")]
    InvalidScale(String),
    #[error("metric name '{0}' is reserved for exporter metrics")]
    ReservedName(String),
}

/// Name prefix of the exporter's own series.
pub const RESERVED_NAME_PREFIX: &str = "exporter_";

/// One entry of the field table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Vendor field code (e.g. Tuya DPS id `"20"` or `"aenergy.total"`).
    pub code: String,

    /// Metric name, without the exporter prefix.
    pub name: String,

    /// Metric kind.
    pub kind: MetricKind,

    /// Unit label (e.g. "volts"); empty for unitless metrics.
    #[serde(default)]
    pub unit: String,

    /// Multiplier applied to numeric raw values.
    #[serde(default = "default_scale")]
    pub scale: f64,

    /// Description rendered as `# HELP`.
    #[serde(default)]
    pub help: Option<String>,
}

fn default_scale() -> f64 {
    1.0
}

impl FieldSpec {
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        kind: MetricKind,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            kind,
            unit: unit.into(),
            scale: default_scale(),
            help: None,
        }
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Convert one raw value according to this spec.
    fn decode_value(&self, raw: &RawValue) -> Result<MetricValue, DecodeError> {
        match (self.kind, raw) {
            (MetricKind::BooleanState, RawValue::Bool(b)) => Ok(MetricValue::Bool(*b)),
            (MetricKind::Gauge, RawValue::Number(n)) => Ok(MetricValue::Number(n * self.scale)),
            (MetricKind::Counter, RawValue::Number(n)) => {
                let value = n * self.scale;
                if value < 0.0 {
                    return Err(DecodeError::NegativeCounter {
                        code: self.code.clone(),
                        metric: self.name.clone(),
                        value,
                    });
                }
                Ok(MetricValue::Number(value))
            }
            (kind, other) => Err(DecodeError::TypeMismatch {
                code: self.code.clone(),
                metric: self.name.clone(),
                expected: match kind {
                    MetricKind::BooleanState => "boolean",
                    MetricKind::Gauge | MetricKind::Counter => "number",
                },
                found: other.type_name(),
            }),
        }
    }
}

/// Explicit mapping from vendor field codes to metric definitions.
#[derive(Debug, Clone)]
pub struct FieldTable {
    specs: Vec<FieldSpec>,
    by_code: HashMap<String, usize>,
}

impl FieldTable {
    /// Build a table, rejecting duplicate codes or names and invalid or
    /// reserved names.
    pub fn new(specs: Vec<FieldSpec>) -> Result<Self, FieldTableError> {
        let mut by_code = HashMap::with_capacity(specs.len());
        let mut names = HashSet::with_capacity(specs.len());

        for (idx, spec) in specs.iter().enumerate() {
            if !is_valid_metric_name(&spec.name) {
                return Err(FieldTableError::InvalidName(spec.name.clone()));
            }
            if spec.name.starts_with(RESERVED_NAME_PREFIX) {
                return Err(FieldTableError::ReservedName(spec.name.clone()));
            }
            if !spec.scale.is_finite() || spec.scale == 0.0 {
                return Err(FieldTableError::InvalidScale(spec.code.clone()));
            }
            if by_code.insert(spec.code.clone(), idx).is_some() {
                return Err(FieldTableError::DuplicateCode(spec.code.clone()));
            }
            if !names.insert(spec.name.as_str()) {
                return Err(FieldTableError::DuplicateName(spec.name.clone()));
            }
        }

        Ok(Self { specs, by_code })
    }

    /// Tuya smart plug datapoints (unscaled raw readings).
    ///
    /// Ref: Tuya product standard function definitions for sockets.
    pub fn tuya_plug() -> Self {
        Self::from_validated(tuya_plug_fields())
    }

    fn from_validated(specs: Vec<FieldSpec>) -> Self {
        let by_code = specs
            .iter()
            .enumerate()
            .map(|(idx, spec)| (spec.code.clone(), idx))
            .collect();
        Self { specs, by_code }
    }

    pub fn get(&self, code: &str) -> Option<&FieldSpec> {
        self.by_code.get(code).map(|&idx| &self.specs[idx])
    }

    /// Iterate over `(metric name, help)` for fields that carry a description.
    pub fn help_texts(&self) -> impl Iterator<Item = (&str, &str)> {
        self.specs
            .iter()
            .filter_map(|spec| Some((spec.name.as_str(), spec.help.as_deref()?)))
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl Default for FieldTable {
    fn default() -> Self {
        Self::tuya_plug()
    }
}

/// Field specs of the built-in Tuya smart plug table.
pub fn tuya_plug_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new("1", "switch", MetricKind::BooleanState, "")
            .with_help("Smartplug turned on or off"),
        FieldSpec::new("17", "total_electricity_kwh", MetricKind::Gauge, "kWh")
            .with_help("Smartplug total energy reading (kWh)"),
        FieldSpec::new("18", "current_amps", MetricKind::Gauge, "amps")
            .with_help("Smartplug current reading (amperes)"),
        FieldSpec::new("19", "power_watts", MetricKind::Gauge, "watts")
            .with_help("Smartplug power reading (watts)"),
        FieldSpec::new("20", "voltage_volts", MetricKind::Gauge, "volts")
            .with_help("Smartplug voltage reading (volts)"),
    ]
}

/// Result of decoding one datapoint batch.
#[derive(Debug, Clone, Default)]
pub struct DecodeOutput {
    /// Successfully decoded records, one per mapped field.
    pub records: Vec<MetricRecord>,
    /// Field-level failures; the corresponding fields were dropped.
    pub errors: Vec<DecodeError>,
}

/// Decode a datapoint batch into metric records.
///
/// Produces one record for every field present in both `raw` and `table`.
/// A field whose value does not fit its mapped kind is reported in
/// [`DecodeOutput::errors`] and the remaining fields are still decoded.
pub fn decode(
    raw: &RawDatapoint,
    table: &FieldTable,
    device_id: &str,
    timestamp_ms: i64,
) -> DecodeOutput {
    let mut output = DecodeOutput::default();

    for (code, value) in raw.iter() {
        let Some(spec) = table.get(code) else {
            continue;
        };

        match spec.decode_value(value) {
            Ok(metric_value) => output.records.push(MetricRecord::new(
                spec.name.clone(),
                spec.kind,
                metric_value,
                spec.unit.clone(),
                device_id,
                timestamp_ms,
            )),
            Err(e) => output.errors.push(e),
        }
    }

    output
}

/// Turn a JSON payload into a [`RawDatapoint`].
///
/// If `root` is given (e.g. `"dps"` for Tuya), the datapoints are read from
/// that member. Nested objects and arrays are flattened into dotted codes, so
/// `{"aenergy": {"total": 1.5}}` yields the code `aenergy.total`.
pub fn parse_payload(payload: &Value, root: Option<&str>) -> Result<RawDatapoint, DecodeError> {
    let object = match root {
        Some(root) => payload
            .get(root)
            .ok_or_else(|| DecodeError::Malformed(format!("missing '{}' member", root)))?,
        None => payload,
    };

    let Value::Object(map) = object else {
        return Err(DecodeError::Malformed(format!(
            "expected a JSON object, found {}",
            json_type_name(object)
        )));
    };

    let mut datapoint = RawDatapoint::new();
    for (key, value) in map {
        flatten_into(&mut datapoint, key, value);
    }
    Ok(datapoint)
}

fn flatten_into(datapoint: &mut RawDatapoint, code: &str, value: &Value) {
    match value {
        Value::Bool(b) => datapoint.insert(code, *b),
        Value::Number(n) => match n.as_f64() {
            Some(f) => datapoint.insert(code, f),
            None => datapoint.insert(code, RawValue::Text(n.to_string())),
        },
        Value::String(s) => datapoint.insert(code, s.as_str()),
        Value::Null => datapoint.insert(code, RawValue::Null),
        Value::Array(items) => {
            for (idx, item) in items.iter().enumerate() {
                flatten_into(datapoint, &format!("{}.{}", code, idx), item);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                flatten_into(datapoint, &format!("{}.{}", code, key), item);
            }
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
