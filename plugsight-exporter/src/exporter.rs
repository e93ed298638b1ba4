//! Prometheus text exposition of the registry contents.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

use plugsight_common::{DeviceDescriptor, MetricKind, MetricRecord};
use thiserror::Error;

use crate::config::HttpConfig;
use crate::decoder::FieldTable;
use crate::health::{DeviceStatus, SharedHealth};
use crate::mapping::{
    PrometheusType, build_metric_name, escape_help, format_labels, format_value,
    sanitize_label_name,
};
use crate::registry::SharedRegistry;

/// Failure to render the exposition body.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// Two records exposed under one name carry different kinds.
    #[error("metric '{name}' has conflicting kinds {first} and {second}")]
    KindConflict {
        name: String,
        first: MetricKind,
        second: MetricKind,
    },

    #[error("failed to format metrics: {0}")]
    Format(#[from] std::fmt::Error),
}

/// Label names set by the exporter itself; default labels cannot override them.
const RESERVED_LABELS: &[&str] = &["device_id", "device_name", "unit"];

/// Renders registry snapshots in the Prometheus text format.
///
/// Holds no cached output: every call to [`render`](Self::render) reflects
/// the registry at that moment. Self-metrics are only appended once the
/// registry holds at least one series.
pub struct MetricsExporter {
    registry: SharedRegistry,
    health: SharedHealth,
    prefix: String,
    default_labels: Vec<(String, String)>,
    device_names: HashMap<String, String>,
    /// Metric name (unprefixed) to `# HELP` text.
    help: HashMap<String, String>,
    include_timestamps: bool,
    self_metrics: bool,
}

impl MetricsExporter {
    pub fn new(
        registry: SharedRegistry,
        health: SharedHealth,
        config: &HttpConfig,
        devices: &[DeviceDescriptor],
    ) -> Self {
        let mut default_labels: Vec<(String, String)> = config
            .default_labels
            .iter()
            .map(|(k, v)| (sanitize_label_name(k), v.clone()))
            .filter(|(k, _)| !RESERVED_LABELS.contains(&k.as_str()))
            .collect();
        default_labels.sort();

        let device_names = devices
            .iter()
            .filter_map(|d| d.name.as_ref().map(|name| (d.id.clone(), name.clone())))
            .collect();

        Self {
            registry,
            health,
            prefix: config.prefix.clone(),
            default_labels,
            device_names,
            help: HashMap::new(),
            include_timestamps: config.include_timestamps,
            self_metrics: config.self_metrics,
        }
    }

    /// Emit `# HELP` lines for fields that carry a description.
    pub fn with_field_help(mut self, fields: &FieldTable) -> Self {
        self.help = fields
            .help_texts()
            .map(|(name, help)| (name.to_string(), escape_help(help)))
            .collect();
        self
    }

    /// Render the current registry contents.
    pub fn render(&self) -> Result<String, SerializationError> {
        let snapshot = self.registry.snapshot();
        let mut output = String::with_capacity(snapshot.len() * 128);

        // Snapshot order (name, device) is kept within each family
        let mut families: BTreeMap<String, (MetricKind, Vec<&MetricRecord>)> =
            BTreeMap::new();
        for record in snapshot.iter() {
            let name = build_metric_name(&self.prefix, record.name());
            match families.get_mut(&name) {
                Some((kind, records)) => {
                    if *kind != record.kind() {
                        return Err(SerializationError::KindConflict {
                            name,
                            first: *kind,
                            second: record.kind(),
                        });
                    }
                    records.push(record);
                }
                None => {
                    families.insert(name, (record.kind(), vec![record]));
                }
            }
        }

        for (name, (kind, records)) in &families {
            if let Some(help) = records.first().and_then(|r| self.help.get(r.name())) {
                writeln!(output, "# HELP {} {}", name, help)?;
            }
            writeln!(
                output,
                "# TYPE {} {}",
                name,
                PrometheusType::from_kind(*kind).as_str()
            )?;

            for record in records {
                let labels = self.series_labels(record.device_id(), record.unit());
                write!(
                    output,
                    "{}{} {}",
                    name,
                    format_labels(&labels),
                    format_value(record.value().as_f64())
                )?;
                if self.include_timestamps {
                    write!(output, " {}", record.timestamp_ms())?;
                }
                writeln!(output)?;
            }
        }

        if self.self_metrics && !snapshot.is_empty() {
            self.render_self_metrics(&mut output, snapshot.len())?;
        }

        Ok(output)
    }

    /// `device_id`, `device_name` when known, `unit` when non-empty, then
    /// the default labels.
    fn series_labels(&self, device_id: &str, unit: &str) -> Vec<(String, String)> {
        let mut labels = Vec::with_capacity(3 + self.default_labels.len());
        labels.push(("device_id".to_string(), device_id.to_string()));
        if let Some(name) = self.device_names.get(device_id) {
            labels.push(("device_name".to_string(), name.clone()));
        }
        if !unit.is_empty() {
            labels.push(("unit".to_string(), unit.to_string()));
        }
        labels.extend(self.default_labels.iter().cloned());
        labels
    }

    fn render_self_metrics(
        &self,
        output: &mut String,
        series: usize,
    ) -> Result<(), SerializationError> {
        let stats = self.registry.stats();
        let global_labels = format_labels(&self.default_labels);

        let series_name = build_metric_name(&self.prefix, "exporter_series");
        writeln!(output, "# HELP {} Series held in the registry", series_name)?;
        writeln!(output, "# TYPE {} gauge", series_name)?;
        writeln!(output, "{}{} {}", series_name, global_labels, series)?;

        let upserts_name = build_metric_name(&self.prefix, "exporter_upserts_total");
        writeln!(output, "# HELP {} Records accepted by the registry", upserts_name)?;
        writeln!(output, "# TYPE {} counter", upserts_name)?;
        writeln!(output, "{}{} {}", upserts_name, global_labels, stats.upserts)?;

        let stale_name = build_metric_name(&self.prefix, "exporter_stale_updates_total");
        writeln!(output, "# HELP {} Records discarded as older than stored", stale_name)?;
        writeln!(output, "# TYPE {} counter", stale_name)?;
        writeln!(output, "{}{} {}", stale_name, global_labels, stats.stale_discarded)?;

        let devices = self.health.devices();
        if devices.is_empty() {
            return Ok(());
        }

        let up_name = build_metric_name(&self.prefix, "exporter_device_up");
        writeln!(output, "# HELP {} Whether the last poll succeeded", up_name)?;
        writeln!(output, "# TYPE {} gauge", up_name)?;
        for device in &devices {
            let up = u8::from(device.status == DeviceStatus::Online);
            let labels = format_labels(&self.series_labels(&device.device_id, ""));
            writeln!(output, "{}{} {}", up_name, labels, up)?;
        }

        let failures_name = build_metric_name(&self.prefix, "exporter_fetch_failures_total");
        writeln!(output, "# HELP {} Failed polls", failures_name)?;
        writeln!(output, "# TYPE {} counter", failures_name)?;
        for device in &devices {
            let labels = format_labels(&self.series_labels(&device.device_id, ""));
            let failures = device.fetch_failures_total;
            writeln!(output, "{}{} {}", failures_name, labels, failures)?;
        }

        let decode_name = build_metric_name(&self.prefix, "exporter_decode_errors_total");
        writeln!(output, "# HELP {} Fields dropped while decoding", decode_name)?;
        writeln!(output, "# TYPE {} counter", decode_name)?;
        for device in &devices {
            let labels = format_labels(&self.series_labels(&device.device_id, ""));
            let errors = device.decode_errors_total;
            writeln!(output, "{}{} {}", decode_name, labels, errors)?;
        }

        Ok(())
    }
}
