//! Smart-plug telemetry poller and Prometheus exporter.
//!
//! Each configured device is polled on its own task. Raw datapoints are
//! decoded through a [`FieldTable`] into typed metric records, stored in a
//! shared [`MetricRegistry`] and rendered on demand at `/metrics`.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │   Devices    │────>│   Pollers    │────>│   Registry   │────>│ HTTP Server  │
//! │ (HTTP/JSON)  │     │ (per device) │     │ (latest val) │     │  (/metrics)  │
//! └──────────────┘     └──────────────┘     └──────────────┘     └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! plugsight-exporter --config config.json5 --devices devices.json
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod backoff;
pub mod client;
pub mod config;
pub mod decoder;
pub mod exporter;
pub mod health;
pub mod http;
pub mod mapping;
pub mod poller;
pub mod registry;
pub mod runner;

pub use client::{DeviceClient, FetchError, HttpDeviceClient};
pub use config::ExporterConfig;
pub use decoder::{DecodeError, FieldSpec, FieldTable, decode};
pub use exporter::{MetricsExporter, SerializationError};
pub use health::{HealthTracker, SharedHealth};
pub use http::{BoundHttpServer, HttpServer};
pub use poller::{DevicePoller, PollSettings, PollState};
pub use registry::{MetricRegistry, SharedRegistry, UpsertOutcome};
pub use runner::PollerRunner;
