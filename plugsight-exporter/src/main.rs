//! Smart-plug telemetry poller and Prometheus exporter.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use plugsight_exporter::{
    DevicePoller, ExporterConfig, HealthTracker, HttpDeviceClient, HttpServer, MetricRegistry,
    MetricsExporter, PollSettings, PollerRunner,
};

/// Smart-plug telemetry poller and Prometheus exporter.
#[derive(Parser, Debug)]
#[command(name = "plugsight-exporter")]
#[command(about = "Poll smart plugs and export their telemetry as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long, env = "PLUGSIGHT_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the device list (`{"devices": [...]}`).
    #[arg(short, long, env = "DEVICE_CONFIG_PATH")]
    devices: Option<PathBuf>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// HTTP listen port (overrides the port of the listen address).
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => ExporterConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ExporterConfig::default(),
    };

    // CLI overrides
    if let Some(devices) = args.devices {
        config.devices_file = Some(devices);
    }
    if let Some(listen) = args.listen {
        config.http.listen = listen;
    }
    if let Some(port) = args.port {
        config.set_port(port)?;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    plugsight_common::init_tracing(&config.logging)?;

    config.prepare().context("Invalid configuration")?;

    info!(
        devices = config.devices.len(),
        fields = config.fields.len(),
        "Starting PlugSight exporter"
    );

    let fields = Arc::new(config.field_table()?);
    let registry = Arc::new(MetricRegistry::new());
    let health = Arc::new(HealthTracker::new());
    let client = Arc::new(
        HttpDeviceClient::new(&config.client, config.timeout())
            .context("Failed to create device client")?,
    );

    // Bind before polling so an unavailable address fails startup
    let exporter = MetricsExporter::new(
        registry.clone(),
        health.clone(),
        &config.http,
        &config.devices,
    )
    .with_field_help(&fields);
    let http_server = HttpServer::new(
        Arc::new(exporter),
        health.clone(),
        config.listen_addr()?,
        config.http.path.clone(),
    )
    .bind()
    .await?;

    // One poller per device
    let mut runner = PollerRunner::new();
    for device in &config.devices {
        let settings = PollSettings {
            interval: config.poll_interval(device),
            timeout: config.timeout(),
            max_backoff: config.max_backoff(),
        };
        runner.spawn(DevicePoller::new(
            device.clone(),
            client.clone(),
            fields.clone(),
            registry.clone(),
            health.clone(),
            settings,
        ));
    }

    let mut http_task = tokio::spawn(http_server.serve(runner.subscribe()));

    // Wait for shutdown signal
    let mut http_result = None;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        result = terminate_signal() => {
            result.context("Failed to listen for SIGTERM")?;
            info!("Received SIGTERM, shutting down...");
        }
        joined = &mut http_task => {
            error!("HTTP server exited unexpectedly, shutting down...");
            http_result = Some(joined);
        }
    }

    runner.shutdown(config.shutdown_grace()).await;
    let http_result = match http_result {
        Some(joined) => joined,
        None => match tokio::time::timeout(config.shutdown_grace(), &mut http_task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!("HTTP server did not stop in time, aborting");
                http_task.abort();
                Ok(Ok(()))
            }
        },
    };

    // Print final stats
    let stats = registry.stats();
    info!(
        series = registry.len(),
        upserts = stats.upserts,
        stale_discarded = stats.stale_discarded,
        "Final statistics"
    );

    http_result.context("HTTP server task failed")??;
    info!("Exporter stopped");
    Ok(())
}

#[cfg(unix)]
async fn terminate_signal() -> std::io::Result<()> {
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn terminate_signal() -> std::io::Result<()> {
    std::future::pending().await
}
