//! Pipeline runner for `inkbird2mqtt`.
//!
//! This module wires the discovery, poll and publish workers together. It is
//! decoupled from the real Bluetooth adapter, the broker connection and
//! process signals so it can be tested deterministically.

use crate::discovery;
use crate::inkbird::SENSOR_NAME;
use crate::output::mqtt::{MqttConfig, MqttProto};
use crate::output::{self, PublishError, Publisher};
use crate::poll;
use crate::reading::READING_CHANNEL_CAPACITY;
use crate::registry::SensorRegistry;
use crate::scanner::{ScanError, SensorAdapter};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::LevelFilter;

/// Bridge Inkbird BLE temperature sensors to MQTT.
#[derive(Parser, Debug, Clone)]
#[command(
    about,
    version,
    after_help = "This program comes with ABSOLUTELY NO WARRANTY.\n\
                  This is free software, and you are welcome to redistribute it under certain conditions."
)]
pub struct Options {
    /// Log level: trace, debug, info, warn, error or off
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LevelFilter,

    /// Bluetooth adapter to scan with, e.g. hci0. Defaults to the system default adapter.
    #[arg(long)]
    pub adapter: Option<String>,

    /// Advertised name identifying a sensor
    #[arg(long, default_value = SENSOR_NAME)]
    pub sensor_name: String,

    /// Time between polls of discovered sensors.
    /// Accepts duration with suffix: 500ms, 1s, 1m, 1h.
    /// Without suffix, value is interpreted as seconds.
    #[arg(long, default_value = "1s", value_parser = crate::duration::parse_duration)]
    pub poll_interval: Duration,

    /// Hostname of the MQTT server to publish to
    #[arg(long, default_value = "localhost")]
    pub mqtt_host: String,

    /// Port used to connect to MQTT
    #[arg(long, default_value_t = 1883)]
    pub mqtt_port: u16,

    /// Protocol used to connect to MQTT
    #[arg(long, default_value_t, value_enum)]
    pub mqtt_proto: MqttProto,

    /// Topic prefix. Messages are published to {prefix}/{mac}, with mac in
    /// format 00-11-22-..., and the battery level to {prefix}/{mac}/battery
    #[arg(long, default_value = "inkbird")]
    pub mqtt_prefix: String,

    /// Client id presented to the MQTT server
    #[arg(long, default_value = "inkbird2mqtt")]
    pub mqtt_client_id: String,
}

impl Options {
    pub fn mqtt_config(&self) -> MqttConfig {
        MqttConfig {
            host: self.mqtt_host.clone(),
            port: self.mqtt_port,
            proto: self.mqtt_proto,
            client_id: self.mqtt_client_id.clone(),
        }
    }
}

/// Errors returned by the pipeline.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error("worker task failed: {0}")]
    Task(#[from] JoinError),
}

/// Run discovery, polling and publishing until `cancel` fires.
///
/// If scanning cannot be started the other workers are cancelled and the
/// scan error is returned.
pub async fn run_pipeline(
    options: &Options,
    adapter: Arc<dyn SensorAdapter>,
    publisher: Arc<dyn Publisher>,
    cancel: CancellationToken,
) -> Result<(), RunError> {
    let registry = Arc::new(SensorRegistry::new());
    let (readings_tx, readings_rx) = mpsc::channel(READING_CHANNEL_CAPACITY);

    let discovery = tokio::spawn({
        let (adapter, registry, cancel) = (adapter.clone(), registry.clone(), cancel.clone());
        let sensor_name = options.sensor_name.clone();
        async move {
            let result = discovery::discover(&*adapter, &registry, &sensor_name, &cancel).await;
            // Reported by the caller; only stop the other workers here.
            if result.is_err() {
                cancel.cancel();
            }
            result
        }
    });

    let poller = tokio::spawn({
        let (registry, cancel) = (registry.clone(), cancel.clone());
        let interval = options.poll_interval;
        async move { poll::poll(&*adapter, &registry, &readings_tx, interval, &cancel).await }
    });

    let reporter = tokio::spawn({
        let prefix = options.mqtt_prefix.clone();
        async move { output::report(&*publisher, &prefix, readings_rx, cancel).await }
    });

    let (discovered, polled, reported) = tokio::join!(discovery, poller, reporter);
    polled?;
    reported?;
    discovered??;
    Ok(())
}
