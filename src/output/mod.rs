//! Publishing readings to the message broker.
//!
//! Every reading becomes two retained messages under a per-sensor topic:
//! the temperature at `<prefix>/<AA-BB-CC-DD-EE-FF>` and the battery level at
//! `<prefix>/<AA-BB-CC-DD-EE-FF>/battery`.

pub mod mqtt;

use crate::mac_address::MacAddress;
use crate::reading::Reading;
use futures::future::BoxFuture;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Errors talking to the broker.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("MQTT connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
    #[error("MQTT broker refused connection: {0}")]
    Refused(String),
    #[error("timed out after {0:?} waiting for the MQTT broker")]
    ConnectTimeout(Duration),
}

/// A message the broker keeps as the last known value of its topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedMessage {
    pub topic: String,
    pub payload: String,
}

/// Sink for retained messages.
pub trait Publisher: Send + Sync {
    fn publish(&self, message: RetainedMessage) -> BoxFuture<'_, Result<(), PublishError>>;
}

/// Topic carrying the temperature of the sensor at `address`.
pub fn topic_for(prefix: &str, address: MacAddress) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        address.topic_segment()
    } else {
        format!("{prefix}/{}", address.topic_segment())
    }
}

/// Temperature message, two fractional digits.
pub fn temperature_message(prefix: &str, reading: &Reading) -> RetainedMessage {
    RetainedMessage {
        topic: topic_for(prefix, reading.address),
        payload: format!("{:.2}", reading.temperature),
    }
}

/// Battery message, integer percent.
pub fn battery_message(prefix: &str, reading: &Reading) -> RetainedMessage {
    RetainedMessage {
        topic: format!("{}/battery", topic_for(prefix, reading.address)),
        payload: reading.battery.to_string(),
    }
}

/// Publish both messages of a reading. The battery level is only sent once
/// the temperature went through.
pub async fn publish_reading(
    publisher: &dyn Publisher,
    prefix: &str,
    reading: &Reading,
) -> Result<(), PublishError> {
    publisher.publish(temperature_message(prefix, reading)).await?;
    publisher.publish(battery_message(prefix, reading)).await
}

/// Drain the reading channel into `publisher` until cancelled or the channel closes.
pub async fn report(
    publisher: &dyn Publisher,
    prefix: &str,
    mut readings: mpsc::Receiver<Reading>,
    cancel: CancellationToken,
) {
    loop {
        let reading = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            reading = readings.recv() => match reading {
                Some(reading) => reading,
                None => return,
            },
        };

        if let Err(err) = publish_reading(publisher, prefix, &reading).await {
            tracing::error!(address = %reading.address, %err, "error while publishing");
        }
    }
}
