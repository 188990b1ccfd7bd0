//! MQTT publisher backed by `rumqttc`.

use super::{PublishError, Publisher, RetainedMessage};
use futures::future::BoxFuture;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    Transport,
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long to wait for the broker to acknowledge the connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// How long a disconnect may take before the connection is dropped.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause between reconnect attempts after the connection drops.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Outgoing requests buffered between the client and the event loop.
const REQUEST_CHANNEL_CAPACITY: usize = 10;

const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Transport used to reach the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum MqttProto {
    /// Plain TCP
    #[default]
    Tcp,
    /// TLS with the platform's root certificates
    Ssl,
    /// WebSocket
    Ws,
}

impl std::fmt::Display for MqttProto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MqttProto::Tcp => write!(f, "tcp"),
            MqttProto::Ssl => write!(f, "ssl"),
            MqttProto::Ws => write!(f, "ws"),
        }
    }
}

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub proto: MqttProto,
    pub client_id: String,
}

impl MqttConfig {
    /// Build the `rumqttc` options for this configuration.
    pub fn options(&self) -> MqttOptions {
        let mut options = match self.proto {
            // Websocket brokers are addressed by URL rather than host name.
            MqttProto::Ws => MqttOptions::new(
                &self.client_id,
                format!("ws://{}:{}/mqtt", self.host, self.port),
                self.port,
            ),
            MqttProto::Tcp | MqttProto::Ssl => {
                MqttOptions::new(&self.client_id, &self.host, self.port)
            }
        };
        options.set_keep_alive(KEEP_ALIVE);
        options.set_transport(match self.proto {
            MqttProto::Tcp => Transport::Tcp,
            MqttProto::Ssl => Transport::tls_with_default_config(),
            MqttProto::Ws => Transport::Ws,
        });
        options
    }
}

/// Publishes retained messages with at-least-once delivery.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    /// Connect to the broker and keep the connection serviced until it is
    /// disconnected or `cancel` fires.
    ///
    /// Returns once the broker has acknowledged the connection, together with
    /// the handle of the task driving the connection. `cancel` drops the
    /// connection without a DISCONNECT, so it should not be the token that
    /// stops the pipeline; use [`MqttPublisher::disconnect`] instead.
    pub async fn connect(
        config: &MqttConfig,
        cancel: CancellationToken,
    ) -> Result<(Self, JoinHandle<()>), PublishError> {
        let (client, mut eventloop) =
            AsyncClient::new(config.options(), REQUEST_CHANNEL_CAPACITY);

        tracing::info!(
            host = %config.host,
            port = config.port,
            proto = %config.proto,
            "connecting to MQTT server"
        );
        tokio::time::timeout(CONNECT_TIMEOUT, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| PublishError::ConnectTimeout(CONNECT_TIMEOUT))??;
        tracing::info!("connected to MQTT");

        let connection = tokio::spawn(drive(eventloop, cancel));
        Ok((Self { client }, connection))
    }

    /// Best-effort disconnect from the broker.
    ///
    /// Waits up to [`DISCONNECT_TIMEOUT`] for `connection` to send the
    /// DISCONNECT packet, then cancels it with `cancel`.
    pub async fn disconnect(&self, mut connection: JoinHandle<()>, cancel: &CancellationToken) {
        let graceful = async {
            self.client.disconnect().await?;
            let _ = (&mut connection).await;
            Ok::<(), rumqttc::ClientError>(())
        };
        let result = tokio::time::timeout(DISCONNECT_TIMEOUT, graceful).await;

        match result {
            Ok(Ok(())) => {
                tracing::info!("disconnected from MQTT");
                return;
            }
            Ok(Err(err)) => tracing::debug!(%err, "could not disconnect from MQTT"),
            Err(_) => tracing::debug!("timed out disconnecting from MQTT"),
        }
        cancel.cancel();
        let _ = connection.await;
    }
}

impl Publisher for MqttPublisher {
    fn publish(&self, message: RetainedMessage) -> BoxFuture<'_, Result<(), PublishError>> {
        Box::pin(async move {
            tracing::trace!(topic = %message.topic, payload = %message.payload, "publishing");
            self.client
                .publish(message.topic, QoS::AtLeastOnce, true, message.payload)
                .await?;
            Ok(())
        })
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), PublishError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(ack)) = eventloop.poll().await? {
            return match ack.code {
                ConnectReturnCode::Success => Ok(()),
                code => Err(PublishError::Refused(format!("{code:?}"))),
            };
        }
    }
}

/// Poll the event loop so queued publishes reach the broker, until the
/// DISCONNECT packet has been written. `rumqttc` reconnects on the next poll
/// after a connection error.
async fn drive(mut eventloop: EventLoop, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => return,
            Ok(event) => tracing::trace!(?event, "mqtt event"),
            Err(err) => {
                tracing::warn!(%err, "MQTT connection error, reconnecting");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }
}
