//! Discovery worker: finds sensors in the scan event stream.

use crate::registry::SensorRegistry;
use crate::scanner::{ScanError, ScanEvent, ScanEventKind, SensorAdapter};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

/// Watch scan events and register every device advertising `sensor_name`.
///
/// Runs until `cancel` fires or the adapter ends the event stream. Only a
/// failure to start scanning is returned as an error; per-device failures are
/// logged and skipped.
pub async fn discover(
    adapter: &dyn SensorAdapter,
    registry: &SensorRegistry,
    sensor_name: &str,
    cancel: &CancellationToken,
) -> Result<(), ScanError> {
    // Devices BlueZ remembers from an earlier run would never be announced again.
    match adapter.flush_devices().await {
        Ok(()) => tracing::debug!("devices flushed"),
        Err(err) => tracing::warn!(%err, "could not flush devices"),
    }

    let mut events = adapter.discover().await?;
    tracing::debug!("discovery started");

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            event = events.next() => match event {
                Some(event) => event,
                None => {
                    tracing::debug!("discovery stream closed");
                    return Ok(());
                }
            },
        };

        handle_event(adapter, registry, sensor_name, event).await;
    }
}

async fn handle_event(
    adapter: &dyn SensorAdapter,
    registry: &SensorRegistry,
    sensor_name: &str,
    event: ScanEvent,
) {
    if event.kind == ScanEventKind::Removed {
        return;
    }

    let device = match adapter.device_by_path(&event.path).await {
        Ok(Some(device)) => device,
        Ok(None) => {
            tracing::debug!(path = %event.path, "device vanished before it could be examined");
            return;
        }
        Err(err) => {
            tracing::warn!(path = %event.path, %err, "could not resolve device");
            return;
        }
    };

    let address = device.address;
    let name = device.name.as_deref().unwrap_or_default();
    tracing::trace!(%address, name, "examining device");

    if name == sensor_name && registry.append(address).await {
        tracing::info!(%address, name, "sensor discovered");
    }
}
