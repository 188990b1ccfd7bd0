//! Poll worker: turns the cached advertisements of known sensors into readings.
//!
//! BlueZ keeps the manufacturer data of every advertisement it has seen for a
//! device, so reading it twice would replay an old temperature. After each
//! read the device is removed from the adapter, and the next advertisement
//! repopulates it with fresh data.

use crate::inkbird;
use crate::mac_address::MacAddress;
use crate::reading::Reading;
use crate::registry::SensorRegistry;
use crate::scanner::SensorAdapter;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Default time between two polls of the registry.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Poll every registered sensor once per `interval` until cancelled or the
/// reading channel is closed.
pub async fn poll(
    adapter: &dyn SensorAdapter,
    registry: &SensorRegistry,
    readings: &mpsc::Sender<Reading>,
    interval: Duration,
    cancel: &CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        if poll_pass(adapter, registry, readings, cancel).await.is_break() {
            return;
        }
    }
}

/// One pass over the registry, holding its lock throughout.
///
/// Breaks when the worker should stop: cancelled while waiting on a full
/// channel, or the receiving side is gone. Otherwise continues with the
/// number of readings sent.
pub async fn poll_pass(
    adapter: &dyn SensorAdapter,
    registry: &SensorRegistry,
    readings: &mpsc::Sender<Reading>,
    cancel: &CancellationToken,
) -> ControlFlow<(), usize> {
    let pass = registry.snapshot_iterate().await;
    let mut sent = 0;

    for address in pass.iter() {
        sent += poll_device(adapter, address, readings, cancel).await?;
    }

    ControlFlow::Continue(sent)
}

async fn poll_device(
    adapter: &dyn SensorAdapter,
    address: MacAddress,
    readings: &mpsc::Sender<Reading>,
    cancel: &CancellationToken,
) -> ControlFlow<(), usize> {
    let device = match adapter.device_by_address(address).await {
        Ok(Some(device)) => device,
        Ok(None) => {
            tracing::warn!(%address, "could not get device: not known to the adapter");
            return ControlFlow::Continue(0);
        }
        Err(err) => {
            tracing::warn!(%address, %err, "could not get device");
            return ControlFlow::Continue(0);
        }
    };

    // No advertisement since the last removal.
    if device.manufacturer_data.is_empty() {
        return ControlFlow::Continue(0);
    }

    let decoded = inkbird::decode_advertisement(address, &device.manufacturer_data);
    let count = decoded.len();
    for reading in decoded {
        tracing::debug!(
            %address,
            temperature = reading.temperature,
            battery = reading.battery,
            "reading"
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return ControlFlow::Break(()),
            sent = readings.send(reading) => {
                if sent.is_err() {
                    tracing::debug!("reading channel closed");
                    return ControlFlow::Break(());
                }
            }
        }
    }

    if let Err(err) = adapter.remove_device(&device.path).await {
        tracing::debug!(%address, %err, "could not remove device");
    }

    ControlFlow::Continue(count)
}
