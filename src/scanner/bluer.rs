//! BlueZ D-Bus backend.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.
//!
//! BlueZ caches the properties of every device it has seen, including the
//! manufacturer data of the last advertisement. Removing the device drops that
//! cache; the device reappears with fresh data on its next advertisement.

use super::{DevicePath, DeviceSnapshot, ScanError, ScanEvent, ScanEventKind, SensorAdapter};
use crate::mac_address::MacAddress;
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session};
use futures::channel::{mpsc, oneshot};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};

/// Scan events buffered between the BlueZ event stream and the discovery worker.
const SCAN_EVENT_BUFFER_SIZE: usize = 32;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// A powered BlueZ adapter.
pub struct BluezAdapter {
    // Dropping the session closes the D-Bus connection the adapter relies on.
    _session: Session,
    adapter: Adapter,
}

impl BluezAdapter {
    /// Open the named adapter (e.g. `hci0`), or the default one, and power it on.
    pub async fn open(name: Option<&str>) -> Result<Self, ScanError> {
        let session = Session::new().await?;
        let adapter = match name {
            Some(name) => session.adapter(name)?,
            None => session.default_adapter().await?,
        };
        adapter.set_powered(true).await?;

        Ok(Self {
            _session: session,
            adapter,
        })
    }

    /// Adapter name, e.g. `hci0`.
    pub fn name(&self) -> &str {
        self.adapter.name()
    }

    fn path_of(&self, address: Address) -> DevicePath {
        DevicePath::for_device(self.adapter.name(), address.into())
    }

    async fn snapshot(&self, address: Address) -> Result<Option<DeviceSnapshot>, ScanError> {
        if !self.adapter.device_addresses().await?.contains(&address) {
            return Ok(None);
        }

        let device = self.adapter.device(address)?;
        let name = device.name().await?;
        let manufacturer_data = device
            .manufacturer_data()
            .await?
            .unwrap_or_default()
            .into_iter()
            .collect();

        Ok(Some(DeviceSnapshot {
            path: self.path_of(address),
            address: address.into(),
            name,
            manufacturer_data,
        }))
    }
}

fn scan_event(adapter: &str, event: AdapterEvent) -> Option<ScanEvent> {
    let (address, kind) = match event {
        AdapterEvent::DeviceAdded(address) => (address, ScanEventKind::Added),
        AdapterEvent::DeviceRemoved(address) => (address, ScanEventKind::Removed),
        AdapterEvent::PropertyChanged(_) => return None,
    };
    Some(ScanEvent {
        path: DevicePath::for_device(adapter, address.into()),
        kind,
    })
}

impl SensorAdapter for BluezAdapter {
    fn flush_devices(&self) -> BoxFuture<'_, Result<(), ScanError>> {
        Box::pin(async move {
            for address in self.adapter.device_addresses().await? {
                self.adapter.remove_device(address).await?;
            }
            Ok(())
        })
    }

    fn discover(&self) -> BoxFuture<'_, Result<BoxStream<'static, ScanEvent>, ScanError>> {
        Box::pin(async move {
            // Report every advertisement, not only the first one per device, so
            // a device removed after a poll is announced again on its next frame.
            self.adapter
                .set_discovery_filter(DiscoveryFilter {
                    transport: DiscoveryTransport::Le,
                    duplicate_data: true,
                    ..Default::default()
                })
                .await?;

            let adapter = self.adapter.clone();
            let (started_tx, started_rx) = oneshot::channel();
            let (mut events_tx, events_rx) = mpsc::channel(SCAN_EVENT_BUFFER_SIZE);

            // The discovery session lives as long as this task holds its stream.
            // The task ends once the consumer drops the receiving side.
            tokio::spawn(async move {
                let events = match adapter.discover_devices().await {
                    Ok(events) => {
                        let _ = started_tx.send(Ok(()));
                        events
                    }
                    Err(err) => {
                        let _ = started_tx.send(Err(err));
                        return;
                    }
                };
                let mut events = std::pin::pin!(events);

                while let Some(event) = events.next().await {
                    let Some(event) = scan_event(adapter.name(), event) else {
                        continue;
                    };
                    if events_tx.send(event).await.is_err() {
                        break;
                    }
                }
            });

            started_rx
                .await
                .map_err(|_| ScanError::Bluetooth("discovery task ended early".to_string()))??;

            Ok(events_rx.boxed())
        })
    }

    fn device_by_path<'a>(
        &'a self,
        path: &'a DevicePath,
    ) -> BoxFuture<'a, Result<Option<DeviceSnapshot>, ScanError>> {
        Box::pin(async move {
            let address: MacAddress = path.address()?;
            self.snapshot(address.into()).await
        })
    }

    fn device_by_address(
        &self,
        address: MacAddress,
    ) -> BoxFuture<'_, Result<Option<DeviceSnapshot>, ScanError>> {
        Box::pin(async move { self.snapshot(address.into()).await })
    }

    fn remove_device<'a>(&'a self, path: &'a DevicePath) -> BoxFuture<'a, Result<(), ScanError>> {
        Box::pin(async move {
            let address: MacAddress = path.address()?;
            self.adapter.remove_device(address.into()).await?;
            Ok(())
        })
    }
}
