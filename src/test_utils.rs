use crate::mac_address::MacAddress;
use crate::output::{PublishError, Publisher, RetainedMessage};
use crate::scanner::{
    DevicePath, DeviceSnapshot, ManufacturerData, ScanError, ScanEvent, ScanEventKind,
    SensorAdapter,
};
use futures::StreamExt;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A stable MAC address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// Manufacturer data with a single entry, as a healthy sensor advertises it.
pub fn inkbird_data(key: u16, battery: u8) -> ManufacturerData {
    ManufacturerData::from([(key, vec![0, 0, 0, 0, 0, battery])])
}

/// In-memory adapter that behaves like BlueZ's device cache.
///
/// Advertisements accumulate manufacturer data entries until the device is
/// removed, which clears them. Scan events are pushed by the test.
pub struct SimulatedAdapter {
    devices: Mutex<BTreeMap<MacAddress, DeviceSnapshot>>,
    events_tx: Mutex<Option<UnboundedSender<ScanEvent>>>,
    events_rx: Mutex<Option<UnboundedReceiver<ScanEvent>>>,
    removed: Mutex<Vec<DevicePath>>,
    flushes: AtomicUsize,
    fail_flush: AtomicBool,
    fail_discover: AtomicBool,
}

impl SimulatedAdapter {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            devices: Mutex::new(BTreeMap::new()),
            events_tx: Mutex::new(Some(tx)),
            events_rx: Mutex::new(Some(rx)),
            removed: Mutex::new(Vec::new()),
            flushes: AtomicUsize::new(0),
            fail_flush: AtomicBool::new(false),
            fail_discover: AtomicBool::new(false),
        }
    }

    /// Receive an advertisement from `address`, returning the device path.
    pub fn advertise(&self, address: MacAddress, name: &str, data: ManufacturerData) -> DevicePath {
        let path = DevicePath::for_device("hci0", address);
        let mut devices = self.devices.lock().unwrap();
        let device = devices.entry(address).or_insert_with(|| DeviceSnapshot {
            path: path.clone(),
            address,
            name: None,
            manufacturer_data: ManufacturerData::new(),
        });
        device.name = Some(name.to_string());
        device.manufacturer_data.extend(data);
        path
    }

    /// Push a scan event to the discovery stream.
    pub fn announce(&self, path: &DevicePath, kind: ScanEventKind) {
        if let Some(tx) = self.events_tx.lock().unwrap().as_ref() {
            let _ = tx.unbounded_send(ScanEvent {
                path: path.clone(),
                kind,
            });
        }
    }

    /// End the discovery stream.
    pub fn close_events(&self) {
        self.events_tx.lock().unwrap().take();
    }

    pub fn fail_flush(&self) {
        self.fail_flush.store(true, Ordering::SeqCst);
    }

    pub fn fail_discover(&self) {
        self.fail_discover.store(true, Ordering::SeqCst);
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn removed_paths(&self) -> Vec<DevicePath> {
        self.removed.lock().unwrap().clone()
    }

    fn lookup(&self, address: MacAddress) -> Option<DeviceSnapshot> {
        self.devices.lock().unwrap().get(&address).cloned()
    }
}

impl SensorAdapter for SimulatedAdapter {
    // Devices registered by the test are not stale, so flushing only counts.
    fn flush_devices(&self) -> BoxFuture<'_, Result<(), ScanError>> {
        Box::pin(async move {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            if self.fail_flush.load(Ordering::SeqCst) {
                return Err(ScanError::Bluetooth("flush refused".to_string()));
            }
            Ok(())
        })
    }

    fn discover(&self) -> BoxFuture<'_, Result<BoxStream<'static, ScanEvent>, ScanError>> {
        Box::pin(async move {
            if self.fail_discover.load(Ordering::SeqCst) {
                return Err(ScanError::Bluetooth("discovery refused".to_string()));
            }
            let rx = self
                .events_rx
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| ScanError::Bluetooth("discovery already running".to_string()))?;
            Ok(rx.boxed())
        })
    }

    fn device_by_path<'a>(
        &'a self,
        path: &'a DevicePath,
    ) -> BoxFuture<'a, Result<Option<DeviceSnapshot>, ScanError>> {
        Box::pin(async move { Ok(self.lookup(path.address()?)) })
    }

    fn device_by_address(
        &self,
        address: MacAddress,
    ) -> BoxFuture<'_, Result<Option<DeviceSnapshot>, ScanError>> {
        Box::pin(async move { Ok(self.lookup(address)) })
    }

    fn remove_device<'a>(&'a self, path: &'a DevicePath) -> BoxFuture<'a, Result<(), ScanError>> {
        Box::pin(async move {
            self.removed.lock().unwrap().push(path.clone());
            let address = path.address()?;
            match self.devices.lock().unwrap().get_mut(&address) {
                Some(device) => {
                    device.manufacturer_data.clear();
                    Ok(())
                }
                None => Err(ScanError::Bluetooth(format!("{path} does not exist"))),
            }
        })
    }
}

/// Publisher that records every message it is asked to publish.
pub struct RecordingPublisher {
    messages: Mutex<Vec<RetainedMessage>>,
    failing: bool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            failing: false,
        }
    }

    /// A publisher whose every publish fails after being recorded.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new()
        }
    }

    pub fn messages(&self) -> Vec<RetainedMessage> {
        self.messages.lock().unwrap().clone()
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, message: RetainedMessage) -> BoxFuture<'_, Result<(), PublishError>> {
        Box::pin(async move {
            self.messages.lock().unwrap().push(message);
            if self.failing {
                return Err(PublishError::Refused("broker unavailable".to_string()));
            }
            Ok(())
        })
    }
}

/// Log output of the current thread, captured as plain text.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Route this thread's events here until the guard is dropped.
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let logs = Self::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::TRACE)
            .finish();
        (logs, tracing::subscriber::set_default(subscriber))
    }

    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock().unwrap())
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
