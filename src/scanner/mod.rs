//! Bluetooth adapter abstraction.
//!
//! The pipeline never talks to BlueZ directly. It goes through
//! [`SensorAdapter`], which exposes the four operations the workers need:
//! flushing known devices, streaming scan events, resolving a device's cached
//! advertisement and invalidating that cache.

#[cfg(feature = "bluer")]
pub mod bluer;

use crate::mac_address::{MacAddress, ParseMacError};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Manufacturer data of an advertisement, keyed by the 16-bit company identifier.
pub type ManufacturerData = BTreeMap<u16, Vec<u8>>;

/// Error type for adapter operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Device path that does not name a device
    #[error("Invalid device path '{0}'")]
    InvalidPath(String),
}

/// Object path of a device known to the adapter.
///
/// For BlueZ this is `/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DevicePath(String);

/// Object path prefix shared by all BlueZ adapters.
const BLUEZ_ROOT: &str = "/org/bluez";

impl DevicePath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Path of the device with `address` on adapter `adapter` (e.g. `hci0`).
    pub fn for_device(adapter: &str, address: MacAddress) -> Self {
        Self(format!(
            "{BLUEZ_ROOT}/{adapter}/dev_{}",
            address.to_string_with('_')
        ))
    }

    /// Recover the device address from the last path element.
    pub fn address(&self) -> Result<MacAddress, ScanError> {
        let invalid = || ScanError::InvalidPath(self.0.clone());
        let leaf = self
            .0
            .rsplit('/')
            .next()
            .and_then(|leaf| leaf.strip_prefix("dev_"))
            .ok_or_else(invalid)?;
        MacAddress::parse_with(leaf, '_').map_err(|_: ParseMacError| invalid())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What happened to a device during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEventKind {
    Added,
    Removed,
}

/// A device appearing in or leaving the adapter's device list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEvent {
    pub path: DevicePath,
    pub kind: ScanEventKind,
}

/// The adapter's cached view of a device's latest advertisement.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    pub path: DevicePath,
    pub address: MacAddress,
    pub name: Option<String>,
    pub manufacturer_data: ManufacturerData,
}

/// Operations the discovery and poll workers need from a Bluetooth adapter.
///
/// Implemented by the BlueZ backend and, in tests, by a simulated adapter.
pub trait SensorAdapter: Send + Sync {
    /// Forget every device the adapter currently knows about.
    fn flush_devices(&self) -> BoxFuture<'_, Result<(), ScanError>>;

    /// Start discovery. Discovery stops when the returned stream is dropped.
    fn discover(&self) -> BoxFuture<'_, Result<BoxStream<'static, ScanEvent>, ScanError>>;

    /// Resolve a device by object path, `None` if the adapter does not know it.
    fn device_by_path<'a>(
        &'a self,
        path: &'a DevicePath,
    ) -> BoxFuture<'a, Result<Option<DeviceSnapshot>, ScanError>>;

    /// Resolve a device by address, `None` if the adapter does not know it.
    fn device_by_address(
        &self,
        address: MacAddress,
    ) -> BoxFuture<'_, Result<Option<DeviceSnapshot>, ScanError>>;

    /// Drop the cached advertisement of a device so the next read sees fresh data.
    fn remove_device<'a>(&'a self, path: &'a DevicePath) -> BoxFuture<'a, Result<(), ScanError>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TEST_MAC;

    #[test]
    fn test_device_path_for_device() {
        let path = DevicePath::for_device("hci0", TEST_MAC);
        assert_eq!(path.as_str(), "/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF");
    }

    #[test]
    fn test_device_path_address() {
        let path = DevicePath::new("/org/bluez/hci1/dev_AA_BB_CC_DD_EE_FF");
        assert_eq!(path.address().unwrap(), TEST_MAC);
    }

    #[test]
    fn test_device_path_address_invalid() {
        assert!(matches!(
            DevicePath::new("/org/bluez/hci0").address(),
            Err(ScanError::InvalidPath(_))
        ));
        assert!(matches!(
            DevicePath::new("/org/bluez/hci0/dev_AA_BB").address(),
            Err(ScanError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_scan_error_display() {
        let err = ScanError::Bluetooth("adapter not powered".to_string());
        assert_eq!(err.to_string(), "Bluetooth error: adapter not powered");

        let err = ScanError::InvalidPath("/nowhere".to_string());
        assert_eq!(err.to_string(), "Invalid device path '/nowhere'");
    }
}
