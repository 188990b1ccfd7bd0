//! Registry of discovered sensor addresses.
//!
//! The discovery worker appends to the registry and the poll worker walks it
//! once per tick. Both go through the same lock; a poll pass holds it from
//! the first device to the last, so discovery writes wait for the pass to end.

use crate::mac_address::MacAddress;
use tokio::sync::{Mutex, MutexGuard};

/// Insertion-ordered set of known sensor addresses.
///
/// Entries are never removed: a sensor that goes quiet simply yields no
/// reading until it advertises again.
#[derive(Debug, Default)]
pub struct SensorRegistry {
    sensors: Mutex<Vec<MacAddress>>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sensor address.
    ///
    /// Returns `false` if the address was already registered, in which case
    /// the registry is unchanged.
    pub async fn append(&self, address: MacAddress) -> bool {
        let mut sensors = self.sensors.lock().await;
        if sensors.contains(&address) {
            return false;
        }
        sensors.push(address);
        true
    }

    /// Lock the registry for a full pass over its addresses.
    ///
    /// Appends block until the returned guard is dropped.
    pub async fn snapshot_iterate(&self) -> RegistryPass<'_> {
        RegistryPass {
            sensors: self.sensors.lock().await,
        }
    }
}

/// Read-only view of the registry, holding its lock.
pub struct RegistryPass<'a> {
    sensors: MutexGuard<'a, Vec<MacAddress>>,
}

impl RegistryPass<'_> {
    /// Addresses in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = MacAddress> + '_ {
        self.sensors.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}
