//! Sensor reading data structure.

use crate::mac_address::MacAddress;

/// Capacity of the channel carrying readings from the poll worker to the publisher.
///
/// A full channel blocks the poll pass until the publisher catches up.
pub const READING_CHANNEL_CAPACITY: usize = 10;

/// A single decoded reading from a temperature sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Address of the sensor that produced the reading
    pub address: MacAddress,
    /// Temperature in Celsius
    pub temperature: f64,
    /// Battery level in percent, 0 when the advertisement did not carry one
    pub battery: u8,
}
