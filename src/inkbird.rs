//! Decoding of Inkbird sensor advertisements.
//!
//! These sensors do not follow the manufacturer data layout. The 16-bit
//! company identifier carries the temperature in hundredths of a degree
//! Celsius, and the vendor payload carries the battery percentage at byte 5.

use crate::mac_address::MacAddress;
use crate::reading::Reading;
use crate::scanner::ManufacturerData;
use thiserror::Error;

/// Advertised local name of the supported sensor family.
pub const SENSOR_NAME: &str = "tps";

/// Offset of the battery percentage inside the manufacturer payload.
pub const BATTERY_OFFSET: usize = 5;

/// Errors decoding the battery level from a manufacturer payload.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("manufacturer payload is empty")]
    MissingPayload,
    #[error("manufacturer payload is {len} bytes, battery is at offset 5")]
    ShortPayload { len: usize },
}

/// Temperature in Celsius encoded in a manufacturer data key.
///
/// The key is a two's complement centidegree value, so `0xFFFF` is -0.01°C.
pub fn temperature_from_key(key: u16) -> f64 {
    f64::from(key as i16) / 100.0
}

/// Battery percentage carried in a manufacturer payload.
pub fn battery_from_payload(payload: &[u8]) -> Result<u8, DecodeError> {
    match payload.get(BATTERY_OFFSET) {
        Some(battery) => Ok(*battery),
        None if payload.is_empty() => Err(DecodeError::MissingPayload),
        None => Err(DecodeError::ShortPayload { len: payload.len() }),
    }
}

/// Decode one manufacturer data entry.
///
/// A payload without a battery byte still produces a reading with battery 0;
/// the error is handed back alongside so the caller can report it.
pub fn decode_entry(
    address: MacAddress,
    key: u16,
    payload: &[u8],
) -> (Reading, Option<DecodeError>) {
    let (battery, error) = match battery_from_payload(payload) {
        Ok(battery) => (battery, None),
        Err(e) => (0, Some(e)),
    };

    let reading = Reading {
        address,
        temperature: temperature_from_key(key),
        battery,
    };
    (reading, error)
}

/// Decode every entry of a device's manufacturer data, in ascending key order.
///
/// A healthy sensor has exactly one entry. More than one means several
/// advertisements were cached since the last invalidation; all of them are
/// reported. The key order is not arrival order, so the last reading sent
/// carries the highest cached temperature rather than the newest one.
pub fn decode_advertisement(address: MacAddress, data: &ManufacturerData) -> Vec<Reading> {
    data.iter()
        .map(|(key, payload)| {
            let (reading, error) = decode_entry(address, *key, payload);
            if let Some(err) = error {
                tracing::warn!(%address, key, %err, "could not decode battery level");
            }
            reading
        })
        .collect()
}
