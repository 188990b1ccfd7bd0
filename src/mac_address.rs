//! Sensor hardware address.
//!
//! Sensors are keyed by their 6-byte BLE address. The same address shows up in
//! three spellings: `AA:BB:CC:DD:EE:FF` for display and logs, `AA-BB-CC-DD-EE-FF`
//! in MQTT topics, and `AA_BB_CC_DD_EE_FF` inside BlueZ object paths.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A BLE hardware address stored as a compact 6-byte array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Render the address with the given separator between octets.
    pub fn to_string_with(&self, separator: char) -> String {
        let mut out = String::with_capacity(17);
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(separator);
            }
            out.push_str(&format!("{byte:02X}"));
        }
        out
    }

    /// Topic-safe form of the address, `AA-BB-CC-DD-EE-FF`.
    ///
    /// MQTT topic levels tolerate `:`, but the dashed form is what existing
    /// subscribers expect.
    pub fn topic_segment(&self) -> String {
        self.to_string_with('-')
    }

    /// Parse an address whose octets are joined by `separator`.
    pub fn parse_with(s: &str, separator: char) -> Result<Self, ParseMacError> {
        let parts: Vec<&str> = s.split(separator).collect();
        if parts.len() != 6 {
            return Err(ParseMacError::InvalidLength(parts.len()));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return Err(ParseMacError::InvalidPartLength(i));
            }
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| ParseMacError::InvalidHex(part.to_string()))?;
        }

        Ok(MacAddress(bytes))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_with(':'))
    }
}

/// Errors returned when parsing a MAC address string.
#[derive(Error, Debug, PartialEq)]
pub enum ParseMacError {
    #[error("invalid MAC address: expected 6 parts, got {0}")]
    InvalidLength(usize),
    #[error("invalid MAC address: part {0} has wrong length")]
    InvalidPartLength(usize),
    #[error("invalid MAC address: '{0}' is not valid hex")]
    InvalidHex(String),
}

impl FromStr for MacAddress {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_with(s, ':')
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for MacAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

#[cfg(feature = "bluer")]
impl From<MacAddress> for bluer::Address {
    fn from(addr: MacAddress) -> Self {
        bluer::Address(addr.0)
    }
}
