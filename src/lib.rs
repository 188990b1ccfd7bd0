//! `inkbird2mqtt` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup,
//! signal handling and process exit codes. The pipeline itself lives in
//! [`crate::app`], where it runs against injected adapter and publisher
//! implementations so it can be tested without Bluetooth hardware or a broker.

pub mod app;
pub mod discovery;
pub mod duration;
pub mod inkbird;
pub mod mac_address;
pub mod output;
pub mod poll;
pub mod reading;
pub mod registry;
pub mod scanner;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use inkbird::{DecodeError, decode_advertisement};
pub use mac_address::MacAddress;
pub use output::{PublishError, Publisher, RetainedMessage};
pub use reading::Reading;
pub use registry::SensorRegistry;
pub use scanner::{DevicePath, DeviceSnapshot, ManufacturerData, ScanError, SensorAdapter};
