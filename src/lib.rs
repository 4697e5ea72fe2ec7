//! # BLE UART Bridge
//!
//! Driver for serial BLE-to-UART bridge modules that speak a line-oriented
//! AT command protocol.
//!
//! One serial transport is shared between short command/response exchanges
//! and an open-ended background discovery scan. Commands are only accepted
//! while the scan is stopped.
//!
//! ## Architecture
//!
//! - [`serial`]: Serial port settings and the byte transport
//! - [`protocol`]: Line framing, response classification, baud-rate table
//! - [`adapter`]: Command executor, baud detection, scan controller and the
//!   [`BleUartAdapter`](adapter::BleUartAdapter) facade
//! - [`config`]: RON-persisted settings and protocol timings
//! - [`error`]: Custom error types for the driver

pub mod adapter;
pub mod config;
pub mod error;
pub mod protocol;
pub mod serial;

#[cfg(test)]
mod testing;

/// Re-exports for convenience
pub mod prelude {
    pub use crate::adapter::{
        AddressType, BleUartAdapter, DeviceObserver, DiscoveredDevice, ScanState,
    };
    pub use crate::config::{BridgeConfig, Timing};
    pub use crate::error::*;
    pub use crate::protocol::BaudRateIndex;
    pub use crate::serial::{PortSettings, SerialTransport, Transport};
}
