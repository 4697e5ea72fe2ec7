//! # Adapter Module
//!
//! Everything that talks to the bridge module over an open transport:
//! session state, command execution, baud detection, background scanning
//! and the domain operations built on them.

pub mod device;
pub mod executor;
pub mod facade;
pub mod negotiator;
pub mod scan;
pub mod session;

pub use device::{AddressType, Advertisement, DeviceObserver, DeviceTable, DiscoveredDevice};
pub use executor::{CommandExecutor, LineObserver, Response, ResponseLine, WaitControl};
pub use facade::{BleUartAdapter, validate_address};
pub use negotiator::BaudRateNegotiator;
pub use scan::ScanController;
pub use session::{AdapterSession, ScanState};
