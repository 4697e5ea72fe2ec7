//! # Serial Module
//!
//! Serial port settings and the byte transport the AT protocol runs over.

pub mod port;
pub mod transport;

pub use port::{PortSettings, available_port_names, open_port};
pub use transport::{SerialTransport, Transport};
