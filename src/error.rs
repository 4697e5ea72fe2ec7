//! # Error Module
//!
//! This module provides the error type shared by every layer of the bridge
//! driver. It uses the `thiserror` crate for ergonomic error handling.

use std::io;

use thiserror::Error;

/// Result type alias for `ble_uart_bridge` operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Main error type for the bridge driver.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// No terminal line arrived within the allotted window.
    #[error("Timed out waiting for the bridge module to answer")]
    TimedOut,

    /// A command was attempted while a scan owns the transport.
    #[error("Command '{command}' refused: scan state is {state}, stop the scan first")]
    StateViolation { command: String, state: String },

    /// The module answered a command with its generic error marker.
    #[error("Bridge module reported an error while trying to {action}")]
    DeviceProtocol { action: String },

    /// The module reported that the connection attempt timed out.
    #[error("Connecting to {address} (address type {address_type}) timed out")]
    ConnectTimeout {
        address: String,
        address_type: String,
    },

    /// None of the known baud rates answered the version probe.
    #[error("No known baud rate answered; the device does not look like a BLE-UART bridge")]
    NotDetected,

    /// Generic transport failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Serial port layer failure.
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O failure on the byte stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failed to open serial port.
    #[error("Failed to open serial port '{port_name}': {reason}")]
    PortOpen { port_name: String, reason: String },

    /// The module answered with something that could not be interpreted.
    #[error("Unexpected response from bridge module: {0}")]
    InvalidResponse(String),

    /// A caller supplied value is outside what the protocol accepts.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The baud rate switch could not be verified.
    #[error("Failed to change baud rate to {rate} after {attempts} attempts")]
    BaudRateChange { rate: u32, attempts: u32 },
}

impl BridgeError {
    /// Creates a new state violation error.
    #[must_use]
    pub fn state_violation(command: impl Into<String>, state: impl ToString) -> Self {
        Self::StateViolation {
            command: command.into(),
            state: state.to_string(),
        }
    }

    /// Creates a new device protocol error naming the failed action.
    #[must_use]
    pub fn device_protocol(action: impl Into<String>) -> Self {
        Self::DeviceProtocol {
            action: action.into(),
        }
    }

    /// Creates a new transport error.
    #[must_use]
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Creates a new port open error.
    #[must_use]
    pub fn port_open(port_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PortOpen {
            port_name: port_name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new invalid response error.
    #[must_use]
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Creates a new invalid argument error.
    #[must_use]
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Returns `true` for the bounded-wait timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut)
    }

    /// Returns `true` when the failure means the serial device went away,
    /// e.g. the USB adapter was unplugged and the handle lost its permission.
    #[must_use]
    pub fn is_device_lost(&self) -> bool {
        match self {
            Self::Io(e) => io_kind_means_lost(e.kind()) || is_io_error_code(e),
            Self::Serial(e) => match e.kind {
                tokio_serial::ErrorKind::NoDevice => true,
                tokio_serial::ErrorKind::Io(kind) => io_kind_means_lost(kind),
                _ => false,
            },
            _ => false,
        }
    }
}

fn io_kind_means_lost(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::PermissionDenied
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

/// `EIO`, what Linux tty reads fail with after the adapter disappeared.
#[cfg(unix)]
fn is_io_error_code(e: &io::Error) -> bool {
    const EIO: i32 = 5;
    e.raw_os_error() == Some(EIO)
}

#[cfg(not(unix))]
fn is_io_error_code(_e: &io::Error) -> bool {
    false
}
