//! # Protocol Module
//!
//! The textual AT protocol spoken by the bridge module: line framing,
//! response classification and the baud-rate table.
//!
//! Outbound lines look like `AT+<COMMAND>\r\n`. Inbound lines are free-form;
//! a response ends at the first line containing one of the caller's terminal
//! markers, such as `OK`, `ERROR` or `+VER`.

pub mod baud;
pub mod line;
pub mod matcher;

pub use baud::{BAUD_RATE_TABLE, BaudRateIndex, DETECTION_ORDER};
pub use line::LineReader;
pub use matcher::{Classification, classify, field_value};

/// Two-byte line terminator.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Prefix prepended to every outbound command.
pub const COMMAND_PREFIX: &str = "AT+";

/// Leading character of every control line the module prints.
pub const MARKER_PREFIX: char = '+';

/// Separator between a query field and its value, as in `+VER:1.2`.
pub const FIELD_SEPARATOR: char = ':';

pub const RESP_OK: &str = "OK";
pub const RESP_ERROR: &str = "ERROR";
pub const RESP_READY: &str = "+READY";
pub const RESP_SCAN_END: &str = "+SCAN END";
pub const RESP_CONNECTED: &str = "+CONNECTED";
pub const RESP_CONNECT_TIMEOUT: &str = "+CONNECT TIMEOUT";
pub const RESP_DISCONNECTED: &str = "+DISCONN";
pub const RESP_DEVICE: &str = "+DEV";

pub const CMD_SCAN_START: &str = "SCAN=1";
pub const CMD_SCAN_STOP: &str = "SCAN=0";

// query fields, `AT+<FIELD>?` answered by `+<FIELD>:<value>`
pub const FIELD_VERSION: &str = "VER";
pub const FIELD_UART: &str = "UART";
pub const FIELD_MAC: &str = "MAC";
pub const FIELD_TX_POWER: &str = "TXPOWER";
pub const FIELD_SERVICE_UUID: &str = "UUIDS";
pub const FIELD_WRITE_UUID: &str = "UUIDW";
pub const FIELD_NOTIFY_UUID: &str = "UUIDN";
pub const FIELD_AUTO_RECONNECT: &str = "AUTO_CFG";

/// Frames a command as it goes on the wire.
pub fn frame_command(command: &str) -> Vec<u8> {
    let mut framed = Vec::with_capacity(COMMAND_PREFIX.len() + command.len() + 2);
    framed.extend_from_slice(COMMAND_PREFIX.as_bytes());
    framed.extend_from_slice(command.as_bytes());
    framed.extend_from_slice(LINE_TERMINATOR.as_bytes());
    framed
}
