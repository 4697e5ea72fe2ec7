use log::{error, info};
use tokio::time::Duration;
use tokio_serial::SerialPortBuilderExt;
pub use tokio_serial::{DataBits, FlowControl, Parity, SerialPort, SerialStream, StopBits};

use crate::error::{BridgeError, Result};

/// serial port settings
#[derive(Clone, Debug)]
pub struct PortSettings {
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
    /// how long one non-blocking read may wait for bytes
    pub timeout: Duration,
}

/// serial port settings implementation
impl PortSettings {
    /// serial port settings initialization, 8N1 without flow control
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        PortSettings {
            port_name: port_name.into(),
            baud_rate,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
            timeout: Duration::from_millis(1),
        }
    }

    /// get mutable serial port baud rate
    pub fn baud_rate(&mut self) -> &mut u32 {
        &mut self.baud_rate
    }
    /// get serial port description, e.g. `/dev/ttyUSB0 38400 8N1`
    pub fn describe(&self) -> String {
        format!(
            "{} {} {}{}{}",
            self.port_name,
            self.baud_rate,
            data_bits_digit(self.data_bits),
            parity_letter(self.parity),
            stop_bits_digit(self.stop_bits)
        )
    }
}

fn data_bits_digit(data_bits: DataBits) -> u8 {
    match data_bits {
        DataBits::Five => 5,
        DataBits::Six => 6,
        DataBits::Seven => 7,
        DataBits::Eight => 8,
    }
}

fn stop_bits_digit(stop_bits: StopBits) -> u8 {
    match stop_bits {
        StopBits::One => 1,
        StopBits::Two => 2,
    }
}

fn parity_letter(parity: Parity) -> char {
    match parity {
        Parity::None => 'N',
        Parity::Odd => 'O',
        Parity::Even => 'E',
    }
}

/// open serial port
pub fn open_port(port_data: &PortSettings) -> Result<SerialStream> {
    match tokio_serial::new(port_data.port_name.as_str(), port_data.baud_rate)
        .data_bits(port_data.data_bits)
        .parity(port_data.parity)
        .stop_bits(port_data.stop_bits)
        .flow_control(port_data.flow_control)
        .timeout(port_data.timeout)
        .open_native_async()
    {
        Ok(stream) => {
            info!("Opened serial port: {}", port_data.describe());
            Ok(stream)
        }
        Err(e) => {
            error!("Failed to open serial port {}: {}", port_data.port_name, e);
            Err(BridgeError::port_open(&port_data.port_name, e.to_string()))
        }
    }
}

/// list the names of all serial ports currently present
pub fn available_port_names() -> Vec<String> {
    match tokio_serial::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            info!("Error listing ports: {}", e);
            Vec::new()
        }
    }
}
