//! # Transport Module
//!
//! The byte stream the AT protocol runs over. [`Transport`] is the seam the
//! protocol core is written against; [`SerialTransport`] drives a real
//! serial port through `tokio-serial`.

use std::future::Future;
use std::io;

use log::{debug, info};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time;

use super::port::{PortSettings, SerialPort, SerialStream, open_port};
use crate::error::{BridgeError, Result};

/// Raw byte transport underneath the line protocol.
///
/// Reads never block for long: `read_available` returns whatever arrived
/// within one short poll slice, possibly nothing.
pub trait Transport: Send + 'static {
    /// Opens the underlying device. Opening an open transport is a no-op.
    fn open(&mut self) -> Result<()>;

    /// Closes the underlying device.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Reconfigures the line rate, also while open.
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()>;

    /// Returns the bytes received so far, or an empty vector.
    fn read_available(&mut self) -> impl Future<Output = Result<Vec<u8>>> + Send;

    fn write_bytes(&mut self, data: &[u8]) -> impl Future<Output = Result<()>> + Send;
}

const READ_CHUNK: usize = 256;

/// A zero-length read: the other end hung up, e.g. the USB adapter was
/// unplugged.
pub(crate) fn hang_up_error() -> BridgeError {
    io::Error::new(io::ErrorKind::UnexpectedEof, "serial port hung up").into()
}

/// serial port transport
pub struct SerialTransport {
    settings: PortSettings,
    stream: Option<SerialStream>,
}

impl SerialTransport {
    pub fn new(settings: PortSettings) -> Self {
        SerialTransport {
            settings,
            stream: None,
        }
    }

    /// get port settings
    pub fn settings(&self) -> &PortSettings {
        &self.settings
    }

    fn stream(&mut self) -> Result<&mut SerialStream> {
        let port_name = &self.settings.port_name;
        match self.stream.as_mut() {
            Some(stream) => Ok(stream),
            None => Err(BridgeError::transport(format!(
                "serial port {port_name} is not open"
            ))),
        }
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<()> {
        if self.stream.is_none() {
            self.stream = Some(open_port(&self.settings)?);
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            info!("Closed serial port {}", self.settings.port_name);
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        *self.settings.baud_rate() = baud_rate;
        if let Some(stream) = self.stream.as_mut() {
            stream.set_baud_rate(baud_rate)?;
            debug!("{} switched to {} baud", self.settings.port_name, baud_rate);
        }
        Ok(())
    }

    async fn read_available(&mut self) -> Result<Vec<u8>> {
        let slice = self.settings.timeout;
        let stream = self.stream()?;
        let mut buffer = [0u8; READ_CHUNK];
        match time::timeout(slice, stream.read(&mut buffer)).await {
            Ok(Ok(0)) => Err(hang_up_error()),
            Ok(Ok(n)) => Ok(buffer[..n].to_vec()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(Vec::new()),
        }
    }

    async fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream()?;
        stream.write_all(data).await?;
        Ok(())
    }
}
