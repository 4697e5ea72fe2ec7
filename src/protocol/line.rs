//! CRLF line framing over a [`Transport`].

use log::trace;
use tokio::time::{self, Duration, Instant};

use super::LINE_TERMINATOR;
use crate::error::{BridgeError, Result};
use crate::serial::Transport;

/// Accumulates received bytes into CRLF-terminated lines.
///
/// Bytes that arrive after a terminator stay buffered for the next call, so a
/// read never swallows the start of the following line. A partial line is
/// kept across timeouts and only dropped by [`LineReader::reset`].
#[derive(Debug)]
pub struct LineReader {
    buffer: Vec<u8>,
    poll_interval: Duration,
}

impl LineReader {
    pub fn new(poll_interval: Duration) -> Self {
        LineReader {
            buffer: Vec::with_capacity(128),
            poll_interval,
        }
    }

    /// Reads one complete line, terminator included, before `deadline`.
    ///
    /// Fails with [`BridgeError::TimedOut`] if no full line is available in
    /// time; transport errors are returned as they are.
    pub async fn read_line<T: Transport>(
        &mut self,
        transport: &mut T,
        deadline: Instant,
    ) -> Result<String> {
        loop {
            if let Some(line) = self.take_line() {
                return Ok(line);
            }
            if Instant::now() > deadline {
                return Err(BridgeError::TimedOut);
            }
            let chunk = transport.read_available().await?;
            if chunk.is_empty() {
                time::sleep(self.poll_interval).await;
            } else {
                trace!("rx {}", hex::encode(&chunk));
                self.buffer.extend_from_slice(&chunk);
            }
        }
    }

    /// Drops buffered bytes, e.g. garbage received at a previous baud rate.
    pub fn reset(&mut self) {
        if !self.buffer.is_empty() {
            trace!("discarding {} buffered bytes", self.buffer.len());
        }
        self.buffer.clear();
    }

    /// Number of bytes received but not yet returned as a line.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn take_line(&mut self) -> Option<String> {
        let terminator = LINE_TERMINATOR.as_bytes();
        let end = self
            .buffer
            .windows(terminator.len())
            .position(|window| window == terminator)?
            + terminator.len();
        let line: Vec<u8> = self.buffer.drain(..end).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}
