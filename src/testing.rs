//! Scripted stand-in for a bridge module on the other end of a serial line.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::Timing;
use crate::error::{BridgeError, Result};
use crate::protocol::{BaudRateIndex, COMMAND_PREFIX, LINE_TERMINATOR};
use crate::serial::Transport;
use crate::serial::transport::hang_up_error;

type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

struct Peer {
    open: bool,
    baud_rate: u32,
    /// rate the simulated module listens at, `None` answers at any rate
    module_rate: Option<u32>,
    rx: VecDeque<u8>,
    written: Vec<String>,
    baud_history: Vec<u32>,
    responder: Option<Responder>,
    read_error: Option<io::ErrorKind>,
    hung_up: bool,
    /// repeated whenever the receive queue runs dry
    stream_line: Option<String>,
}

/// Test double for [`Transport`]. Clones share the same simulated peer.
#[derive(Clone)]
pub(crate) struct FakeTransport {
    peer: Arc<Mutex<Peer>>,
    chunk_size: usize,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::with_chunk_size(usize::MAX)
    }

    pub(crate) fn with_chunk_size(chunk_size: usize) -> Self {
        FakeTransport {
            peer: Arc::new(Mutex::new(Peer {
                open: true,
                baud_rate: 115200,
                module_rate: None,
                rx: VecDeque::new(),
                written: Vec::new(),
                baud_history: Vec::new(),
                responder: None,
                read_error: None,
                hung_up: false,
                stream_line: None,
            })),
            chunk_size,
        }
    }

    /// Answers every command with the lines `responder` returns for it.
    pub(crate) fn responding(
        responder: impl FnMut(&str) -> Vec<String> + Send + 'static,
    ) -> Self {
        let transport = Self::new();
        transport.handle().lock().responder = Some(Box::new(responder));
        transport
    }

    /// Inspection handle that stays valid after the transport moved away.
    pub(crate) fn handle(&self) -> PeerHandle {
        PeerHandle(self.peer.clone())
    }
}

#[derive(Clone)]
pub(crate) struct PeerHandle(Arc<Mutex<Peer>>);

impl PeerHandle {
    fn lock(&self) -> MutexGuard<'_, Peer> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn push_raw(&self, bytes: &[u8]) {
        self.lock().rx.extend(bytes);
    }

    /// Commands written so far, without `AT+` and terminator.
    pub(crate) fn written(&self) -> Vec<String> {
        self.lock().written.clone()
    }

    pub(crate) fn count(&self, command: &str) -> usize {
        self.lock().written.iter().filter(|c| *c == command).count()
    }

    pub(crate) fn baud_history(&self) -> Vec<u32> {
        self.lock().baud_history.clone()
    }

    pub(crate) fn baud_rate(&self) -> u32 {
        self.lock().baud_rate
    }

    pub(crate) fn set_module_rate(&self, rate: u32) {
        self.lock().module_rate = Some(rate);
    }

    pub(crate) fn fail_reads_with(&self, kind: io::ErrorKind) {
        self.lock().read_error = Some(kind);
    }

    /// Reads hit end of file, as after the adapter was unplugged.
    pub(crate) fn hang_up(&self) {
        self.lock().hung_up = true;
    }

    /// Keeps delivering `line` for as long as nothing else is queued.
    pub(crate) fn stream_line(&self, line: &str) {
        self.lock().stream_line = Some(line.to_string());
    }

    pub(crate) fn is_open(&self) -> bool {
        self.lock().open
    }
}

impl Transport for FakeTransport {
    fn open(&mut self) -> Result<()> {
        self.handle().lock().open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.handle().lock().open = false;
    }

    fn is_open(&self) -> bool {
        self.handle().is_open()
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        let handle = self.handle();
        let mut peer = handle.lock();
        peer.baud_rate = baud_rate;
        peer.baud_history.push(baud_rate);
        Ok(())
    }

    async fn read_available(&mut self) -> Result<Vec<u8>> {
        let streamed = {
            let handle = self.handle();
            let mut peer = handle.lock();
            if !peer.open {
                return Err(BridgeError::transport("fake port closed"));
            }
            if let Some(kind) = peer.read_error {
                return Err(io::Error::from(kind).into());
            }
            if peer.hung_up && peer.rx.is_empty() {
                return Err(hang_up_error());
            }
            if peer.rx.is_empty()
                && let Some(line) = peer.stream_line.clone()
            {
                peer.rx.extend(line.as_bytes());
                peer.rx.extend(LINE_TERMINATOR.as_bytes());
                true
            } else {
                false
            }
        };
        if streamed {
            // let other tasks run between streamed lines
            tokio::task::yield_now().await;
        }
        let handle = self.handle();
        let mut peer = handle.lock();
        let n = peer.rx.len().min(self.chunk_size);
        Ok(peer.rx.drain(..n).collect())
    }

    async fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        let handle = self.handle();
        let mut peer = handle.lock();
        if !peer.open {
            return Err(BridgeError::transport("fake port closed"));
        }
        let text = String::from_utf8_lossy(data);
        let command = text
            .strip_prefix(COMMAND_PREFIX)
            .unwrap_or(text.as_ref())
            .trim_end_matches(LINE_TERMINATOR)
            .to_string();
        peer.written.push(command.clone());

        let hears = peer.module_rate.is_none_or(|rate| rate == peer.baud_rate);
        if !hears {
            return Ok(());
        }
        let reply = match peer.responder.as_mut() {
            Some(responder) => responder(&command),
            None => Vec::new(),
        };
        for line in reply {
            peer.rx.extend(line.as_bytes());
            peer.rx.extend(LINE_TERMINATOR.as_bytes());
        }
        // the module switches its own rate right after acknowledging
        if let Some(index) = command
            .strip_prefix("UART=")
            .and_then(|n| n.parse::<u8>().ok())
            .and_then(BaudRateIndex::new)
        {
            peer.module_rate = Some(index.rate());
        }
        Ok(())
    }
}

/// Builds an owned line list.
pub(crate) fn lines(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|line| line.to_string()).collect()
}

/// Timings short enough for tests.
pub(crate) fn fast_timing() -> Timing {
    Timing {
        settle_delay_ms: 0,
        command_timeout_ms: 200,
        probe_timeout_ms: 30,
        connect_timeout_ms: 200,
        scan_round_timeout_ms: 200,
        quick_restart_after_ms: None,
        stop_grace_ms: 0,
        poll_interval_ms: 1,
        idle_poll_ms: 2,
        stop_poll_ms: 2,
        baud_change_attempts: 3,
        stale_after_ms: 5000,
    }
}
