//! # Command Executor
//!
//! Sends one AT command and collects response lines until a terminal marker
//! shows up. Commands are refused while a scan owns the transport.

use std::slice;
use std::sync::Arc;

use log::{debug, error, trace, warn};
use tokio::sync::Mutex;
use tokio::time::{self, Duration, Instant};

use super::session::{AdapterSession, ScanState};
use crate::config::Timing;
use crate::error::{BridgeError, Result};
use crate::protocol::{
    BaudRateIndex, LineReader, MARKER_PREFIX, RESP_ERROR, RESP_OK, classify, field_value,
    frame_command,
};
use crate::serial::Transport;

/// One received line after classification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseLine {
    /// The line as received, terminator included.
    pub raw: String,
    /// Text from the matched marker on, or the stripped line.
    pub payload: String,
    /// The terminal marker found in this line.
    pub marker: Option<String>,
}

impl ResponseLine {
    fn classify(raw: String, markers: &[&str]) -> Self {
        let classification = classify(&raw, markers);
        let payload = classification.payload.to_string();
        let marker = classification.marker.map(str::to_string);
        ResponseLine {
            raw,
            payload,
            marker,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.marker.is_some()
    }
}

/// A command's response: a single line, or every line in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Line(ResponseLine),
    Lines(Vec<ResponseLine>),
}

impl Response {
    fn from_lines(mut lines: Vec<ResponseLine>) -> Self {
        if lines.len() == 1
            && let Some(line) = lines.pop()
        {
            return Response::Line(line);
        }
        Response::Lines(lines)
    }

    pub fn lines(&self) -> &[ResponseLine] {
        match self {
            Response::Line(line) => slice::from_ref(line),
            Response::Lines(lines) => lines,
        }
    }

    /// The line that ended the response; `None` if the wait was aborted.
    pub fn terminal(&self) -> Option<&ResponseLine> {
        self.lines().last().filter(|line| line.is_terminal())
    }

    pub fn terminal_marker(&self) -> Option<&str> {
        self.terminal().and_then(|line| line.marker.as_deref())
    }

    /// Payload of the terminal line.
    pub fn payload(&self) -> Option<&str> {
        self.terminal().map(|line| line.payload.as_str())
    }
}

/// What the wait loop does next, as decided by [`LineObserver::poll_stop`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitControl {
    Continue,
    /// Writes the command, then keeps waiting.
    Send(&'static str),
    /// Ends the wait without a terminal line.
    Abort,
}

/// Real-time view of a response as it arrives, shared by command execution
/// and scanning.
pub trait LineObserver: Send {
    /// Receives each line's classified payload, in arrival order.
    fn on_line(&mut self, payload: &str);

    /// Consulted for every received line before it is classified.
    fn poll_stop(&mut self) -> WaitControl {
        WaitControl::Continue
    }
}

impl<F> LineObserver for F
where
    F: FnMut(&str) + Send,
{
    fn on_line(&mut self, payload: &str) {
        self(payload)
    }
}

/// The transport together with its line buffer.
pub(crate) struct Link<T> {
    transport: T,
    reader: LineReader,
}

impl<T: Transport> Link<T> {
    async fn send(&mut self, command: &str) -> Result<()> {
        let framed = frame_command(command);
        trace!("tx {}", hex::encode(&framed));
        debug!("-> AT+{command}");
        self.transport.write_bytes(&framed).await
    }

    async fn wait_response(
        &mut self,
        markers: &[&str],
        timeout: Duration,
        observer: &mut dyn LineObserver,
    ) -> Result<Response> {
        let deadline = Instant::now() + timeout;
        let mut lines = Vec::new();
        loop {
            let raw = self.reader.read_line(&mut self.transport, deadline).await?;
            match observer.poll_stop() {
                WaitControl::Continue => {}
                WaitControl::Send(command) => self.send(command).await?,
                WaitControl::Abort => {
                    debug!("wait aborted after {} lines", lines.len());
                    return Ok(Response::from_lines(lines));
                }
            }
            let line = ResponseLine::classify(raw, markers);
            debug!("<- {}", line.payload);
            observer.on_line(&line.payload);
            let done = line.is_terminal();
            lines.push(line);
            if done {
                return Ok(Response::from_lines(lines));
            }
        }
    }
}

/// Serialises AT commands over the shared transport.
pub struct CommandExecutor<T> {
    link: Arc<Mutex<Link<T>>>,
    session: Arc<AdapterSession>,
    timing: Timing,
}

impl<T> Clone for CommandExecutor<T> {
    fn clone(&self) -> Self {
        CommandExecutor {
            link: self.link.clone(),
            session: self.session.clone(),
            timing: self.timing.clone(),
        }
    }
}

impl<T: Transport> CommandExecutor<T> {
    pub fn new(transport: T, session: Arc<AdapterSession>, timing: Timing) -> Self {
        let reader = LineReader::new(timing.poll_interval());
        CommandExecutor {
            link: Arc::new(Mutex::new(Link { transport, reader })),
            session,
            timing,
        }
    }

    pub fn session(&self) -> &Arc<AdapterSession> {
        &self.session
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub async fn open(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        link.transport.open()?;
        link.reader.reset();
        Ok(())
    }

    pub async fn close(&self) {
        let mut link = self.link.lock().await;
        link.transport.close();
        link.reader.reset();
    }

    pub async fn is_open(&self) -> bool {
        self.link.lock().await.transport.is_open()
    }

    /// Switches the transport's rate and records it in the session in one
    /// step. Buffered bytes from the old rate are discarded.
    pub async fn switch_baud_rate(&self, index: BaudRateIndex) -> Result<()> {
        let mut link = self.link.lock().await;
        link.reader.reset();
        if let Err(e) = link.transport.set_baud_rate(index.rate()) {
            self.session.set_baud_index(None);
            return Err(e);
        }
        self.session.set_baud_index(Some(index));
        debug!("transport now at {index}");
        Ok(())
    }

    /// Executes `command` and waits until a line contains one of `markers`.
    pub async fn execute(
        &self,
        command: &str,
        markers: &[&str],
        timeout: Duration,
    ) -> Result<Response> {
        self.execute_with(command, markers, timeout, &mut |_: &str| {})
            .await
    }

    /// Like [`execute`](Self::execute), reporting every line to `observer`.
    pub async fn execute_with(
        &self,
        command: &str,
        markers: &[&str],
        timeout: Duration,
        observer: &mut dyn LineObserver,
    ) -> Result<Response> {
        self.ensure_stopped(command)?;
        if command.starts_with(MARKER_PREFIX) {
            warn!("Command '{command}' starts with '+', the AT+ prefix is already added");
        }
        self.run_unguarded(command, markers, timeout, observer).await
    }

    /// Executes a setter, mapping the module's error marker to
    /// [`BridgeError::DeviceProtocol`] naming `action`.
    pub async fn apply(&self, command: &str, action: &str, timeout: Duration) -> Result<()> {
        let response = self
            .execute(command, &[RESP_ERROR, RESP_OK], timeout)
            .await?;
        if response.terminal_marker() == Some(RESP_ERROR) {
            return Err(BridgeError::device_protocol(action));
        }
        Ok(())
    }

    /// Queries `<field>?` and returns the value of the `+<field>:` line.
    pub async fn query(&self, field: &str, timeout: Duration) -> Result<String> {
        let marker = format!("{MARKER_PREFIX}{field}");
        let response = self
            .execute(&format!("{field}?"), &[marker.as_str()], timeout)
            .await?;
        response
            .payload()
            .and_then(field_value)
            .map(str::to_string)
            .ok_or_else(|| BridgeError::invalid_response(format!("no value in {field} reply")))
    }

    /// The wait primitive without the scan-state precondition; the scan
    /// task drives its rounds through it.
    pub(crate) async fn run_unguarded(
        &self,
        command: &str,
        markers: &[&str],
        timeout: Duration,
        observer: &mut dyn LineObserver,
    ) -> Result<Response> {
        let mut link = self.link.lock().await;
        time::sleep(self.timing.settle_delay()).await;
        link.send(command).await?;
        link.wait_response(markers, timeout, observer).await
    }

    fn ensure_stopped(&self, command: &str) -> Result<()> {
        let state = self.session.scan_state();
        if state != ScanState::Stopped {
            error!("Refusing '{command}' while scan is {state}; stop the scan first");
            return Err(BridgeError::state_violation(command, state));
        }
        Ok(())
    }
}
