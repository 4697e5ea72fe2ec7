//! Per-transport session state shared by the scan task and callers.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI16, AtomicU8, Ordering};

use log::debug;

use crate::protocol::BaudRateIndex;

/// Scan state machine: `Stopped -> Running -> Stopping -> Stopped`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ScanState {
    Stopped = 0,
    Running = 1,
    Stopping = 2,
}

impl ScanState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ScanState::Running,
            2 => ScanState::Stopping,
            _ => ScanState::Stopped,
        }
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanState::Stopped => write!(f, "Stopped"),
            ScanState::Running => write!(f, "Running"),
            ScanState::Stopping => write!(f, "Stopping"),
        }
    }
}

const BAUD_UNKNOWN: i16 = -1;

/// State of one open transport. Every field is a lock-free atomic so the
/// scan task and callers never block each other reading it.
#[derive(Debug)]
pub struct AdapterSession {
    scan_state: AtomicU8,
    baud_index: AtomicI16,
    stop_sent_by_command: AtomicBool,
}

impl Default for AdapterSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterSession {
    pub fn new() -> Self {
        AdapterSession {
            scan_state: AtomicU8::new(ScanState::Stopped as u8),
            baud_index: AtomicI16::new(BAUD_UNKNOWN),
            stop_sent_by_command: AtomicBool::new(false),
        }
    }

    pub fn scan_state(&self) -> ScanState {
        ScanState::from_u8(self.scan_state.load(Ordering::Acquire))
    }

    /// `Stopped -> Running`. Returns `false` if the state was not `Stopped`.
    pub fn begin_scan(&self) -> bool {
        self.transition(ScanState::Stopped, ScanState::Running)
    }

    /// `Running -> Stopping`. Returns `false` if the state was not `Running`.
    pub fn request_stop(&self) -> bool {
        self.transition(ScanState::Running, ScanState::Stopping)
    }

    /// `Stopping -> Stopped`, performed by the scan task.
    pub fn finish_stop(&self) -> bool {
        self.transition(ScanState::Stopping, ScanState::Stopped)
    }

    /// Unconditional transition to `Stopped`, only for a lost transport.
    pub fn force_stopped(&self) {
        let previous = self.scan_state.swap(ScanState::Stopped as u8, Ordering::AcqRel);
        debug!("scan state forced {} -> Stopped", ScanState::from_u8(previous));
    }

    fn transition(&self, from: ScanState, to: ScanState) -> bool {
        let done = self
            .scan_state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if done {
            debug!("scan state {from} -> {to}");
        }
        done
    }

    /// The rate the transport is configured for, `None` before detection.
    pub fn baud_index(&self) -> Option<BaudRateIndex> {
        let raw = self.baud_index.load(Ordering::Acquire);
        u8::try_from(raw).ok().and_then(BaudRateIndex::new)
    }

    /// Only called together with the transport's rate change.
    pub(crate) fn set_baud_index(&self, index: Option<BaudRateIndex>) {
        let raw = index.map_or(BAUD_UNKNOWN, |i| i16::from(i.index()));
        self.baud_index.store(raw, Ordering::Release);
    }

    pub(crate) fn stop_sent_by_command(&self) -> bool {
        self.stop_sent_by_command.load(Ordering::Acquire)
    }

    pub(crate) fn mark_stop_sent_by_command(&self) {
        self.stop_sent_by_command.store(true, Ordering::Release);
    }

    pub(crate) fn clear_stop_sent_by_command(&self) {
        self.stop_sent_by_command.store(false, Ordering::Release);
    }
}
