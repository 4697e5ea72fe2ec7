//! # Scan Controller
//!
//! A background task per open transport that runs discovery rounds while the
//! session's scan state is `Running`:
//!
//! 1. send `SCAN=1` and read lines until `+SCAN END` (or the round timeout)
//! 2. every non-control line is an advertisement and updates the device table
//! 3. `SCAN=0` is sent once per round to end it early, either after the
//!    quick-restart interval or when a stop was requested
//!
//! When a round ends and the state has become `Stopping`, the task completes
//! the transition to `Stopped` and idles until the next `start()`.

use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use super::device::{Advertisement, DeviceObserver, DeviceTable};
use super::executor::{CommandExecutor, LineObserver, WaitControl};
use super::session::{AdapterSession, ScanState};
use crate::config::Timing;
use crate::error::{BridgeError, Result};
use crate::protocol::{CMD_SCAN_START, CMD_SCAN_STOP, MARKER_PREFIX, RESP_SCAN_END};
use crate::serial::Transport;

type ObserverSlot = Arc<RwLock<Option<Arc<dyn DeviceObserver>>>>;

/// Starts, stops and runs background discovery.
pub struct ScanController<T> {
    executor: CommandExecutor<T>,
    devices: DeviceTable,
    observer: ObserverSlot,
    task: Option<JoinHandle<()>>,
}

impl<T: Transport> ScanController<T> {
    pub fn new(executor: CommandExecutor<T>) -> Self {
        ScanController {
            executor,
            devices: DeviceTable::new(),
            observer: Arc::new(RwLock::new(None)),
            task: None,
        }
    }

    pub fn devices(&self) -> &DeviceTable {
        &self.devices
    }

    pub fn state(&self) -> ScanState {
        self.executor.session().scan_state()
    }

    /// Replaces the discovery observer; `None` detaches it.
    pub fn set_observer(&self, observer: Option<Arc<dyn DeviceObserver>>) {
        *self.observer.write().unwrap_or_else(PoisonError::into_inner) = observer;
    }

    /// Spawns the background task. It runs until the transport closes.
    pub fn spawn(&mut self) {
        if self.task.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let scan_loop = ScanLoop {
            executor: self.executor.clone(),
            devices: self.devices.clone(),
            observer: self.observer.clone(),
        };
        self.task = Some(tokio::spawn(scan_loop.run()));
    }

    /// `Stopped -> Running`. Commands are refused until [`stop`](Self::stop)
    /// returns.
    pub fn start(&self) -> Result<()> {
        let session = self.executor.session();
        if !session.begin_scan() {
            return Err(BridgeError::state_violation(
                CMD_SCAN_START,
                session.scan_state(),
            ));
        }
        info!("Scan started");
        Ok(())
    }

    /// Requests the scan to stop and waits until the task reports `Stopped`.
    pub async fn stop(&self) {
        let session = self.executor.session();
        if session.scan_state() == ScanState::Stopped {
            return;
        }
        session.request_stop();
        while session.scan_state() != ScanState::Stopped {
            if !self.task_alive() {
                // nobody left to complete the transition
                session.force_stopped();
                break;
            }
            time::sleep(self.executor.timing().stop_poll()).await;
        }
        info!("Scan stopped");
    }

    fn task_alive(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Waits for the background task to end after the transport closed.
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            error!("Scan task ended abnormally: {e}");
        }
    }
}

struct ScanLoop<T> {
    executor: CommandExecutor<T>,
    devices: DeviceTable,
    observer: ObserverSlot,
}

impl<T: Transport> ScanLoop<T> {
    async fn run(self) {
        debug!("Scan task running");
        let session = self.executor.session().clone();
        while self.executor.is_open().await {
            match session.scan_state() {
                ScanState::Running => match self.round(&session).await {
                    Ok(()) => {}
                    Err(e) if e.is_timeout() => debug!("Scan round timed out"),
                    Err(e) if e.is_device_lost() => {
                        error!("Serial device lost during scan: {e}");
                        self.executor.close().await;
                        session.force_stopped();
                        break;
                    }
                    Err(e) => error!("Scan round failed: {e}"),
                },
                ScanState::Stopping => {
                    session.finish_stop();
                }
                ScanState::Stopped => time::sleep(self.executor.timing().idle_poll()).await,
            }
        }
        debug!("Scan task finished");
    }

    async fn round(&self, session: &AdapterSession) -> Result<()> {
        session.clear_stop_sent_by_command();
        let timing = self.executor.timing();
        let mut round = ScanRound {
            started: Instant::now(),
            session,
            timing,
            devices: &self.devices,
            observer: &self.observer,
        };
        self.executor
            .run_unguarded(
                CMD_SCAN_START,
                &[RESP_SCAN_END],
                timing.scan_round_timeout(),
                &mut round,
            )
            .await?;
        Ok(())
    }
}

/// Per-round hooks: advertisement parsing and the early stop rules.
struct ScanRound<'a> {
    started: Instant,
    session: &'a AdapterSession,
    timing: &'a Timing,
    devices: &'a DeviceTable,
    observer: &'a ObserverSlot,
}

impl ScanRound<'_> {
    fn send_stop_once(&self) -> WaitControl {
        if self.session.stop_sent_by_command() {
            return WaitControl::Continue;
        }
        self.session.mark_stop_sent_by_command();
        WaitControl::Send(CMD_SCAN_STOP)
    }

    fn notify(&self, advertisement: Advertisement) {
        let device = self.devices.upsert(advertisement);
        let observer = self
            .observer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(observer) = observer {
            observer.on_device(&device);
        }
    }
}

impl LineObserver for ScanRound<'_> {
    fn on_line(&mut self, payload: &str) {
        if payload.is_empty() || payload.starts_with(MARKER_PREFIX) {
            return;
        }
        match payload.parse::<Advertisement>() {
            Ok(advertisement) => self.notify(advertisement),
            Err(e) => warn!("Skipping discovery line '{payload}': {e}"),
        }
    }

    fn poll_stop(&mut self) -> WaitControl {
        let elapsed = self.started.elapsed();
        if let Some(burst) = self.timing.quick_restart_after()
            && elapsed > burst
        {
            return self.send_stop_once();
        }
        if self.session.scan_state() == ScanState::Stopping && elapsed > self.timing.stop_grace() {
            return self.send_stop_once();
        }
        WaitControl::Continue
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Mutex;

    use mockall::predicate::function;
    use tokio::time::Duration;

    use super::*;
    use crate::adapter::device::{AddressType, DiscoveredDevice, MockDeviceObserver};
    use crate::testing::{FakeTransport, PeerHandle, fast_timing, lines};

    fn controller(transport: FakeTransport, timing: Timing) -> (ScanController<FakeTransport>, PeerHandle) {
        let peer = transport.handle();
        let executor = CommandExecutor::new(transport, Arc::new(AdapterSession::new()), timing);
        (ScanController::new(executor), peer)
    }

    fn advertising_peer() -> FakeTransport {
        FakeTransport::responding(|cmd| match cmd {
            "SCAN=1" => lines(&[
                "+SCAN START",
                "AA:BB:CC:DD:EE:FF 0 -67 MyDevice",
                "AA:BB:CC:DD:EE:FF 0 -70",
                "+SCAN END",
            ]),
            _ => Vec::new(),
        })
    }

    #[test]
    fn test_round_parses_lines_and_notifies_in_order() {
        let session = AdapterSession::new();
        let timing = fast_timing();
        let devices = DeviceTable::new();

        let mut observer = MockDeviceObserver::new();
        let mut sequence = mockall::Sequence::new();
        observer
            .expect_on_device()
            .with(function(|d: &DiscoveredDevice| {
                d.rssi == -67 && d.name.as_deref() == Some("MyDevice")
            }))
            .times(1)
            .in_sequence(&mut sequence)
            .return_const(());
        observer
            .expect_on_device()
            .with(function(|d: &DiscoveredDevice| {
                d.rssi == -70 && d.name.as_deref() == Some("MyDevice")
            }))
            .times(1)
            .in_sequence(&mut sequence)
            .return_const(());
        let observer: Arc<dyn DeviceObserver> = Arc::new(observer);
        let slot: ObserverSlot = Arc::new(RwLock::new(Some(observer)));

        let mut round = ScanRound {
            started: Instant::now(),
            session: &session,
            timing: &timing,
            devices: &devices,
            observer: &slot,
        };
        round.on_line("+SCAN START");
        round.on_line("AA:BB:CC:DD:EE:FF 0 -67 MyDevice");
        round.on_line("not a device");
        round.on_line("AA:BB:CC:DD:EE:FF 0 -70");
        round.on_line("+SCAN END");

        let device = devices.get("AA:BB:CC:DD:EE:FF").unwrap();
        assert_eq!(device.address_type, AddressType::Static);
        assert_eq!(device.rssi, -70);
        assert_eq!(device.name.as_deref(), Some("MyDevice"));
        assert_eq!(devices.len(), 1);
    }

    #[test]
    fn test_quick_restart_sends_stop_once() {
        let session = AdapterSession::new();
        session.begin_scan();
        let timing = Timing {
            quick_restart_after_ms: Some(0),
            ..fast_timing()
        };
        let devices = DeviceTable::new();
        let slot: ObserverSlot = Arc::new(RwLock::new(None));
        let mut round = ScanRound {
            started: Instant::now() - Duration::from_millis(5),
            session: &session,
            timing: &timing,
            devices: &devices,
            observer: &slot,
        };
        assert_eq!(round.poll_stop(), WaitControl::Send(CMD_SCAN_STOP));
        assert_eq!(round.poll_stop(), WaitControl::Continue);
    }

    #[test]
    fn test_stop_request_waits_for_grace_period() {
        let session = AdapterSession::new();
        session.begin_scan();
        let timing = Timing {
            stop_grace_ms: 1000,
            ..fast_timing()
        };
        let devices = DeviceTable::new();
        let slot: ObserverSlot = Arc::new(RwLock::new(None));
        let mut round = ScanRound {
            started: Instant::now(),
            session: &session,
            timing: &timing,
            devices: &devices,
            observer: &slot,
        };
        assert_eq!(round.poll_stop(), WaitControl::Continue);
        session.request_stop();
        assert_eq!(round.poll_stop(), WaitControl::Continue);

        round.started = Instant::now() - Duration::from_millis(1500);
        assert_eq!(round.poll_stop(), WaitControl::Send(CMD_SCAN_STOP));
        assert_eq!(round.poll_stop(), WaitControl::Continue);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_scan_discovers_then_stops() {
        let (mut scanner, peer) = controller(advertising_peer(), fast_timing());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        scanner.set_observer(Some(Arc::new(move |device: &DiscoveredDevice| {
            sink.lock().unwrap().push(device.rssi);
        })));
        scanner.spawn();

        scanner.start().unwrap();
        time::sleep(Duration::from_millis(50)).await;
        scanner.stop().await;

        assert_eq!(scanner.state(), ScanState::Stopped);
        assert!(peer.count("SCAN=1") >= 1);
        let device = scanner.devices().get("aa:bb:cc:dd:ee:ff").unwrap();
        assert_eq!(device.rssi, -70);
        assert_eq!(device.name.as_deref(), Some("MyDevice"));
        let seen = seen.lock().unwrap();
        assert_eq!(&seen[..2], [-67, -70]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_completes_after_silent_round() {
        // no +SCAN END ever arrives; the round has to run into its timeout
        let transport = FakeTransport::responding(|cmd| match cmd {
            "SCAN=1" => lines(&["AA:BB:CC:DD:EE:01 1 -50"]),
            _ => Vec::new(),
        });
        let (mut scanner, peer) = controller(transport, fast_timing());
        scanner.spawn();
        scanner.start().unwrap();
        time::sleep(Duration::from_millis(20)).await;

        assert_eq!(scanner.state(), ScanState::Running);
        let before = Instant::now();
        scanner.stop().await;
        assert_eq!(scanner.state(), ScanState::Stopped);
        assert!(before.elapsed() < Duration::from_millis(1000));
        assert_eq!(scanner.devices().len(), 1);
        assert_eq!(peer.count("SCAN=1"), 1);
    }

    fn streaming_peer() -> FakeTransport {
        let transport = FakeTransport::responding(|cmd| match cmd {
            "SCAN=0" => lines(&["+SCAN END"]),
            _ => Vec::new(),
        });
        transport
            .handle()
            .stream_line("AA:BB:CC:DD:EE:02 0 -55 Beacon");
        transport
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_quick_restart_writes_one_stop_per_round() {
        let timing = Timing {
            quick_restart_after_ms: Some(0),
            ..fast_timing()
        };
        let (mut scanner, peer) = controller(streaming_peer(), timing);
        scanner.spawn();
        scanner.start().unwrap();
        time::sleep(Duration::from_millis(50)).await;
        scanner.stop().await;

        let rounds = peer.count("SCAN=1");
        assert!(rounds >= 2, "only {rounds} rounds ran");
        assert_eq!(peer.count("SCAN=0"), rounds);
        assert_eq!(scanner.devices().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_request_ends_streaming_round_after_grace() {
        let timing = Timing {
            quick_restart_after_ms: None,
            stop_grace_ms: 30,
            scan_round_timeout_ms: 5000,
            ..fast_timing()
        };
        let (mut scanner, peer) = controller(streaming_peer(), timing);
        scanner.spawn();
        scanner.start().unwrap();
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(peer.count("SCAN=0"), 0);

        let before = Instant::now();
        scanner.stop().await;
        assert_eq!(scanner.state(), ScanState::Stopped);
        // ended by SCAN=0, well before the round timeout
        assert!(before.elapsed() < Duration::from_millis(2000));
        assert_eq!(peer.count("SCAN=1"), 1);
        assert_eq!(peer.count("SCAN=0"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_hang_up_closes_session() {
        let (mut scanner, peer) = controller(FakeTransport::new(), fast_timing());
        scanner.spawn();
        scanner.start().unwrap();
        peer.hang_up();

        time::timeout(Duration::from_secs(2), scanner.join())
            .await
            .unwrap();
        assert_eq!(scanner.state(), ScanState::Stopped);
        assert!(!peer.is_open());
    }

    #[tokio::test]
    async fn test_start_twice_is_refused() {
        let (scanner, _) = controller(FakeTransport::new(), fast_timing());
        scanner.start().unwrap();
        let err = scanner.start().unwrap_err();
        assert!(matches!(err, BridgeError::StateViolation { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_device_loss_closes_session() {
        let (mut scanner, peer) = controller(advertising_peer(), fast_timing());
        scanner.spawn();
        scanner.start().unwrap();
        peer.fail_reads_with(io::ErrorKind::PermissionDenied);

        time::timeout(Duration::from_secs(2), scanner.join())
            .await
            .unwrap();
        assert_eq!(scanner.state(), ScanState::Stopped);
        assert!(!peer.is_open());
    }

    #[tokio::test]
    async fn test_stop_without_task_does_not_hang() {
        let (scanner, _) = controller(FakeTransport::new(), fast_timing());
        scanner.start().unwrap();
        time::timeout(Duration::from_secs(1), scanner.stop())
            .await
            .unwrap();
        assert_eq!(scanner.state(), ScanState::Stopped);
    }
}
