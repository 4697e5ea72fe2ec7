//! # Adapter Facade
//!
//! Domain operations of the bridge module built on the command executor and
//! the scan controller. Setters expect `OK`/`ERROR`, getters expect the
//! `+<FIELD>:` line of the field they ask for.

use std::sync::{Arc, OnceLock};

use log::{info, warn};
use regex::Regex;

use super::device::{AddressType, DeviceObserver, DeviceTable};
use super::executor::CommandExecutor;
use super::negotiator::BaudRateNegotiator;
use super::scan::ScanController;
use super::session::{AdapterSession, ScanState};
use crate::config::Timing;
use crate::error::{BridgeError, Result};
use crate::protocol::{
    BaudRateIndex, FIELD_AUTO_RECONNECT, FIELD_MAC, FIELD_NOTIFY_UUID, FIELD_SERVICE_UUID,
    FIELD_TX_POWER, FIELD_UART, FIELD_VERSION, FIELD_WRITE_UUID, RESP_CONNECT_TIMEOUT,
    RESP_CONNECTED, RESP_DEVICE, RESP_DISCONNECTED, RESP_ERROR, RESP_READY, field_value,
};
use crate::serial::{PortSettings, SerialTransport, Transport};

/// Factory defaults of the transparent transfer service.
pub const DEFAULT_SERVICE_UUID: &str = "FFF0";
pub const DEFAULT_NOTIFY_UUID: &str = "FFF1";
pub const DEFAULT_WRITE_UUID: &str = "FFF2";

/// Accepted advertising interval in milliseconds.
pub const ADVERTISING_INTERVAL_MS: std::ops::RangeInclusive<u32> = 20..=10240;

/// Role code the module reports for a peripheral it is connected to.
const PERIPHERAL_ROLE: &str = "0";

fn address_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[0-9A-Fa-f]{2}(:?[0-9A-Fa-f]{2}){5}$").expect("Invalid regex pattern")
    })
}

/// Checks that `address` is six hex octets, optionally colon separated.
pub fn validate_address(address: &str) -> Result<()> {
    if address_pattern().is_match(address) {
        Ok(())
    } else {
        Err(BridgeError::invalid_argument(format!(
            "'{address}' is not a BLE address"
        )))
    }
}

/// One bridge module behind one transport.
pub struct BleUartAdapter<T> {
    executor: CommandExecutor<T>,
    scanner: ScanController<T>,
}

impl BleUartAdapter<SerialTransport> {
    pub fn from_settings(settings: PortSettings, timing: Timing) -> Self {
        Self::new(SerialTransport::new(settings), timing)
    }
}

impl<T: Transport> BleUartAdapter<T> {
    pub fn new(transport: T, timing: Timing) -> Self {
        let executor = CommandExecutor::new(transport, Arc::new(AdapterSession::new()), timing);
        let scanner = ScanController::new(executor.clone());
        BleUartAdapter { executor, scanner }
    }

    pub fn session(&self) -> &AdapterSession {
        self.executor.session()
    }

    pub fn scan_state(&self) -> ScanState {
        self.scanner.state()
    }

    pub fn timing(&self) -> &Timing {
        self.executor.timing()
    }

    /// Opens the transport and starts the background scan task.
    pub async fn open(&mut self) -> Result<()> {
        self.executor.open().await?;
        self.scanner.spawn();
        info!("Bridge session opened");
        Ok(())
    }

    /// [`open`](Self::open) followed by [`detect_baud_rate`](Self::detect_baud_rate).
    pub async fn open_and_detect(&mut self) -> Result<BaudRateIndex> {
        self.open().await?;
        self.detect_baud_rate().await
    }

    pub async fn detect_baud_rate(&self) -> Result<BaudRateIndex> {
        BaudRateNegotiator::new(&self.executor).detect().await
    }

    /// Stops any scan, closes the transport and waits for the scan task.
    pub async fn close(&mut self) {
        self.scanner.stop().await;
        self.executor.close().await;
        self.scanner.join().await;
        info!("Bridge session closed");
    }

    pub async fn is_open(&self) -> bool {
        self.executor.is_open().await
    }

    pub fn start_scan(&self) -> Result<()> {
        self.scanner.start()
    }

    /// Returns once the scan task has reported `Stopped`.
    pub async fn stop_scan(&self) {
        self.scanner.stop().await;
    }

    pub fn devices(&self) -> &DeviceTable {
        self.scanner.devices()
    }

    pub fn set_observer(&self, observer: Option<Arc<dyn DeviceObserver>>) {
        self.scanner.set_observer(observer);
    }

    async fn query(&self, field: &str) -> Result<String> {
        self.executor
            .query(field, self.timing().command_timeout())
            .await
    }

    async fn apply(&self, command: &str, action: &str) -> Result<()> {
        self.executor
            .apply(command, action, self.timing().command_timeout())
            .await
    }

    pub async fn version(&self) -> Result<String> {
        self.query(FIELD_VERSION).await
    }

    pub async fn mac_address(&self) -> Result<String> {
        self.query(FIELD_MAC).await
    }

    pub async fn tx_power(&self) -> Result<String> {
        self.query(FIELD_TX_POWER).await
    }

    /// Connects to a peripheral.
    ///
    /// The module's own connect timeout is reported as
    /// [`BridgeError::ConnectTimeout`]; silence from the module is the usual
    /// [`BridgeError::TimedOut`].
    pub async fn connect(&self, address: &str, address_type: AddressType) -> Result<()> {
        validate_address(address)?;
        let response = self
            .executor
            .execute(
                &format!("CONN={address},{}", address_type.code()),
                &[RESP_CONNECTED, RESP_CONNECT_TIMEOUT],
                self.timing().connect_timeout(),
            )
            .await?;
        if response.terminal_marker() == Some(RESP_CONNECT_TIMEOUT) {
            warn!("Module gave up connecting to {address}");
            return Err(BridgeError::ConnectTimeout {
                address: address.to_string(),
                address_type: address_type.to_string(),
            });
        }
        info!("Connected to {address} ({address_type})");
        Ok(())
    }

    /// Address of the connected peripheral, if any.
    pub async fn connected_device(&self) -> Result<Option<String>> {
        let response = self
            .executor
            .execute("DEV?", &[RESP_DEVICE, RESP_ERROR], self.timing().command_timeout())
            .await?;
        if response.terminal_marker() != Some(RESP_DEVICE) {
            return Ok(None);
        }
        let Some(value) = response.payload().and_then(field_value) else {
            return Ok(None);
        };
        let mut fields = value.split(',');
        match (fields.next(), fields.next()) {
            (Some(PERIPHERAL_ROLE), Some(address)) => Ok(Some(address.trim().to_string())),
            _ => Ok(None),
        }
    }

    pub async fn disconnect(&self) -> Result<()> {
        let response = self
            .executor
            .execute(
                "DISCONN=0",
                &[RESP_DISCONNECTED, RESP_ERROR],
                self.timing().command_timeout(),
            )
            .await?;
        if response.terminal_marker() == Some(RESP_ERROR) {
            return Err(BridgeError::device_protocol(
                "disconnect, no device may be connected",
            ));
        }
        info!("Disconnected");
        Ok(())
    }

    pub async fn service_uuid(&self) -> Result<String> {
        self.query(FIELD_SERVICE_UUID).await
    }

    pub async fn set_service_uuid(&self, uuid: &str) -> Result<()> {
        self.apply(
            &format!("{FIELD_SERVICE_UUID}={uuid}"),
            "set the transfer service UUID",
        )
        .await
    }

    pub async fn write_uuid(&self) -> Result<String> {
        self.query(FIELD_WRITE_UUID).await
    }

    pub async fn set_write_uuid(&self, uuid: &str) -> Result<()> {
        self.apply(
            &format!("{FIELD_WRITE_UUID}={uuid}"),
            "set the write characteristic UUID",
        )
        .await
    }

    pub async fn notify_uuid(&self) -> Result<String> {
        self.query(FIELD_NOTIFY_UUID).await
    }

    pub async fn set_notify_uuid(&self, uuid: &str) -> Result<()> {
        self.apply(
            &format!("{FIELD_NOTIFY_UUID}={uuid}"),
            "set the notify characteristic UUID",
        )
        .await
    }

    pub async fn auto_reconnect_enabled(&self) -> Result<bool> {
        Ok(self.query(FIELD_AUTO_RECONNECT).await? == "1")
    }

    pub async fn set_auto_reconnect_enabled(&self, enable: bool) -> Result<()> {
        let action = if enable {
            "enable auto-reconnect"
        } else {
            "disable auto-reconnect"
        };
        self.apply(
            &format!("{FIELD_AUTO_RECONNECT}={}", u8::from(enable)),
            action,
        )
        .await
    }

    pub async fn set_auto_reconnect_target(
        &self,
        address: &str,
        address_type: AddressType,
    ) -> Result<()> {
        validate_address(address)?;
        self.apply(
            &format!("AUTO_MAC={address},{}", address_type.code()),
            "set the auto-reconnect device",
        )
        .await
    }

    pub async fn clear_auto_reconnect_list(&self) -> Result<()> {
        self.apply("AUTO_DEL", "clear the auto-reconnect list").await
    }

    /// Reboots the module and waits until it reports ready.
    pub async fn soft_reset(&self) -> Result<()> {
        self.executor
            .execute("REBOOT=1", &[RESP_READY], self.timing().command_timeout())
            .await?;
        info!("Bridge module rebooted");
        Ok(())
    }

    pub async fn set_advertising_interval(&self, interval_ms: u32) -> Result<()> {
        if !ADVERTISING_INTERVAL_MS.contains(&interval_ms) {
            return Err(BridgeError::invalid_argument(format!(
                "advertising interval {interval_ms} ms outside {}..={} ms",
                ADVERTISING_INTERVAL_MS.start(),
                ADVERTISING_INTERVAL_MS.end()
            )));
        }
        self.apply(
            &format!("INTVL={interval_ms}"),
            &format!("set the advertising interval to {interval_ms} ms"),
        )
        .await
    }

    /// Moves module and transport to `index`, verified by reading the rate
    /// back. Timeouts and a mismatching read-back are retried.
    pub async fn change_baud_rate(&self, index: BaudRateIndex) -> Result<()> {
        if self.session().baud_index() == Some(index) {
            warn!("Already at {index}, nothing to change");
            return Ok(());
        }
        let attempts = self.timing().baud_change_attempts;
        for attempt in 1..=attempts {
            let command = format!("{FIELD_UART}={}", index.index());
            match self.apply(&command, "change the baud rate").await {
                Ok(()) => {}
                Err(e) if e.is_timeout() => {
                    warn!("Attempt {attempt}: '{command}' was not acknowledged");
                    continue;
                }
                Err(e) => return Err(e),
            }
            self.executor.switch_baud_rate(index).await?;
            match self.query(FIELD_UART).await {
                Ok(value) if value.trim().parse::<u8>().ok() == Some(index.index()) => {
                    info!("Baud rate changed to {index}");
                    return Ok(());
                }
                Ok(value) => warn!("Attempt {attempt}: module reports rate index '{value}'"),
                Err(e) if e.is_timeout() => warn!("Attempt {attempt}: no answer at {index}"),
                Err(e) => return Err(e),
            }
        }
        Err(BridgeError::BaudRateChange {
            rate: index.rate(),
            attempts,
        })
    }

    /// Connects from a clean slate: stops scanning, reboots, replaces the
    /// auto-reconnect list and connects.
    pub async fn connect_device(
        &self,
        address: &str,
        address_type: AddressType,
        auto_reconnect: bool,
    ) -> Result<()> {
        validate_address(address)?;
        self.stop_scan().await;
        self.soft_reset().await?;
        self.clear_auto_reconnect_list().await?;
        if auto_reconnect {
            self.set_auto_reconnect_target(address, address_type).await?;
        }
        self.connect(address, address_type).await?;
        if auto_reconnect {
            self.set_auto_reconnect_enabled(true).await?;
        }
        Ok(())
    }

    /// Puts the module back to its factory transfer settings.
    pub async fn restore_defaults(&self) -> Result<()> {
        self.stop_scan().await;
        self.set_auto_reconnect_enabled(false).await?;
        self.clear_auto_reconnect_list().await?;
        if let Err(e) = self.disconnect().await {
            info!("Ignoring disconnect failure while restoring defaults: {e}");
        }
        self.set_service_uuid(DEFAULT_SERVICE_UUID).await?;
        self.set_write_uuid(DEFAULT_WRITE_UUID).await?;
        self.set_notify_uuid(DEFAULT_NOTIFY_UUID).await?;
        self.soft_reset().await?;
        info!("Bridge module restored to defaults");
        Ok(())
    }
}
