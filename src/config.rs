//! # Config Module
//!
//! Runtime configuration, persisted as RON.
//!
//! Every delay the bridge module's firmware needs is a field of [`Timing`]
//! rather than a constant; several were tuned by observation and may need
//! adjusting for other firmware revisions.

use std::fs;
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::error::{BridgeError, Result};

/// Default configuration file path.
pub const CONFIG_FILE: &str = "config/bridge.ron";

/// Top-level configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Serial port to open when none is given on the command line.
    pub port_name: Option<String>,
    /// Rate the port is opened with before detection runs.
    pub initial_baud_rate: u32,
    /// Default log filter, `RUST_LOG` takes precedence.
    pub log_level: String,
    pub timing: Timing,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port_name: None,
            initial_baud_rate: 115200,
            log_level: "info".to_string(),
            timing: Timing::default(),
        }
    }
}

impl BridgeConfig {
    /// Loads a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)?;
        let config: BridgeConfig = ron::from_str(&data)
            .map_err(|e| BridgeError::InvalidConfig(format!("{}: {e}", path.display())))?;
        config.timing.validate()?;
        Ok(config)
    }

    /// Loads a configuration file if it exists. `Ok(None)` means there is
    /// no file; a file that exists but does not parse is an error.
    pub fn load_if_present(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        Self::load(path).map(Some)
    }

    /// Like [`load_if_present`](Self::load_if_present), falling back to
    /// defaults when there is no file.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::load_if_present(path)?.unwrap_or_default())
    }

    /// Writes the configuration, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let data = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| BridgeError::InvalidConfig(e.to_string()))?;
        fs::write(path, data)?;
        Ok(())
    }
}

/// Protocol timings, in milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Pause before every command; the module acknowledges commands before
    /// it is ready to process the next one.
    pub settle_delay_ms: u64,
    pub command_timeout_ms: u64,
    /// Timeout of the version probe used during baud-rate detection.
    pub probe_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Upper bound of one scan round.
    pub scan_round_timeout_ms: u64,
    /// Sends the stop-scan command this long into every round so rounds stay
    /// short and discovery restarts quickly. `None` lets rounds run to their
    /// natural end. Weak advertisers may be missed with short bursts.
    pub quick_restart_after_ms: Option<u64>,
    /// After a stop request, rounds older than this are cut short.
    pub stop_grace_ms: u64,
    /// Sleep between empty transport reads.
    pub poll_interval_ms: u64,
    /// Sleep of the scan task while no scan is requested.
    pub idle_poll_ms: u64,
    /// Sleep between checks while waiting for a scan to stop.
    pub stop_poll_ms: u64,
    pub baud_change_attempts: u32,
    /// Devices not seen for this long are reported as stale.
    pub stale_after_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            settle_delay_ms: 500,
            command_timeout_ms: 3000,
            probe_timeout_ms: 3000,
            connect_timeout_ms: 10_000,
            scan_round_timeout_ms: 10_000,
            quick_restart_after_ms: Some(800),
            stop_grace_ms: 1000,
            poll_interval_ms: 1,
            idle_poll_ms: 10,
            stop_poll_ms: 10,
            baud_change_attempts: 3,
            stale_after_ms: 5000,
        }
    }
}

impl Timing {
    pub fn validate(&self) -> Result<()> {
        if self.baud_change_attempts == 0 {
            return Err(BridgeError::InvalidConfig(
                "baud_change_attempts must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 || self.idle_poll_ms == 0 || self.stop_poll_ms == 0 {
            return Err(BridgeError::InvalidConfig(
                "poll intervals must be non-zero".to_string(),
            ));
        }
        if self.command_timeout_ms == 0 || self.scan_round_timeout_ms == 0 {
            return Err(BridgeError::InvalidConfig(
                "timeouts must be non-zero".to_string(),
            ));
        }
        if let Some(burst) = self.quick_restart_after_ms
            && burst >= self.scan_round_timeout_ms
        {
            warn!("quick_restart_after_ms ({burst}) is not below the scan round timeout, it never fires");
        }
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
    pub fn scan_round_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_round_timeout_ms)
    }
    pub fn quick_restart_after(&self) -> Option<Duration> {
        self.quick_restart_after_ms.map(Duration::from_millis)
    }
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
    pub fn stop_poll(&self) -> Duration {
        Duration::from_millis(self.stop_poll_ms)
    }
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}
