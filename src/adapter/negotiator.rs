//! Baud-rate auto-detection.

use log::{debug, info, warn};
use tokio::time::Duration;

use super::executor::CommandExecutor;
use crate::error::{BridgeError, Result};
use crate::protocol::{BaudRateIndex, FIELD_VERSION};
use crate::serial::Transport;

/// Finds the rate the module currently talks at by probing each known rate,
/// most likely first, with a version query.
pub struct BaudRateNegotiator<'a, T> {
    executor: &'a CommandExecutor<T>,
    probe_timeout: Duration,
}

impl<'a, T: Transport> BaudRateNegotiator<'a, T> {
    pub fn new(executor: &'a CommandExecutor<T>) -> Self {
        BaudRateNegotiator {
            executor,
            probe_timeout: executor.timing().probe_timeout(),
        }
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    /// Returns the first rate that answers. Only timeouts move on to the
    /// next candidate; any other failure ends detection.
    ///
    /// [`BridgeError::NotDetected`] means the device does not speak this
    /// protocol and the session should not be used further.
    pub async fn detect(&self) -> Result<BaudRateIndex> {
        for candidate in BaudRateIndex::detection_order() {
            self.executor.switch_baud_rate(candidate).await?;
            match self.executor.query(FIELD_VERSION, self.probe_timeout).await {
                Ok(version) => {
                    info!("Bridge module firmware {version} answering at {candidate}");
                    return Ok(candidate);
                }
                Err(e) if e.is_timeout() => debug!("no answer at {candidate}"),
                Err(e) => return Err(e),
            }
        }
        warn!("No baud rate answered the version probe");
        self.executor.session().set_baud_index(None);
        Err(BridgeError::NotDetected)
    }
}
