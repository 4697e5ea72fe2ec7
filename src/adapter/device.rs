//! Discovered devices and the table the scan task keeps them in.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Local};

use crate::error::{BridgeError, Result};

/// BLE address type as encoded by the module: `0` static, `1` random.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressType {
    Static,
    Random,
}

impl AddressType {
    /// Wire encoding.
    pub fn code(self) -> u8 {
        match self {
            AddressType::Static => 0,
            AddressType::Random => 1,
        }
    }
}

impl TryFrom<u8> for AddressType {
    type Error = BridgeError;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(AddressType::Static),
            1 => Ok(AddressType::Random),
            other => Err(BridgeError::invalid_response(format!(
                "unknown address type {other}"
            ))),
        }
    }
}

impl FromStr for AddressType {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        let code: u8 = s
            .parse()
            .map_err(|_| BridgeError::invalid_response(format!("bad address type '{s}'")))?;
        AddressType::try_from(code)
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressType::Static => write!(f, "static"),
            AddressType::Random => write!(f, "random"),
        }
    }
}

/// One parsed discovery line: `<address> <type> <rssi> [<name>]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Advertisement {
    pub address: String,
    pub address_type: AddressType,
    pub rssi: i16,
    /// Everything after the third field, spaces included.
    pub name: Option<String>,
}

impl FromStr for Advertisement {
    type Err = BridgeError;

    fn from_str(line: &str) -> Result<Self> {
        let mut fields = line.splitn(4, ' ');
        let (Some(address), Some(address_type), Some(rssi)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(BridgeError::invalid_response(format!(
                "short discovery line '{line}'"
            )));
        };
        if address.is_empty() {
            return Err(BridgeError::invalid_response("empty device address"));
        }
        let rssi = rssi
            .parse()
            .map_err(|_| BridgeError::invalid_response(format!("bad signal strength '{rssi}'")))?;
        Ok(Advertisement {
            address: address.to_string(),
            address_type: address_type.parse()?,
            rssi,
            name: fields.next().filter(|n| !n.is_empty()).map(str::to_string),
        })
    }
}

/// A device seen during scanning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Address as first reported; never changes afterwards.
    pub address: String,
    pub address_type: AddressType,
    /// Signal strength in dBm.
    pub rssi: i16,
    /// Advertised name; some advertisements omit it.
    pub name: Option<String>,
    pub last_seen: DateTime<Local>,
}

impl DiscoveredDevice {
    fn from_advertisement(advertisement: Advertisement) -> Self {
        DiscoveredDevice {
            address: advertisement.address,
            address_type: advertisement.address_type,
            rssi: advertisement.rssi,
            name: advertisement.name,
            last_seen: Local::now(),
        }
    }

    fn update(&mut self, advertisement: Advertisement) {
        self.address_type = advertisement.address_type;
        self.rssi = advertisement.rssi;
        if advertisement.name.is_some() {
            self.name = advertisement.name;
        }
        self.last_seen = Local::now();
    }
}

impl fmt::Display for DiscoveredDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) {} dBm {}",
            self.address,
            self.address_type,
            self.rssi,
            self.name.as_deref().unwrap_or("<unnamed>")
        )
    }
}

/// Receives a snapshot whenever a device is first seen or updated.
#[cfg_attr(test, mockall::automock)]
pub trait DeviceObserver: Send + Sync {
    fn on_device(&self, device: &DiscoveredDevice);
}

impl<F> DeviceObserver for F
where
    F: Fn(&DiscoveredDevice) + Send + Sync,
{
    fn on_device(&self, device: &DiscoveredDevice) {
        self(device)
    }
}

/// Devices keyed by case-insensitive address. Written by the scan task,
/// read from anywhere; clones share the same table.
#[derive(Clone, Debug, Default)]
pub struct DeviceTable {
    devices: Arc<RwLock<HashMap<String, DiscoveredDevice>>>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(address: &str) -> String {
        address.to_ascii_uppercase()
    }

    /// Creates or updates the device and returns its new state.
    pub fn upsert(&self, advertisement: Advertisement) -> DiscoveredDevice {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        let key = Self::key(&advertisement.address);
        match devices.get_mut(&key) {
            Some(device) => {
                device.update(advertisement);
                device.clone()
            }
            None => {
                let device = DiscoveredDevice::from_advertisement(advertisement);
                devices.insert(key, device.clone());
                device
            }
        }
    }

    pub fn get(&self, address: &str) -> Option<DiscoveredDevice> {
        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        devices.get(&Self::key(address)).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<DiscoveredDevice> {
        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        devices
            .values()
            .find(|device| device.name.as_deref() == Some(name))
            .cloned()
    }

    /// All devices, sorted by address.
    pub fn snapshot(&self) -> Vec<DiscoveredDevice> {
        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        let mut list: Vec<DiscoveredDevice> = devices.values().cloned().collect();
        list.sort_by(|a, b| a.address.cmp(&b.address));
        list
    }

    /// Devices whose last advertisement is older than `max_age`.
    pub fn stale(&self, max_age: chrono::Duration) -> Vec<DiscoveredDevice> {
        let cutoff = Local::now() - max_age;
        self.snapshot()
            .into_iter()
            .filter(|device| device.last_seen < cutoff)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every device.
    pub fn clear(&self) {
        self.devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
