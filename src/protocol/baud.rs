//! Baud-rate table of the bridge module.
//!
//! The module addresses rates by index (`AT+UART=<index>`), never by value.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Protocol index to physical rate.
pub const BAUD_RATE_TABLE: [(u8, u32); 7] = [
    (0, 9600),
    (1, 14400),
    (2, 19200),
    (3, 38400),
    (4, 57600),
    (5, 115200),
    (6, 230400),
];

/// Indices in the order detection tries them, most likely first.
/// 38400 is the factory default, 115200 the most common reconfiguration.
pub const DETECTION_ORDER: [u8; 7] = [3, 5, 0, 6, 2, 4, 1];

/// Wire-protocol baud-rate index, always a valid table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct BaudRateIndex(u8);

impl BaudRateIndex {
    pub fn new(index: u8) -> Option<Self> {
        BAUD_RATE_TABLE
            .iter()
            .any(|&(i, _)| i == index)
            .then_some(BaudRateIndex(index))
    }

    pub fn from_rate(rate: u32) -> Option<Self> {
        BAUD_RATE_TABLE
            .iter()
            .find(|&&(_, r)| r == rate)
            .map(|&(i, _)| BaudRateIndex(i))
    }

    pub fn index(self) -> u8 {
        self.0
    }

    pub fn rate(self) -> u32 {
        BAUD_RATE_TABLE
            .iter()
            .find(|&&(i, _)| i == self.0)
            .map(|&(_, rate)| rate)
            .unwrap_or_default()
    }

    /// Candidates in detection priority order.
    pub fn detection_order() -> impl Iterator<Item = BaudRateIndex> {
        DETECTION_ORDER.into_iter().map(BaudRateIndex)
    }

    /// All supported physical rates, ascending.
    pub fn supported_rates() -> impl Iterator<Item = u32> {
        BAUD_RATE_TABLE.into_iter().map(|(_, rate)| rate)
    }
}

impl TryFrom<u8> for BaudRateIndex {
    type Error = String;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        BaudRateIndex::new(index).ok_or_else(|| format!("unknown baud-rate index {index}"))
    }
}

impl From<BaudRateIndex> for u8 {
    fn from(index: BaudRateIndex) -> Self {
        index.0
    }
}

impl fmt::Display for BaudRateIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} baud (index {})", self.rate(), self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_order_rates() {
        let rates: Vec<u32> = BaudRateIndex::detection_order()
            .map(BaudRateIndex::rate)
            .collect();
        assert_eq!(rates, [38400, 115200, 9600, 230400, 19200, 57600, 14400]);
    }

    #[test]
    fn test_lookup_both_ways() {
        let index = BaudRateIndex::from_rate(57600).unwrap();
        assert_eq!(index.index(), 4);
        assert_eq!(BaudRateIndex::new(4), Some(index));
        assert_eq!(BaudRateIndex::from_rate(4800), None);
        assert_eq!(BaudRateIndex::new(7), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(BaudRateIndex::new(5).unwrap().to_string(), "115200 baud (index 5)");
    }
}
