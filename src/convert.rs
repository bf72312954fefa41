//! Contractual rate conversion to bits per second.

use serde::{Deserialize, Serialize};

/// Unit a contractual rate is recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedUnit {
    Mbps,
    Kbps,
}

/// A contractual rate together with its bps conversions.
///
/// Both conversions are computed up front; [`CircuitSpeed::bps`] picks the one
/// matching the source unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSpeed {
    pub unit: SpeedUnit,
    pub from_mbps: u64,
    pub from_kbps: u64,
}

impl CircuitSpeed {
    pub fn new(value: u64, unit: SpeedUnit) -> Self {
        Self {
            unit,
            from_mbps: value.saturating_mul(1_000_000),
            from_kbps: value.saturating_mul(1_000),
        }
    }

    pub fn bps(&self) -> u64 {
        match self.unit {
            SpeedUnit::Mbps => self.from_mbps,
            SpeedUnit::Kbps => self.from_kbps,
        }
    }
}
