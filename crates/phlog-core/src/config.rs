use phlog_convert::{CalibrationRange, LinearConverter, Shunt, SignalChain};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::device::{ChannelConfig, DeviceTarget};
use crate::error::ConfigError;
use crate::serial_device::SerialSettings;

/// Transmitter transfer function `value = slope * current + offset`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransferFunction {
    /// Units per ampere.
    pub slope: f64,
    pub offset: f64,
}

/// Everything one acquisition run needs, fixed before it starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub device: DeviceTarget,
    pub channel: ChannelConfig,
    /// Sampling period in microseconds.
    pub period_us: u64,
    pub shunt_ohms: f64,
    /// Loop current bounds, in amperes.
    pub current_range: CalibrationRange,
    /// Transmitted quantity bounds (pH).
    pub value_range: CalibrationRange,
    /// When set, replaces the two ranges above.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer: Option<TransferFunction>,
    pub iterations: u64,
    pub output_dir: PathBuf,
    /// Consecutive failed reads tolerated before the run is stopped.
    pub max_consecutive_read_failures: u32,
    pub serial: SerialSettings,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            device: DeviceTarget::default(),
            channel: ChannelConfig::default(),
            period_us: 100_000,
            shunt_ohms: 250.0,
            current_range: CalibrationRange::loop_4_20ma(),
            value_range: CalibrationRange::new(0.0, 14.0),
            transfer: None,
            iterations: 10,
            output_dir: PathBuf::from("__temporary__"),
            max_consecutive_read_failures: 3,
            serial: SerialSettings::default(),
        }
    }
}

impl AcquisitionConfig {
    /// Checks every scalar constraint and derives the signal chain. Touches
    /// no device and no file.
    pub fn validate(&self) -> Result<SignalChain, ConfigError> {
        let name = &self.channel.name;
        if name.trim().is_empty() {
            return Err(ConfigError::EmptyChannel);
        }
        // the name ends up in the output file name
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConfigError::InvalidChannel(name.clone()));
        }
        if self.period_us == 0 {
            return Err(ConfigError::InvalidPeriod);
        }
        let shunt = Shunt::new(self.shunt_ohms)?;
        let converter = match self.transfer {
            Some(t) => LinearConverter::from_slope_offset(t.slope, t.offset)?,
            None => LinearConverter::from_ranges(self.current_range, self.value_range)?,
        };
        Ok(SignalChain::new(shunt, converter))
    }
}
