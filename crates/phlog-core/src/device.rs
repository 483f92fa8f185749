//! Device Gateway: the narrow interface the acquisition loop uses to reach
//! the DAQ hardware (open, configure one channel, read it, close).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Wildcard accepted for the device model and identifier.
pub const ANY: &str = "ANY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    #[default]
    Any,
    Serial,
    Simulated,
}

impl std::str::FromStr for ConnectionType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "ANY" => Self::Any,
            "SERIAL" | "USB" => Self::Serial,
            "SIM" | "SIMULATED" => Self::Simulated,
            _ => return Err(()),
        })
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Any => "ANY",
            Self::Serial => "SERIAL",
            Self::Simulated => "SIMULATED",
        })
    }
}

/// Which device to open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceTarget {
    pub model: String,
    pub connection: ConnectionType,
    /// Port name, serial number or [`ANY`].
    pub identifier: String,
}

impl Default for DeviceTarget {
    fn default() -> Self {
        Self {
            model: "T7".to_string(),
            connection: ConnectionType::Any,
            identifier: ANY.to_string(),
        }
    }
}

impl DeviceTarget {
    pub fn accepts_model(&self, reported: &str) -> bool {
        self.model.eq_ignore_ascii_case(ANY) || self.model.eq_ignore_ascii_case(reported)
    }

    pub fn any_identifier(&self) -> bool {
        self.identifier.is_empty() || self.identifier.eq_ignore_ascii_case(ANY)
    }
}

impl fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {} ({})", self.model, self.connection, self.identifier)
    }
}

/// Analog input channel settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub name: String,
    /// Device specific; higher is slower and quieter.
    pub resolution_index: u8,
    /// Full-scale input range in volts (±).
    pub range_volts: f64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: "AIN0".to_string(),
            resolution_index: 8,
            range_volts: 10.0,
        }
    }
}

/// What the device reported about itself on open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub model: String,
    pub connection: ConnectionType,
    pub serial: String,
    pub address: String,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "device type: {}, connection type: {}, serial number: {}, address: {}",
            self.model, self.connection, self.serial, self.address
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("no device found for {0}")]
    NotFound(String),
    #[error("failed to open {target}: {reason}")]
    Open { target: String, reason: String },
    #[error("unsupported device: expected model {expected}, found {found}")]
    Unsupported { expected: String, found: String },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("device rejected request: {0}")]
    Rejected(String),
    #[error("failed to read {channel}: {reason}")]
    Read { channel: String, reason: String },
    #[error("device handle is closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Opens device handles.
pub trait DeviceGateway {
    type Handle: DeviceHandle;

    fn open(&self, target: &DeviceTarget) -> Result<Self::Handle, DeviceError>;
}

/// An open, exclusively owned device connection.
pub trait DeviceHandle {
    fn info(&self) -> &DeviceInfo;

    fn configure_channel(&mut self, channel: &ChannelConfig) -> Result<(), DeviceError>;

    /// Single blocking voltage read.
    fn read_channel(&mut self, channel: &str) -> Result<f64, DeviceError>;

    /// Releases the connection. Further calls return [`DeviceError::Closed`]
    /// or are no-ops, depending on the adapter.
    fn close(&mut self) -> Result<(), DeviceError>;
}

impl<H: DeviceHandle + ?Sized> DeviceHandle for Box<H> {
    fn info(&self) -> &DeviceInfo {
        (**self).info()
    }

    fn configure_channel(&mut self, channel: &ChannelConfig) -> Result<(), DeviceError> {
        (**self).configure_channel(channel)
    }

    fn read_channel(&mut self, channel: &str) -> Result<f64, DeviceError> {
        (**self).read_channel(channel)
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        (**self).close()
    }
}

/// Dispatches on [`DeviceTarget::connection`].
#[derive(Debug, Clone, Default)]
pub struct AnyGateway {
    pub serial: crate::serial_device::SerialGateway,
    pub simulated: crate::simulated::SimulatedGateway,
}

impl DeviceGateway for AnyGateway {
    type Handle = Box<dyn DeviceHandle + Send>;

    fn open(&self, target: &DeviceTarget) -> Result<Self::Handle, DeviceError> {
        let handle: Self::Handle = match target.connection {
            ConnectionType::Any | ConnectionType::Serial => Box::new(self.serial.open(target)?),
            ConnectionType::Simulated => Box::new(self.simulated.open(target)?),
        };
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_type_from_str() {
        assert_eq!("any".parse(), Ok(ConnectionType::Any));
        assert_eq!("USB".parse(), Ok(ConnectionType::Serial));
        assert_eq!("sim".parse(), Ok(ConnectionType::Simulated));
        assert_eq!("ethernet".parse::<ConnectionType>(), Err(()));
    }

    #[test]
    fn model_wildcard() {
        let mut target = DeviceTarget::default();
        assert!(target.accepts_model("t7"));
        assert!(!target.accepts_model("U3"));
        target.model = ANY.to_string();
        assert!(target.accepts_model("U3"));
        assert!(target.any_identifier());
    }
}
