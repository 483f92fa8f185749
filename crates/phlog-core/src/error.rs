use std::path::PathBuf;

use crate::acquisition::LoopState;
use crate::device::DeviceError;
use crate::scheduler::SchedulerError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Calibration(#[from] phlog_convert::CalibrationError),
    #[error("acquisition period must be a positive number of microseconds")]
    InvalidPeriod,
    #[error("channel name is empty")]
    EmptyChannel,
    #[error("channel name {0:?} may only contain letters, digits, '_' and '-'")]
    InvalidChannel(String),
}

/// Failures that keep a run from starting.
#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("could not open device: {0}")]
    DeviceOpen(#[source] DeviceError),
    #[error("could not configure {channel}: {source}")]
    DeviceConfigure {
        channel: String,
        #[source]
        source: DeviceError,
    },
    #[error("could not create {}: {source}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not start interval timer: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("acquisition is {found:?}, expected {expected:?}")]
    InvalidState { expected: LoopState, found: LoopState },
}
