//! Core functionalities: device gateway, interval scheduling, CSV recording
//! and the acquisition loop that ties them together.

pub mod acquisition;
pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod recorder;
pub mod scheduler;
pub mod serial_device;
pub mod service;
pub mod simulated;

pub use acquisition::{
    Acquisition, AcquisitionEvent, Command, CommandChannel, LoopState, RunSummary, StopReason,
};
pub use clock::{Clock, LocalWallClock, ManualClock, SystemClock, WallClock};
pub use config::{AcquisitionConfig, TransferFunction};
pub use device::{
    AnyGateway, ChannelConfig, ConnectionType, DeviceError, DeviceGateway, DeviceHandle,
    DeviceInfo, DeviceTarget,
};
pub use error::{AcquisitionError, ConfigError};
pub use recorder::{Recorder, Sample, HEADER};
pub use scheduler::{IntervalTimer, Scheduler, SchedulerError};
pub use serial_device::{PortInfo, SerialDevice, SerialGateway, SerialSettings};
pub use service::AcquisitionService;
pub use simulated::{SimStats, SimulatedDevice, SimulatedGateway, Waveform};

pub use phlog_convert::{CalibrationError, CalibrationRange, LinearConverter, SignalChain};
