//! In-process stand-in for a DAQ device.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::device::{
    ChannelConfig, ConnectionType, DeviceError, DeviceGateway, DeviceHandle, DeviceInfo,
    DeviceTarget, ANY,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Waveform {
    Constant(f64),
    Sine {
        center: f64,
        amplitude: f64,
        period_samples: u32,
    },
    /// Cycles through the given voltages.
    Sequence(Vec<f64>),
}

impl Waveform {
    pub fn sample(&self, index: u64) -> f64 {
        match self {
            Self::Constant(v) => *v,
            Self::Sine {
                center,
                amplitude,
                period_samples,
            } => {
                let n = (*period_samples).max(1) as f64;
                let phase = 2.0 * std::f64::consts::PI * (index as f64 % n) / n;
                center + amplitude * phase.sin()
            }
            Self::Sequence(values) if values.is_empty() => 0.0,
            Self::Sequence(values) => values[(index % values.len() as u64) as usize],
        }
    }
}

/// Counters shared between a gateway and the devices it opened.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimStats {
    pub opened: u32,
    pub closed: u32,
    pub reads: u64,
    pub configured: Option<ChannelConfig>,
}

#[derive(Debug, Clone)]
pub struct SimulatedGateway {
    waveform: Waveform,
    failing_reads: BTreeSet<u64>,
    refuse_open: bool,
    stats: Arc<Mutex<SimStats>>,
}

impl Default for SimulatedGateway {
    /// Slow sine around mid-scale of a 4-20 mA loop on a 250 Ω shunt.
    fn default() -> Self {
        Self::new(Waveform::Sine {
            center: 3.0,
            amplitude: 0.5,
            period_samples: 50,
        })
    }
}

impl SimulatedGateway {
    pub fn new(waveform: Waveform) -> Self {
        Self {
            waveform,
            failing_reads: BTreeSet::new(),
            refuse_open: false,
            stats: Arc::default(),
        }
    }

    /// Makes the reads with these zero-based indices fail.
    pub fn failing_reads(mut self, reads: impl IntoIterator<Item = u64>) -> Self {
        self.failing_reads.extend(reads);
        self
    }

    pub fn refuse_open(mut self) -> Self {
        self.refuse_open = true;
        self
    }

    pub fn stats(&self) -> SimStats {
        self.stats.lock().clone()
    }
}

impl DeviceGateway for SimulatedGateway {
    type Handle = SimulatedDevice;

    fn open(&self, target: &DeviceTarget) -> Result<Self::Handle, DeviceError> {
        if self.refuse_open {
            return Err(DeviceError::Open {
                target: target.to_string(),
                reason: "simulated device refused connection".to_string(),
            });
        }
        self.stats.lock().opened += 1;

        let model = if target.model.eq_ignore_ascii_case(ANY) {
            "SIM".to_string()
        } else {
            target.model.clone()
        };
        log::info!("opened simulated {model}");
        Ok(SimulatedDevice {
            waveform: self.waveform.clone(),
            failing_reads: self.failing_reads.clone(),
            stats: self.stats.clone(),
            info: DeviceInfo {
                model,
                connection: ConnectionType::Simulated,
                serial: "0".to_string(),
                address: target.identifier.clone(),
            },
            reads: 0,
            open: true,
        })
    }
}

pub struct SimulatedDevice {
    waveform: Waveform,
    failing_reads: BTreeSet<u64>,
    stats: Arc<Mutex<SimStats>>,
    info: DeviceInfo,
    reads: u64,
    open: bool,
}

impl DeviceHandle for SimulatedDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn configure_channel(&mut self, channel: &ChannelConfig) -> Result<(), DeviceError> {
        if !self.open {
            return Err(DeviceError::Closed);
        }
        self.stats.lock().configured = Some(channel.clone());
        Ok(())
    }

    fn read_channel(&mut self, channel: &str) -> Result<f64, DeviceError> {
        if !self.open {
            return Err(DeviceError::Closed);
        }
        let index = self.reads;
        self.reads += 1;
        self.stats.lock().reads += 1;

        if self.failing_reads.contains(&index) {
            return Err(DeviceError::Read {
                channel: channel.to_string(),
                reason: format!("simulated failure on read {index}"),
            });
        }
        Ok(self.waveform.sample(index))
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        if !self.open {
            return Err(DeviceError::Closed);
        }
        self.open = false;
        self.stats.lock().closed += 1;
        Ok(())
    }
}
