//! Acquisition Loop: `Idle → Initializing → Running → Stopping → Closed`.

use chrono::NaiveDateTime;
use crossbeam_channel::{Receiver, Sender};
use phlog_convert::SignalChain;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::clock::WallClock;
use crate::config::AcquisitionConfig;
use crate::device::{DeviceGateway, DeviceHandle, DeviceInfo};
use crate::error::AcquisitionError;
use crate::recorder::{self, Recorder, Sample};
use crate::scheduler::Scheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Initializing,
    Running,
    Stopping,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Stop,
}

/// Both ends of the queue a loop takes commands from. Creating it before the
/// loop lets a stop be queued while the loop is still initializing.
#[derive(Debug, Clone)]
pub struct CommandChannel {
    tx: Sender<Command>,
    rx: Receiver<Command>,
}

impl Default for CommandChannel {
    fn default() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }
}

impl CommandChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender(&self) -> Sender<Command> {
        self.tx.clone()
    }

    pub fn receiver(&self) -> Receiver<Command> {
        self.rx.clone()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    Completed,
    Cancelled,
    /// Consecutive failed reads that exceeded the tolerance.
    ReadFailures(u32),
    OutputFailed(String),
    SchedulerFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub outcome: StopReason,
    pub samples: u64,
    pub read_failures: u64,
    pub skipped: u64,
    pub cleanup_failures: u32,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub enum AcquisitionEvent {
    Started {
        started_at: NaiveDateTime,
        path: PathBuf,
        iterations: u64,
        device: DeviceInfo,
    },
    Sample {
        iteration: u64,
        sample: Sample,
    },
    ReadFailed {
        iteration: u64,
        error: String,
    },
    Finished(RunSummary),
}

#[derive(Debug, Default)]
struct Counters {
    samples: u64,
    read_failures: u64,
    skipped: u64,
}

/// One acquisition run. Owns the device handle, the output file and the
/// interval timer from initialization until it is closed; not restartable.
pub struct Acquisition<D: DeviceHandle, S: Scheduler, W: WallClock> {
    config: AcquisitionConfig,
    scheduler: S,
    wall_clock: W,
    state: LoopState,
    chain: Option<SignalChain>,
    device: Option<D>,
    recorder: Option<Recorder<File>>,
    path: Option<PathBuf>,
    scheduler_running: bool,
    control: Option<Receiver<Command>>,
    events: Option<Sender<AcquisitionEvent>>,
}

impl<D: DeviceHandle, S: Scheduler, W: WallClock> Acquisition<D, S, W> {
    pub fn new(config: AcquisitionConfig, scheduler: S, wall_clock: W) -> Self {
        Self {
            config,
            scheduler,
            wall_clock,
            state: LoopState::Idle,
            chain: None,
            device: None,
            recorder: None,
            path: None,
            scheduler_running: false,
            control: None,
            events: None,
        }
    }

    /// Commands are polled once per iteration, before waiting for the next tick.
    pub fn with_control(mut self, control: Receiver<Command>) -> Self {
        self.control = Some(control);
        self
    }

    pub fn with_events(mut self, events: Sender<AcquisitionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.device.as_ref().map(|d| d.info())
    }

    fn expect_state(&self, expected: LoopState) -> Result<(), AcquisitionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(AcquisitionError::InvalidState {
                expected,
                found: self.state,
            })
        }
    }

    fn emit(&self, event: AcquisitionEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Validates the configuration, then opens the device, configures the
    /// channel, creates the output file and starts the interval timer.
    /// On failure everything acquired so far is released and the loop is
    /// closed.
    pub fn initialize<G>(&mut self, gateway: &G) -> Result<(), AcquisitionError>
    where
        G: DeviceGateway<Handle = D>,
    {
        self.expect_state(LoopState::Idle)?;
        self.state = LoopState::Initializing;

        match self.acquire(gateway) {
            Ok(()) => {
                self.state = LoopState::Running;
                Ok(())
            }
            Err(e) => {
                self.state = LoopState::Stopping;
                self.release();
                self.state = LoopState::Closed;
                Err(e)
            }
        }
    }

    fn acquire<G>(&mut self, gateway: &G) -> Result<(), AcquisitionError>
    where
        G: DeviceGateway<Handle = D>,
    {
        let chain = self.config.validate()?;
        log::debug!(
            "conversion: slope {} per A, offset {}, shunt {} Ω",
            chain.converter.slope(),
            chain.converter.offset(),
            chain.shunt.ohms()
        );
        self.chain = Some(chain);

        let mut device = gateway
            .open(&self.config.device)
            .map_err(AcquisitionError::DeviceOpen)?;
        log::info!("device initialized: {}", device.info());
        let configured = device.configure_channel(&self.config.channel);
        let info = device.info().clone();
        self.device = Some(device);
        configured.map_err(|source| AcquisitionError::DeviceConfigure {
            channel: self.config.channel.name.clone(),
            source,
        })?;

        let started_at = self.wall_clock.now();
        let dir = &self.config.output_dir;
        std::fs::create_dir_all(dir).map_err(|source| AcquisitionError::Output {
            path: dir.clone(),
            source,
        })?;
        let path = recorder::output_path(dir, &started_at, &self.config.channel.name);
        let output_err = |source: std::io::Error| AcquisitionError::Output {
            path: path.clone(),
            source,
        };
        let mut rec = Recorder::create(&path).map_err(output_err)?;
        rec.write_header().map_err(output_err)?;
        self.recorder = Some(rec);
        self.path = Some(path.clone());

        self.scheduler.start(self.config.period_us)?;
        self.scheduler_running = true;

        log::info!(
            "reading {} {} times into {}",
            self.config.channel.name,
            self.config.iterations,
            path.display()
        );
        self.emit(AcquisitionEvent::Started {
            started_at,
            path,
            iterations: self.config.iterations,
            device: info,
        });
        Ok(())
    }

    /// Runs the sampling loop to completion, cancellation or an unrecoverable
    /// failure, then closes every resource.
    pub fn run(&mut self) -> Result<RunSummary, AcquisitionError> {
        self.expect_state(LoopState::Running)?;
        let chain = match self.chain {
            Some(chain) => chain,
            None => {
                return Err(AcquisitionError::InvalidState {
                    expected: LoopState::Running,
                    found: LoopState::Idle,
                })
            }
        };

        let mut counters = Counters::default();
        let outcome = self.sample_loop(&chain, &mut counters);
        log::info!("stopping acquisition: {outcome:?}");

        self.state = LoopState::Stopping;
        let cleanup_failures = self.release();
        self.state = LoopState::Closed;

        let summary = RunSummary {
            outcome,
            samples: counters.samples,
            read_failures: counters.read_failures,
            skipped: counters.skipped,
            cleanup_failures,
            path: self.path.clone().unwrap_or_default(),
        };
        self.emit(AcquisitionEvent::Finished(summary.clone()));
        Ok(summary)
    }

    fn stop_requested(&self) -> bool {
        self.control
            .as_ref()
            .map_or(false, |rx| rx.try_iter().any(|cmd| cmd == Command::Stop))
    }

    fn sample_loop(&mut self, chain: &SignalChain, counters: &mut Counters) -> StopReason {
        let tolerance = self.config.max_consecutive_read_failures;
        let mut consecutive_failures = 0u32;
        let mut previous = self.scheduler.now();

        for iteration in 0..self.config.iterations {
            if self.stop_requested() {
                return StopReason::Cancelled;
            }

            let skipped = match self.scheduler.wait_next() {
                Ok(skipped) => skipped,
                Err(e) => return StopReason::SchedulerFailed(e.to_string()),
            };
            let tick = self.scheduler.now();
            let duration = tick.saturating_sub(previous);
            previous = tick;
            let timestamp = self.wall_clock.now();

            let read = match self.device.as_mut() {
                Some(device) => device.read_channel(&self.config.channel.name),
                None => Err(crate::device::DeviceError::Closed),
            };
            let (voltage, fallback) = match read {
                Ok(voltage) => {
                    consecutive_failures = 0;
                    (voltage, false)
                }
                Err(e) => {
                    counters.read_failures += 1;
                    consecutive_failures += 1;
                    log::warn!("read {iteration} failed: {e}");
                    self.emit(AcquisitionEvent::ReadFailed {
                        iteration,
                        error: e.to_string(),
                    });
                    if consecutive_failures > tolerance {
                        return StopReason::ReadFailures(consecutive_failures);
                    }
                    (0.0, true)
                }
            };

            let reading = chain.evaluate(voltage);
            if !fallback && !chain.converter.in_calibration(reading.current) {
                log::debug!(
                    "{:.3} mA is outside the calibrated current range",
                    reading.current * 1e3
                );
            }
            let sample = Sample {
                timestamp,
                duration,
                skipped,
                voltage: reading.voltage,
                current: reading.current,
                value: reading.value,
                fallback,
            };

            let written = match self.recorder.as_mut() {
                Some(rec) => rec.write_row(&sample),
                None => Err(std::io::ErrorKind::NotConnected.into()),
            };
            if let Err(e) = written {
                return StopReason::OutputFailed(e.to_string());
            }

            counters.samples += 1;
            counters.skipped += skipped;
            log::debug!("{}", recorder::format_row(&sample));
            self.emit(AcquisitionEvent::Sample { iteration, sample });
        }
        StopReason::Completed
    }

    /// Closes the output file, stops the timer and releases the device. Every
    /// step runs even if an earlier one fails; failures are logged and counted.
    fn release(&mut self) -> u32 {
        let mut failures = 0;

        if let Some(rec) = self.recorder.take() {
            if let Err(e) = rec.into_inner().and_then(|file| file.sync_all()) {
                log::warn!("failed to close output file: {e}");
                failures += 1;
            }
        }

        if self.scheduler_running {
            self.scheduler_running = false;
            if let Err(e) = self.scheduler.stop() {
                log::warn!("failed to stop interval timer: {e}");
                failures += 1;
            }
        }

        if let Some(mut device) = self.device.take() {
            match device.close() {
                Ok(()) => log::info!("device released"),
                Err(e) => {
                    log::warn!("failed to release device: {e}");
                    failures += 1;
                }
            }
        }

        failures
    }
}

impl<D: DeviceHandle, S: Scheduler, W: WallClock> Drop for Acquisition<D, S, W> {
    fn drop(&mut self) {
        if self.state != LoopState::Closed {
            self.release();
        }
    }
}
