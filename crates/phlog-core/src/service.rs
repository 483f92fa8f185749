use crossbeam_channel::{unbounded, Receiver, Sender};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use crate::acquisition::{Acquisition, AcquisitionEvent, Command, CommandChannel, RunSummary};
use crate::clock::{LocalWallClock, SystemClock, WallClock};
use crate::config::AcquisitionConfig;
use crate::device::{DeviceGateway, DeviceInfo};
use crate::error::AcquisitionError;
use crate::scheduler::{IntervalTimer, Scheduler};

/// Runs an acquisition on a worker thread. Initialization happens on the
/// caller's thread so start-up failures come back from [`AcquisitionService::start`].
pub struct AcquisitionService {
    tx_cmd: Sender<Command>,
    rx_evt: Receiver<AcquisitionEvent>,
    worker: Option<JoinHandle<Result<RunSummary, AcquisitionError>>>,
    path: PathBuf,
    device: DeviceInfo,
}

impl AcquisitionService {
    pub fn start<G>(
        config: AcquisitionConfig,
        gateway: &G,
        commands: CommandChannel,
    ) -> Result<Self, AcquisitionError>
    where
        G: DeviceGateway,
        G::Handle: Send + 'static,
    {
        Self::start_with(
            config,
            gateway,
            IntervalTimer::new(SystemClock::default()),
            LocalWallClock,
            commands,
        )
    }

    pub fn start_with<G, S, W>(
        config: AcquisitionConfig,
        gateway: &G,
        scheduler: S,
        wall_clock: W,
        commands: CommandChannel,
    ) -> Result<Self, AcquisitionError>
    where
        G: DeviceGateway,
        G::Handle: Send + 'static,
        S: Scheduler + Send + 'static,
        W: WallClock + 'static,
    {
        let tx_cmd = commands.sender();
        let (tx_evt, rx_evt) = unbounded::<AcquisitionEvent>();

        let mut acquisition = Acquisition::new(config, scheduler, wall_clock)
            .with_control(commands.receiver())
            .with_events(tx_evt);
        acquisition.initialize(gateway)?;

        let path = acquisition.path().map(Path::to_path_buf).unwrap_or_default();
        let device = acquisition
            .device_info()
            .cloned()
            .ok_or(AcquisitionError::DeviceOpen(crate::device::DeviceError::Closed))?;

        let worker = std::thread::spawn(move || acquisition.run());

        Ok(Self {
            tx_cmd,
            rx_evt,
            worker: Some(worker),
            path,
            device,
        })
    }

    /// Asks the loop to stop at the next iteration boundary.
    pub fn stop(&self) {
        let _ = self.tx_cmd.send(Command::Stop);
    }

    pub fn events(&self) -> &Receiver<AcquisitionEvent> {
        &self.rx_evt
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    /// Waits for the worker to finish. A panicked worker is re-raised.
    pub fn join(mut self) -> Result<RunSummary, AcquisitionError> {
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic)),
            None => unreachable!("worker is only taken by join"),
        }
    }
}

impl Drop for AcquisitionService {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.stop();
            let _ = worker.join();
        }
    }
}
