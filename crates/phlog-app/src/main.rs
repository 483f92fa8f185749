mod settings;

use anyhow::{bail, Context, Result};
use phlog_core::recorder::format_timestamp;
use phlog_core::{
    AcquisitionConfig, AcquisitionEvent, AcquisitionService, AnyGateway, Command,
    CommandChannel, ConnectionType, RunSummary, SerialGateway, StopReason,
};
use std::path::PathBuf;

const USAGE: &str = "usage: phlog [--simulate | --connection=any|serial|sim] [CONFIG.json]
       phlog --list-ports
       phlog --init-config [CONFIG.json]";

enum Mode {
    Acquire {
        config: Option<PathBuf>,
        connection: Option<ConnectionType>,
    },
    ListPorts,
    InitConfig(Option<PathBuf>),
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Mode> {
    let mut connection = None;
    let mut init = false;
    let mut config = None;
    for arg in args {
        match arg.as_str() {
            "--list-ports" => return Ok(Mode::ListPorts),
            "--init-config" => init = true,
            "--simulate" => connection = Some(ConnectionType::Simulated),
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            flag if flag.starts_with("--connection=") => {
                let value = &flag["--connection=".len()..];
                match value.parse::<ConnectionType>() {
                    Ok(kind) => connection = Some(kind),
                    Err(()) => bail!("unknown connection type {value:?}\n{USAGE}"),
                }
            }
            flag if flag.starts_with('-') => bail!("unknown option {flag}\n{USAGE}"),
            path => config = Some(PathBuf::from(path)),
        }
    }
    Ok(if init {
        Mode::InitConfig(config)
    } else {
        Mode::Acquire { config, connection }
    })
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match parse_args(std::env::args().skip(1))? {
        Mode::ListPorts => list_ports(),
        Mode::InitConfig(path) => {
            let path = match path.or_else(settings::default_path) {
                Some(path) => path,
                None => bail!("no configuration directory on this platform; pass a path"),
            };
            settings::write_default(&path)?;
            println!("wrote default configuration to {}", path.display());
            Ok(())
        }
        Mode::Acquire { config, connection } => {
            let mut config = settings::load(config.as_deref())?;
            if let Some(connection) = connection {
                config.device.connection = connection;
            }
            acquire(config)
        }
    }
}

fn list_ports() -> Result<()> {
    let ports = SerialGateway::list_ports();
    if ports.is_empty() {
        println!("no serial ports found");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

fn acquire(config: AcquisitionConfig) -> Result<()> {
    let gateway = AnyGateway {
        serial: SerialGateway::new(config.serial.clone()),
        ..Default::default()
    };
    let channel = config.channel.name.clone();

    let commands = CommandChannel::new();
    let stopper = commands.sender();
    ctrlc::set_handler(move || {
        let _ = stopper.send(Command::Stop);
    })
    .context("failed to install Ctrl-C handler")?;

    let service = AcquisitionService::start(config, &gateway, commands)
        .context("acquisition could not start")?;

    for event in service.events().iter() {
        match event {
            AcquisitionEvent::Started {
                started_at,
                path,
                iterations,
                device,
            } => {
                println!("Start time is: {}", format_timestamp(&started_at));
                println!("Opened a device with {device}");
                println!(
                    "Reading {channel} {iterations} times and saving data to the file:\n - {}\n",
                    path.display()
                );
            }
            AcquisitionEvent::Sample { sample, .. } => {
                println!(
                    "{channel} reading: pH of {:.3} as {:.3} V, duration: {:.1} s, skipped intervals: {}",
                    sample.value,
                    sample.voltage,
                    sample.duration.as_secs_f64(),
                    sample.skipped
                );
            }
            AcquisitionEvent::ReadFailed { iteration, error } => {
                println!("{channel} reading {iteration} failed: {error}");
            }
            AcquisitionEvent::Finished(_) => break,
        }
    }

    let summary = service.join()?;
    println!("\nFinished!");
    report(&summary)
}

fn report(summary: &RunSummary) -> Result<()> {
    log::info!(
        "{} samples, {} failed reads, {} skipped intervals",
        summary.samples,
        summary.read_failures,
        summary.skipped
    );
    match &summary.outcome {
        StopReason::Completed | StopReason::Cancelled => Ok(()),
        StopReason::ReadFailures(n) => bail!("stopped after {n} consecutive failed reads"),
        StopReason::OutputFailed(e) => bail!("stopped writing {}: {e}", summary.path.display()),
        StopReason::SchedulerFailed(e) => bail!("interval timer failed: {e}"),
    }
}
