//! Device Gateway over a serial DAQ bridge.
//!
//! The bridge speaks an ASCII, newline-terminated protocol built on named
//! registers:
//!
//! | request            | reply                          |
//! |--------------------|--------------------------------|
//! | `*IDN?`            | `<model>,<serial>[,<firmware>]`|
//! | `<NAME> <value>`   | `OK`                           |
//! | `<NAME>?`          | decimal number                 |
//!
//! Any request may instead be answered with `ERR <reason>`.

use serde::{Deserialize, Serialize};
use serialport::SerialPortInfo;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use crate::device::{
    ChannelConfig, ConnectionType, DeviceError, DeviceGateway, DeviceHandle, DeviceInfo,
    DeviceTarget,
};

const MAX_LINE: usize = 256;
const MAX_DISCARD: usize = 4096;

#[derive(Debug, Clone)]
pub struct PortInfo {
    pub port_name: String,
    pub port_type: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (port_type, vid, pid, serial_number, manufacturer, product) = match &info.port_type {
            serialport::SerialPortType::UsbPort(usb) => (
                "USB".to_string(),
                Some(usb.vid),
                Some(usb.pid),
                usb.serial_number.clone(),
                usb.manufacturer.clone(),
                usb.product.clone(),
            ),
            serialport::SerialPortType::PciPort => ("PCI".to_string(), None, None, None, None, None),
            serialport::SerialPortType::BluetoothPort => ("Bluetooth".to_string(), None, None, None, None, None),
            serialport::SerialPortType::Unknown => ("Unknown".to_string(), None, None, None, None, None),
        };
        Self {
            port_name: info.port_name,
            port_type,
            vid,
            pid,
            serial_number,
            manufacturer,
            product,
        }
    }
}

impl std::fmt::Display for PortInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let (Some(vid), Some(pid)) = (self.vid, self.pid) {
            write!(f, "{} ({:04X}:{:04X})", self.port_name, vid, pid)
        } else {
            write!(f, "{} ({})", self.port_name, self.port_type)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            timeout_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SerialGateway {
    pub settings: SerialSettings,
}

impl SerialGateway {
    pub fn new(settings: SerialSettings) -> Self {
        Self { settings }
    }

    pub fn list_ports() -> Vec<PortInfo> {
        serialport::available_ports()
            .unwrap_or_default()
            .into_iter()
            .map(PortInfo::from)
            .collect()
    }

    fn resolve_port(target: &DeviceTarget) -> Result<String, DeviceError> {
        if !target.any_identifier() {
            return Ok(target.identifier.clone());
        }
        Self::list_ports()
            .into_iter()
            .next()
            .map(|p| p.port_name)
            .ok_or_else(|| DeviceError::NotFound(target.to_string()))
    }
}

impl DeviceGateway for SerialGateway {
    type Handle = SerialDevice<Box<dyn serialport::SerialPort>>;

    fn open(&self, target: &DeviceTarget) -> Result<Self::Handle, DeviceError> {
        let port_name = Self::resolve_port(target)?;
        let port = serialport::new(&port_name, self.settings.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(self.settings.timeout_ms))
            .open()
            .map_err(|e| DeviceError::Open {
                target: port_name.clone(),
                reason: e.to_string(),
            })?;
        SerialDevice::identify(port, target, &port_name)
    }
}

/// Open serial DAQ bridge. Generic over the byte stream so the protocol can
/// run against something other than a real port.
pub struct SerialDevice<P: Read + Write> {
    port: Option<P>,
    info: DeviceInfo,
}

impl<P: Read + Write> SerialDevice<P> {
    /// Queries the identity of the device behind `port` and checks it
    /// against the requested model.
    pub fn identify(port: P, target: &DeviceTarget, address: &str) -> Result<Self, DeviceError> {
        let mut dev = Self {
            port: Some(port),
            info: DeviceInfo {
                model: String::new(),
                connection: ConnectionType::Serial,
                serial: String::new(),
                address: address.to_string(),
            },
        };

        let idn = dev.request("*IDN?")?;
        let mut fields = idn.split(',').map(str::trim);
        let model = fields.next().filter(|m| !m.is_empty()).ok_or_else(|| {
            DeviceError::Protocol(format!("malformed identification reply: {idn:?}"))
        })?;
        if !target.accepts_model(model) {
            return Err(DeviceError::Unsupported {
                expected: target.model.clone(),
                found: model.to_string(),
            });
        }
        dev.info.model = model.to_string();
        dev.info.serial = fields.next().unwrap_or_default().to_string();
        log::info!("opened {} on {}", dev.info.model, address);
        Ok(dev)
    }

    fn request(&mut self, line: &str) -> Result<String, DeviceError> {
        let port = self.port.as_mut().ok_or(DeviceError::Closed)?;
        let reply = exchange(port, line);
        match &reply {
            Ok(_) | Err(DeviceError::Rejected(_)) => {}
            Err(_) => {
                // a late answer to this request must not become the next reply
                let dropped = discard_pending(port);
                if dropped > 0 {
                    log::warn!("discarded {dropped} stale bytes after failed {line:?}");
                }
            }
        }
        reply
    }

    fn command(&mut self, register: &str, value: impl std::fmt::Display) -> Result<(), DeviceError> {
        match self.request(&format!("{register} {value}"))?.as_str() {
            "OK" => Ok(()),
            other => Err(DeviceError::Protocol(format!(
                "unexpected reply to {register}: {other:?}"
            ))),
        }
    }
}

fn exchange<P: Read + Write>(port: &mut P, line: &str) -> Result<String, DeviceError> {
    port.write_all(line.as_bytes())?;
    port.write_all(b"\n")?;
    port.flush()?;
    read_reply(port)
}

/// Reads and drops whatever the device sends until it goes quiet.
fn discard_pending<P: Read>(port: &mut P) -> usize {
    let mut buf = [0u8; 64];
    let mut dropped = 0;
    while dropped < MAX_DISCARD {
        match port.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => dropped += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    dropped
}

fn read_reply<P: Read>(port: &mut P) -> Result<String, DeviceError> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match port.read(&mut byte) {
            Ok(0) => return Err(DeviceError::Protocol("connection closed".to_string())),
            Ok(_) if byte[0] == b'\n' => break,
            Ok(_) => line.push(byte[0]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
        if line.len() > MAX_LINE {
            return Err(DeviceError::Protocol("reply too long".to_string()));
        }
    }

    let text = String::from_utf8_lossy(&line).trim().to_string();
    match text.strip_prefix("ERR") {
        Some(reason) => Err(DeviceError::Rejected(reason.trim().to_string())),
        None => Ok(text),
    }
}

impl<P: Read + Write> DeviceHandle for SerialDevice<P> {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn configure_channel(&mut self, channel: &ChannelConfig) -> Result<(), DeviceError> {
        self.command(
            &format!("{}_RESOLUTION_INDEX", channel.name),
            channel.resolution_index,
        )?;
        self.command(&format!("{}_RANGE", channel.name), channel.range_volts)
    }

    fn read_channel(&mut self, channel: &str) -> Result<f64, DeviceError> {
        let read_err = |reason: String| DeviceError::Read {
            channel: channel.to_string(),
            reason,
        };
        let reply = self
            .request(&format!("{channel}?"))
            .map_err(|e| read_err(e.to_string()))?;
        reply
            .parse::<f64>()
            .map_err(|_| read_err(format!("not a number: {reply:?}")))
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        match self.port.take() {
            Some(mut port) => {
                log::info!("closing {} on {}", self.info.model, self.info.address);
                port.flush()?;
                Ok(())
            }
            None => Err(DeviceError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct ScriptedPort {
        replies: Cursor<Vec<u8>>,
        sent: Vec<u8>,
    }

    impl ScriptedPort {
        fn new(replies: &str) -> Self {
            Self {
                replies: Cursor::new(replies.as_bytes().to_vec()),
                sent: Vec::new(),
            }
        }
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.replies.read(buf)
        }
    }

    impl Write for ScriptedPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.sent.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn sent(dev: &SerialDevice<ScriptedPort>) -> String {
        String::from_utf8(dev.port.as_ref().unwrap().sent.clone()).unwrap()
    }

    #[test]
    fn identify_configure_read() {
        let port = ScriptedPort::new("T7,470010101,1.0299\r\nOK\nOK\n1.708\n");
        let mut dev = SerialDevice::identify(port, &DeviceTarget::default(), "/dev/ttyACM0").unwrap();
        assert_eq!(dev.info().model, "T7");
        assert_eq!(dev.info().serial, "470010101");
        assert_eq!(dev.info().address, "/dev/ttyACM0");

        dev.configure_channel(&ChannelConfig::default()).unwrap();
        assert_eq!(dev.read_channel("AIN0").unwrap(), 1.708);
        assert_eq!(
            sent(&dev),
            "*IDN?\nAIN0_RESOLUTION_INDEX 8\nAIN0_RANGE 10\nAIN0?\n"
        );

        dev.close().unwrap();
        assert!(matches!(dev.read_channel("AIN0"), Err(DeviceError::Read { .. })));
        assert!(matches!(dev.close(), Err(DeviceError::Closed)));
    }

    #[test]
    fn wrong_model_is_unsupported() {
        let port = ScriptedPort::new("U3,1234\n");
        let err = SerialDevice::identify(port, &DeviceTarget::default(), "COM3")
            .err()
            .unwrap();
        assert!(matches!(err, DeviceError::Unsupported { .. }));
    }

    #[test]
    fn error_replies_surface() {
        let port = ScriptedPort::new("T7,1\nERR bad register\nERR overrange\ngarbage\n");
        let mut dev = SerialDevice::identify(port, &DeviceTarget::default(), "COM3").unwrap();
        match dev.configure_channel(&ChannelConfig::default()) {
            Err(DeviceError::Rejected(reason)) => assert_eq!(reason, "bad register"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(dev.read_channel("AIN0"), Err(DeviceError::Read { .. })));
        assert!(matches!(dev.read_channel("AIN0"), Err(DeviceError::Read { .. })));
    }

    #[test]
    fn silent_device_fails_to_identify() {
        let err = SerialDevice::identify(ScriptedPort::new(""), &DeviceTarget::default(), "COM3")
            .err()
            .unwrap();
        assert!(matches!(err, DeviceError::Protocol(_)));
    }

    enum Chunk {
        Data(&'static str),
        Timeout,
    }

    /// Releases the scripted answer for each request only once the request
    /// line has been written, like a device on the other end of a wire.
    struct DelayedPort {
        script: std::collections::VecDeque<Vec<Chunk>>,
        readable: std::collections::VecDeque<Chunk>,
    }

    impl DelayedPort {
        fn new(script: Vec<Vec<Chunk>>) -> Self {
            Self {
                script: script.into(),
                readable: Default::default(),
            }
        }
    }

    impl Read for DelayedPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.readable.pop_front() {
                Some(Chunk::Data(text)) => {
                    let n = text.len().min(buf.len());
                    buf[..n].copy_from_slice(&text.as_bytes()[..n]);
                    if n < text.len() {
                        self.readable.push_front(Chunk::Data(&text[n..]));
                    }
                    Ok(n)
                }
                Some(Chunk::Timeout) | None => {
                    Err(std::io::Error::new(ErrorKind::TimedOut, "timed out"))
                }
            }
        }
    }

    impl Write for DelayedPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if buf.ends_with(b"\n") {
                if let Some(answer) = self.script.pop_front() {
                    self.readable.extend(answer);
                }
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn late_reply_is_not_taken_for_the_next_one() {
        let port = DelayedPort::new(vec![
            vec![Chunk::Data("T7,1\n")],
            vec![Chunk::Timeout, Chunk::Data("1.000\n")],
            vec![Chunk::Data("2.000\n")],
            vec![Chunk::Data("3.000\n")],
        ]);
        let mut dev = SerialDevice::identify(port, &DeviceTarget::default(), "COM3").unwrap();

        match dev.read_channel("AIN0") {
            Err(DeviceError::Read { reason, .. }) => assert!(reason.contains("timed out")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(dev.read_channel("AIN0").unwrap(), 2.0);
        assert_eq!(dev.read_channel("AIN0").unwrap(), 3.0);
    }
}
