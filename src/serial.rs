//! Serial port transport for the Arduino DUE running the Firmata I2C master
//! firmware, using the serialport crate

use log::{debug, info, warn};
use std::io::ErrorKind;
use std::time::{Duration, Instant};

use crate::error::ConnectError;
use crate::transport::SysexTransport;

/// Name and version reported by the Firmata firmware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareInfo {
    pub major: u8,
    pub minor: u8,
    pub name: String,
}

pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
    pending: Vec<u8>,
}

impl SerialTransport {
    /// Firmata default line speed
    pub const BAUD_RATE: u32 = 57_600;

    const START_SYSEX: u8 = 0xF0;
    const END_SYSEX: u8 = 0xF7;
    const REPORT_FIRMWARE: u8 = 0x79;
    /// Command byte the I2C master puts on its replies
    const REPLY_COMMAND: u8 = 0xF0;
    /// Time the DUE needs to boot after the DTR-triggered reset
    const RESET_DELAY: Duration = Duration::from_secs(2);

    /// Open `port_name` at the Firmata baud rate.
    ///
    /// With `auto_reset_disabled` DTR is kept low so the board is not rebooted
    /// by the connection, and no boot delay is waited for.
    pub fn open(port_name: &str, auto_reset_disabled: bool) -> Result<Self, ConnectError> {
        Self::open_with_baud(port_name, Self::BAUD_RATE, auto_reset_disabled)
    }

    pub fn open_with_baud(
        port_name: &str,
        baud_rate: u32,
        auto_reset_disabled: bool,
    ) -> Result<Self, ConnectError> {
        let connect_error = |e: serialport::Error| ConnectError {
            port: port_name.to_string(),
            reason: e.to_string(),
        };

        info!("Port: {} / Auto reset disabled: {}", port_name, auto_reset_disabled);
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(100))
            .dtr_on_open(!auto_reset_disabled)
            .open()
            .map_err(connect_error)?;

        if !auto_reset_disabled {
            std::thread::sleep(Self::RESET_DELAY);
        }
        port.clear(serialport::ClearBuffer::Input).map_err(connect_error)?;

        let mut transport = Self {
            port,
            pending: Vec::new(),
        };
        match transport.query_firmware(1000) {
            Ok(Some(fw)) => info!("Firmware {} V{}.{}", fw.name, fw.major, fw.minor),
            Ok(None) => warn!("Board did not report its firmware"),
            Err(e) => warn!("Firmware query failed: {:?}", e),
        }
        Ok(transport)
    }

    /// Names of the serial ports present on this machine
    pub fn available_ports() -> Result<Vec<String>, serialport::Error> {
        Ok(serialport::available_ports()?
            .into_iter()
            .map(|p| p.port_name)
            .collect())
    }

    /// Ask the board for its firmware name and version
    pub fn query_firmware(&mut self, timeout_ms: u32) -> Result<Option<FirmwareInfo>, std::io::Error> {
        self.write_message(Self::REPORT_FIRMWARE, &[])?;
        let Some(data) = self.read_message(Self::REPORT_FIRMWARE, timeout_ms)? else {
            return Ok(None);
        };
        if data.len() < 2 {
            return Ok(None);
        }
        let name = data[2..]
            .chunks_exact(2)
            .map(|pair| (pair[0] | (pair[1] << 7)) as char)
            .collect();
        Ok(Some(FirmwareInfo {
            major: data[0],
            minor: data[1],
            name,
        }))
    }

    fn write_message(&mut self, command: u8, data: &[u8]) -> Result<(), std::io::Error> {
        let mut msg = Vec::with_capacity(data.len() + 3);
        msg.push(Self::START_SYSEX);
        msg.push(command);
        msg.extend_from_slice(data);
        msg.push(Self::END_SYSEX);
        debug!("Writing sysex: {:02X?}", msg);
        std::io::Write::write_all(&mut self.port, &msg)?;
        std::io::Write::flush(&mut self.port)
    }

    /// Pull the next complete sysex message for `command` out of the pending
    /// bytes. Other messages and stray bytes are dropped.
    fn take_message(&mut self, command: u8) -> Option<Vec<u8>> {
        loop {
            let start = self.pending.iter().position(|&b| b == Self::START_SYSEX)?;
            if start > 0 {
                debug!("Dropping {} bytes outside sysex", start);
                self.pending.drain(..start);
            }
            let end = self.pending.iter().position(|&b| b == Self::END_SYSEX)?;
            let msg: Vec<u8> = self.pending.drain(..=end).collect();
            let body = &msg[1..msg.len() - 1];
            match body.split_first() {
                Some((&cmd, data)) if cmd == command => return Some(data.to_vec()),
                Some((&cmd, _)) => debug!("Ignoring sysex 0x{:02X}", cmd),
                None => debug!("Ignoring empty sysex"),
            }
        }
    }

    fn read_message(&mut self, command: u8, timeout_ms: u32) -> Result<Option<Vec<u8>>, std::io::Error> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
        loop {
            if let Some(data) = self.take_message(command) {
                return Ok(Some(data));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.port
                .set_timeout(remaining)
                .map_err(std::io::Error::other)?;
            let mut buf = [0u8; 128];
            match std::io::Read::read(&mut self.port, &mut buf) {
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::TimedOut => {}
                Err(e) => return Err(e),
            }
        }
    }
}

impl SysexTransport for SerialTransport {
    type Error = std::io::Error;

    fn send_sysex(&mut self, command: u8, data: &[u8]) -> Result<(), Self::Error> {
        self.write_message(command, data)
    }

    fn recv_sysex(&mut self, timeout_ms: u32) -> Result<Option<Vec<u8>>, Self::Error> {
        self.read_message(Self::REPLY_COMMAND, timeout_ms)
    }

    fn clear_input(&mut self) -> Result<(), Self::Error> {
        self.pending.clear();
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(std::io::Error::other)
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        self.pending.clear();
        std::io::Write::flush(&mut self.port)
    }
}
