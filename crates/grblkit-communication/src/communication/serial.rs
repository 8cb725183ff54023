//! Serial port endpoint
//!
//! Direct hardware connection to a grbl controller via USB or RS-232,
//! built on the `serialport` crate. Reads run with a short timeout so
//! the reader thread can observe the shutdown flag; writes go through a
//! mutex shared by all writer threads.

use crate::communication::{ConnectionParams, Endpoint, SENTINEL_LINE};
use grblkit_core::{Error, Result, StreamError, TransportError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct SerialPortInfo {
    /// Port name (e.g. `/dev/ttyUSB0`, `COM3`)
    pub port_name: String,
    /// User-friendly description
    pub description: String,
    /// Manufacturer name if available
    pub manufacturer: Option<String>,
    /// Serial number if available
    pub serial_number: Option<String>,
    /// USB vendor ID if applicable
    pub vid: Option<u16>,
    /// USB product ID if applicable
    pub pid: Option<u16>,
}

/// List serial ports that look like CNC controllers.
///
/// - Windows: `COM*`
/// - Linux: `/dev/ttyUSB*`, `/dev/ttyACM*`
/// - macOS: `/dev/cu.usbserial-*`, `/dev/cu.usbmodem*`
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        TransportError::Enumeration {
            reason: e.to_string(),
        }
    })?;

    Ok(ports
        .iter()
        .filter(|port| is_cnc_port(&port.port_name))
        .map(|port| {
            let mut info = SerialPortInfo {
                port_name: port.port_name.clone(),
                description: port_description(port),
                manufacturer: None,
                serial_number: None,
                vid: None,
                pid: None,
            };
            if let serialport::SerialPortType::UsbPort(usb) = &port.port_type {
                info.vid = Some(usb.vid);
                info.pid = Some(usb.pid);
                info.manufacturer = usb.manufacturer.clone();
                info.serial_number = usb.serial_number.clone();
            }
            info
        })
        .collect())
}

fn is_cnc_port(port_name: &str) -> bool {
    if port_name.starts_with("COM") && port_name[3..].chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    if port_name.starts_with("/dev/ttyUSB") || port_name.starts_with("/dev/ttyACM") {
        return true;
    }
    port_name.starts_with("/dev/cu.usbserial-") || port_name.starts_with("/dev/cu.usbmodem")
}

fn port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb) => format!(
            "USB {} {}",
            usb.manufacturer.as_deref().unwrap_or("Device"),
            usb.product.as_deref().unwrap_or("Serial Port")
        ),
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

struct ReadHalf {
    port: Option<Box<dyn serialport::SerialPort>>,
    carry: String,
    lines: VecDeque<String>,
}

/// Real serial endpoint.
///
/// grbl always talks 8N1 without hardware flow control, so only port
/// and baud rate are configurable.
pub struct SerialEndpoint {
    params: ConnectionParams,
    reader: Mutex<ReadHalf>,
    writer: Mutex<Option<Box<dyn serialport::SerialPort>>>,
    closing: AtomicBool,
}

impl SerialEndpoint {
    /// Create an endpoint; the port is opened by [`Endpoint::open`]
    pub fn new(params: ConnectionParams) -> Self {
        Self {
            params,
            reader: Mutex::new(ReadHalf {
                port: None,
                carry: String::new(),
                lines: VecDeque::new(),
            }),
            writer: Mutex::new(None),
            closing: AtomicBool::new(false),
        }
    }
}

impl Endpoint for SerialEndpoint {
    fn open(&self) -> Result<()> {
        let port = serialport::new(&self.params.port, self.params.baud_rate)
            .timeout(Duration::from_millis(self.params.timeout_ms))
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| {
                tracing::warn!("Failed to open serial port {}: {}", self.params.port, e);
                TransportError::FailedToOpen {
                    port: self.params.port.clone(),
                    reason: e.to_string(),
                }
            })?;

        let read_port = port.try_clone().map_err(|e| TransportError::FailedToOpen {
            port: self.params.port.clone(),
            reason: e.to_string(),
        })?;

        {
            let mut half = self.reader.lock();
            half.port = Some(read_port);
            half.carry.clear();
            half.lines.clear();
        }
        *self.writer.lock() = Some(port);
        self.closing.store(false, Ordering::SeqCst);

        tracing::info!(
            "Connected to {} at {} baud",
            self.params.port,
            self.params.baud_rate
        );
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);
        self.writer.lock().take();
        self.reader.lock().port.take();
        Ok(())
    }

    fn read_line(&self) -> Result<String> {
        let mut half = self.reader.lock();
        let mut buf = [0u8; 256];
        loop {
            if let Some(line) = half.lines.pop_front() {
                return Ok(line);
            }
            if self.closing.load(Ordering::SeqCst) {
                return Ok(SENTINEL_LINE.to_string());
            }
            let Some(port) = half.port.as_mut() else {
                return Ok(SENTINEL_LINE.to_string());
            };
            match port.read(&mut buf) {
                // EOF means the device node went away under us
                Ok(0) => return Err(TransportError::Disconnected.into()),
                Ok(n) => {
                    let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                    half.carry.push_str(&chunk);
                    while let Some(pos) = half.carry.find('\n') {
                        let line = half.carry[..pos].trim().to_string();
                        half.carry.drain(..=pos);
                        half.lines.push_back(line);
                    }
                }
                Err(e)
                    if e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::Interrupted =>
                {
                    continue;
                }
                Err(e) => {
                    return Err(TransportError::ReadFailed {
                        reason: e.to_string(),
                    }
                    .into())
                }
            }
        }
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        let mut guard = self.writer.lock();
        let Some(port) = guard.as_mut() else {
            return Err(StreamError::NotConnected.into());
        };
        port.write_all(data)
            .map_err(|e| Error::from(TransportError::WriteFailed {
                reason: e.to_string(),
            }))?;
        Ok(data.len())
    }

    fn unblock_reader(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    fn description(&self) -> String {
        format!("{} @ {}", self.params.port, self.params.baud_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cnc_port_patterns() {
        assert!(is_cnc_port("COM3"));
        assert!(is_cnc_port("/dev/ttyACM0"));
        assert!(is_cnc_port("/dev/ttyUSB1"));
        assert!(is_cnc_port("/dev/cu.usbmodem14101"));
        assert!(!is_cnc_port("COMX"));
        assert!(!is_cnc_port("/dev/ttyS0"));
    }

    #[test]
    fn unopened_endpoint_refuses_writes() {
        let endpoint = SerialEndpoint::new(ConnectionParams::default());
        assert!(endpoint.write(b"?").is_err());
    }
}
