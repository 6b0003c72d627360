use std::io::Read;
use std::time::{Duration, Instant};

use serialport::{SerialPort, SerialPortType};

use super::{Result, SerialDeviceInfo, SerialError, SerialPortIO};

pub const DEFAULT_BAUD_RATE: u32 = 115200;
pub const AUTO_PORT: &str = "AUTO";

/// Requested port: a concrete device path or "first port found".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortChoice {
    Auto,
    Named(String),
}

impl PortChoice {
    /// `"AUTO"` (any case) and the empty string select automatically.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(AUTO_PORT) {
            PortChoice::Auto
        } else {
            PortChoice::Named(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PortChoice::Auto => AUTO_PORT,
            PortChoice::Named(name) => name,
        }
    }
}

impl Default for PortChoice {
    fn default() -> Self {
        PortChoice::Auto
    }
}

pub struct SerialInterface {
    port: Option<Box<dyn SerialPort>>,
    port_name: String,
    idle_interval: Duration,
}

impl SerialInterface {
    /// List every serial port the OS reports.
    pub fn discover_ports() -> Result<Vec<SerialDeviceInfo>> {
        let ports = serialport::available_ports()?;
        let devices = ports
            .into_iter()
            .map(|port| match port.port_type {
                SerialPortType::UsbPort(usb_info) => SerialDeviceInfo {
                    port_name: port.port_name,
                    port_type: "usb".to_string(),
                    vid: Some(usb_info.vid),
                    pid: Some(usb_info.pid),
                    serial_number: usb_info.serial_number,
                    manufacturer: usb_info.manufacturer,
                    product: usb_info.product,
                },
                other => SerialDeviceInfo {
                    port_name: port.port_name,
                    port_type: match other {
                        SerialPortType::PciPort => "pci",
                        SerialPortType::BluetoothPort => "bluetooth",
                        _ => "unknown",
                    }
                    .to_string(),
                    vid: None,
                    pid: None,
                    serial_number: None,
                    manufacturer: None,
                    product: None,
                },
            })
            .collect();
        Ok(devices)
    }

    /// Resolve a port choice to a device path.
    ///
    /// Auto picks the first discovered port; with nothing discovered the literal choice is
    /// returned and the subsequent open reports the failure.
    pub fn resolve_port(choice: &PortChoice) -> String {
        match choice {
            PortChoice::Named(name) => name.clone(),
            PortChoice::Auto => match Self::discover_ports() {
                Ok(ports) if !ports.is_empty() => {
                    log::info!("Auto-selected serial port {}", ports[0].port_name);
                    ports[0].port_name.clone()
                }
                Ok(_) => {
                    log::warn!("No serial ports discovered for automatic selection");
                    AUTO_PORT.to_string()
                }
                Err(e) => {
                    log::warn!("Serial port discovery failed: {}", e);
                    AUTO_PORT.to_string()
                }
            },
        }
    }

    /// Open `port_name`. Fails with `ConnectionFailed` when the port is busy or missing.
    pub fn open(port_name: &str, baud_rate: u32, idle_interval: Duration) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(idle_interval.max(Duration::from_millis(1)))
            .open()
            .map_err(|e| {
                SerialError::ConnectionFailed(format!(
                    "{} is already in use or cannot be opened: {}",
                    port_name, e
                ))
            })?;

        log::info!("Opened serial port {} at {} baud", port_name, baud_rate);
        Ok(Self {
            port: Some(port),
            port_name: port_name.to_string(),
            idle_interval,
        })
    }

    /// Release the device handle.
    pub fn disconnect(&mut self) {
        if self.port.take().is_some() {
            log::info!("Closed serial port {}", self.port_name);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl Drop for SerialInterface {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[async_trait::async_trait]
impl SerialPortIO for SerialInterface {
    async fn read_data(&mut self, buffer: &mut [u8], timeout_ms: u64) -> Result<usize> {
        let idle = self.idle_interval;
        let port = self
            .port
            .as_mut()
            .ok_or(SerialError::ConnectionFailed("Not connected".to_string()))?;

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            match port.bytes_to_read() {
                Ok(0) => {
                    if Instant::now() >= deadline {
                        return Err(SerialError::Timeout);
                    }
                    tokio::time::sleep(idle).await;
                }
                Ok(available) => {
                    let want = (available as usize).min(buffer.len());
                    return match port.read(&mut buffer[..want]) {
                        Ok(bytes_read) => Ok(bytes_read),
                        Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {
                            Err(SerialError::Timeout)
                        }
                        Err(e) => Err(SerialError::IoError(e)),
                    };
                }
                Err(e) => return Err(SerialError::SerialportError(e)),
            }
        }
    }

    fn describe(&self) -> String {
        self.port_name.clone()
    }
}
