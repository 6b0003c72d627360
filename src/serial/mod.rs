pub mod interface;
pub mod lines;

pub use interface::{PortChoice, SerialInterface};
pub use lines::LineBuffer;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialDeviceInfo {
    pub port_name: String,
    pub port_type: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Communication timeout")]
    Timeout,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;

/// Byte source behind a connection reader.
///
/// `read_data` waits at most `timeout_ms` and returns `SerialError::Timeout` when nothing
/// arrived, so callers can observe a stop request between reads.
#[async_trait::async_trait]
pub trait SerialPortIO: Send {
    async fn read_data(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<usize>;

    /// Human-readable name used in logs.
    fn describe(&self) -> String {
        "serial".to_string()
    }
}
