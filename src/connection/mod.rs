pub mod manager;
pub mod models;
pub mod reader;
pub mod relay;

pub use manager::ConnectionManager;
pub use models::*;
pub use reader::{ConnectionReader, ReaderSettings};
pub use relay::{connection_queues, ConnectionQueues, QueueItem, QueueReceivers, QueueRelay, RelayTotals};

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection not found: {0}")]
    NotFound(ConnectionId),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Invalid connection configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Reader cannot start in state {0:?}")]
    InvalidState(ReaderState),

    #[error("Serial communication error: {0}")]
    Serial(#[from] crate::serial::SerialError),
}

impl From<crate::config::ConfigError> for ConnectionError {
    fn from(error: crate::config::ConfigError) -> Self {
        match error {
            crate::config::ConfigError::Invalid(reason) => ConnectionError::InvalidConfiguration(reason),
            other => ConnectionError::InvalidConfiguration(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConnectionError>;
