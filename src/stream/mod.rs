//! Live per-signal feeds for external consumers.

pub mod bridge;
pub mod server;
pub mod ws;

pub use bridge::{StreamBridge, StreamExit, StreamPayload, Subscription};
pub use server::{serve, signal_from_path};
pub use ws::WsTransport;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Consumer disconnected")]
    Disconnected,

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Outbound half of a consumer channel.
#[async_trait::async_trait]
pub trait Transport: Send {
    async fn send_json(&mut self, payload: serde_json::Value) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}
