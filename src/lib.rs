pub mod config;
pub mod connection;
pub mod decoder;
pub mod dispatch;
pub mod serial;
pub mod stream;

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use config::{BridgeSettings, ConnectionRequest};
use connection::{ConnectionId, ConnectionManager};
use dispatch::{DiagnosticsSink, Dispatcher, LogDeclarer, LogDiagnostics, SignalDeclarer, SignalRegistry};
use stream::StreamBridge;

/// Everything one process needs: a dispatcher shared by all connections, the connection
/// manager feeding it, and the stream bridge reading from it.
pub struct App {
    settings: BridgeSettings,
    dispatcher: Arc<Dispatcher>,
    connections: ConnectionManager,
    streams: Arc<StreamBridge>,
}

impl App {
    pub fn new(settings: BridgeSettings) -> Self {
        Self::with_hooks(settings, Arc::new(LogDeclarer), Arc::new(LogDiagnostics))
    }

    pub fn with_hooks(
        settings: BridgeSettings,
        declarer: Arc<dyn SignalDeclarer>,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        let registry = Arc::new(SignalRegistry::new());
        let dispatcher = Arc::new(Dispatcher::with_hooks(registry, declarer, diagnostics));
        let connections = ConnectionManager::new(dispatcher.clone(), settings.clone());
        let streams = Arc::new(StreamBridge::from_settings(dispatcher.clone(), &settings));
        Self { settings, dispatcher, connections, streams }
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn streams(&self) -> &Arc<StreamBridge> {
        &self.streams
    }

    /// Open each request, logging the ones that fail. Returns the ids that opened.
    pub async fn open_all(&self, requests: Vec<ConnectionRequest>) -> Vec<ConnectionId> {
        let mut opened = Vec::new();
        for request in requests {
            let port = request.serial_port.clone().unwrap_or_else(|| "AUTO".to_string());
            match self.connections.open_connection(request).await {
                Ok(id) => opened.push(id),
                Err(e) => log::error!("Failed to open {}: {}", port, e),
            }
        }
        opened
    }

    /// Open `requests`, serve stream consumers until `shutdown`, then close every connection.
    pub async fn run(&self, requests: Vec<ConnectionRequest>, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.settings.listen_addr)
            .await
            .with_context(|| format!("failed to bind stream server on {}", self.settings.listen_addr))?;

        let opened = self.open_all(requests).await;
        log::info!("{} connection(s) open", opened.len());

        let served = stream::serve(listener, self.streams.clone(), shutdown.clone()).await;

        let closed = self.connections.close_all().await;
        log::info!("Closed {} connection(s)", closed);
        served.context("stream server failed")
    }
}
