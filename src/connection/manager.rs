use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, RwLock};

use super::reader::{ConnectionReader, ReaderSettings};
use super::relay::{connection_queues, QueueRelay};
use super::{ConnectionError, ConnectionId, ConnectionInfo, ConnectionMetrics, Result};
use crate::config::{BridgeSettings, ConnectionRequest};
use crate::decoder::FormatConfig;
use crate::dispatch::Dispatcher;
use crate::serial::{SerialError, SerialInterface, SerialPortIO};

struct ActiveConnection {
    info: ConnectionInfo,
    reader: ConnectionReader,
    relay: QueueRelay,
}

impl ActiveConnection {
    fn snapshot(&self) -> ConnectionInfo {
        let mut info = self.info.clone();
        info.state = self.reader.state();
        info
    }
}

/// Opens and closes device connections and wires each one into the shared dispatcher.
pub struct ConnectionManager {
    connections: Arc<RwLock<HashMap<ConnectionId, ActiveConnection>>>,
    dispatcher: Arc<Dispatcher>,
    settings: BridgeSettings,
    next_ordinal: AtomicU64,
}

impl ConnectionManager {
    pub fn new(dispatcher: Arc<Dispatcher>, settings: BridgeSettings) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            dispatcher,
            settings,
            next_ordinal: AtomicU64::new(0),
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    /// Validate a request, open its serial port and start reading.
    ///
    /// Nothing is registered when the port cannot be opened.
    pub async fn open_connection(&self, request: ConnectionRequest) -> Result<ConnectionId> {
        let (choice, baudrate, format) = request.into_parts()?;
        let port_name = SerialInterface::resolve_port(&choice);

        let interface = SerialInterface::open(&port_name, baudrate, self.settings.idle_interval())
            .map_err(|e| match e {
                SerialError::ConnectionFailed(reason) => ConnectionError::DeviceUnavailable(reason),
                SerialError::PortNotFound(port) => {
                    ConnectionError::DeviceUnavailable(format!("{} not found", port))
                }
                other => ConnectionError::Serial(other),
            })?;

        self.attach(port_name, baudrate, format, Box::new(interface)).await
    }

    /// Start a connection over an already opened byte source.
    ///
    /// The ordinal is only assigned once the reader is running.
    pub async fn attach(
        &self,
        port_name: String,
        baudrate: u32,
        format: FormatConfig,
        io: Box<dyn SerialPortIO>,
    ) -> Result<ConnectionId> {
        let id = ConnectionId::new();
        let (queues, receivers) = connection_queues(self.settings.queue_capacity);
        let mut reader = ConnectionReader::new(id, format.clone(), ReaderSettings::from(&self.settings));
        reader.start(io, queues)?;

        // Bound before the relay dispatches anything the reader has queued.
        let ordinal = self.next_ordinal.fetch_add(1, Ordering::SeqCst);
        self.dispatcher.registry().bind_connection(&id, ordinal);
        let relay = QueueRelay::spawn(id, receivers, self.dispatcher.clone());

        let info = ConnectionInfo {
            id,
            port_name: port_name.clone(),
            baudrate,
            ordinal,
            format,
            state: reader.state(),
            opened_at: Utc::now(),
        };

        self.connections
            .write()
            .await
            .insert(id, ActiveConnection { info, reader, relay });

        log::info!("Connection {} open on {} at {} baud (ordinal {})", id, port_name, baudrate, ordinal);
        Ok(id)
    }

    /// Stop a connection and wait until its device handle is released.
    pub async fn close_connection(&self, id: &ConnectionId) -> Result<()> {
        let connection = self.connections.write().await.remove(id);
        let mut connection = connection.ok_or(ConnectionError::NotFound(*id))?;

        connection.reader.stop().await;
        connection.relay.join().await;
        log::info!("Connection {} on {} closed", id, connection.info.port_name);
        Ok(())
    }

    /// Close every open connection. Used on process shutdown.
    pub async fn close_all(&self) -> usize {
        let ids: Vec<ConnectionId> = self.connections.read().await.keys().copied().collect();
        let mut closed = 0;
        for id in ids {
            match self.close_connection(&id).await {
                Ok(()) => closed += 1,
                Err(e) => log::debug!("Skipping {}: {}", id, e),
            }
        }
        closed
    }

    pub async fn list_connections(&self) -> Vec<ConnectionInfo> {
        let connections = self.connections.read().await;
        let mut infos: Vec<ConnectionInfo> = connections.values().map(ActiveConnection::snapshot).collect();
        infos.sort_by_key(|info| info.ordinal);
        infos
    }

    pub async fn get_connection(&self, id: &ConnectionId) -> Option<ConnectionInfo> {
        self.connections.read().await.get(id).map(ActiveConnection::snapshot)
    }

    pub async fn metrics(&self, id: &ConnectionId) -> Option<ConnectionMetrics> {
        self.connections.read().await.get(id).map(|c| c.reader.metrics())
    }

    pub async fn subscribe_metrics(&self, id: &ConnectionId) -> Option<watch::Receiver<ConnectionMetrics>> {
        self.connections.read().await.get(id).map(|c| c.reader.subscribe_metrics())
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ReaderState;
    use crate::dispatch::SignalRegistry;
    use crate::serial;
    use std::time::Duration;

    struct Silent;

    #[async_trait::async_trait]
    impl SerialPortIO for Silent {
        async fn read_data(&mut self, _buf: &mut [u8], _timeout_ms: u64) -> serial::Result<usize> {
            tokio::time::sleep(Duration::from_millis(1)).await;
            Err(SerialError::Timeout)
        }
    }

    fn manager() -> ConnectionManager {
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(SignalRegistry::new())));
        ConnectionManager::new(dispatcher, BridgeSettings::default())
    }

    #[tokio::test]
    async fn test_ordinals_follow_open_order() {
        let manager = manager();
        let a = manager.attach("A".into(), 9600, FormatConfig::line_only("t"), Box::new(Silent)).await.unwrap();
        let b = manager.attach("B".into(), 9600, FormatConfig::line_only("t"), Box::new(Silent)).await.unwrap();

        let infos = manager.list_connections().await;
        assert_eq!(infos.iter().map(|i| (i.id, i.ordinal)).collect::<Vec<_>>(), vec![(a, 0), (b, 1)]);
        assert!(infos.iter().all(|i| i.state == ReaderState::Open));
        assert_eq!(manager.dispatcher().registry().ordinal(&b), Some(1));

        assert_eq!(manager.close_all().await, 2);
        assert!(manager.list_connections().await.is_empty());
    }

    #[tokio::test]
    async fn test_close_unknown_connection() {
        let manager = manager();
        let id = manager.attach("A".into(), 9600, FormatConfig::line_only("t"), Box::new(Silent)).await.unwrap();
        manager.close_connection(&id).await.unwrap();

        assert!(matches!(manager.close_connection(&id).await, Err(ConnectionError::NotFound(_))));
        assert!(matches!(
            manager.close_connection(&ConnectionId::new()).await,
            Err(ConnectionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_open_registers_nothing() {
        let manager = manager();
        let request = ConnectionRequest {
            serial_port: Some("/dev/serialcast-missing-port".into()),
            ..Default::default()
        };
        assert!(matches!(
            manager.open_connection(request).await,
            Err(ConnectionError::DeviceUnavailable(_))
        ));
        assert_eq!(manager.len().await, 0);

        // The failed attempt did not consume an ordinal.
        let id = manager.attach("A".into(), 9600, FormatConfig::line_only("t"), Box::new(Silent)).await.unwrap();
        assert_eq!(manager.get_connection(&id).await.unwrap().ordinal, 0);
        manager.close_all().await;
    }

    #[tokio::test]
    async fn test_invalid_request_rejected() {
        let manager = manager();
        let request = ConnectionRequest { baudrate: Some(0), ..Default::default() };
        assert!(matches!(
            manager.open_connection(request).await,
            Err(ConnectionError::InvalidConfiguration(_))
        ));
    }
}
