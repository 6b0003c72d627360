use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::relay::{ConnectionQueues, QueueItem};
use super::{ConnectionError, ConnectionId, ConnectionMetrics, ReaderState};
use crate::config::BridgeSettings;
use crate::decoder::{self, DecodeError, FormatConfig};
use crate::serial::{LineBuffer, SerialError, SerialPortIO};

const READ_CHUNK: usize = 1024;

#[derive(Debug, Clone, Copy)]
pub struct ReaderSettings {
    pub read_timeout: Duration,
    pub idle_interval: Duration,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self::from(&BridgeSettings::default())
    }
}

impl From<&BridgeSettings> for ReaderSettings {
    fn from(settings: &BridgeSettings) -> Self {
        Self {
            read_timeout: Duration::from_millis(settings.read_timeout_ms),
            idle_interval: settings.idle_interval(),
        }
    }
}

/// Owns one device handle and turns its byte stream into samples and errors.
///
/// `Created -> Open` on [`start`](Self::start), `Open -> Closing -> Closed` on
/// [`stop`](Self::stop). The handle is released before `stop` returns.
pub struct ConnectionReader {
    id: ConnectionId,
    format: Arc<FormatConfig>,
    settings: ReaderSettings,
    state: ReaderState,
    stop_tx: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<()>>,
    metrics_tx: watch::Sender<ConnectionMetrics>,
}

impl ConnectionReader {
    pub fn new(id: ConnectionId, format: FormatConfig, settings: ReaderSettings) -> Self {
        let (metrics_tx, _) = watch::channel(ConnectionMetrics::default());
        Self {
            id,
            format: Arc::new(format),
            settings,
            state: ReaderState::Created,
            stop_tx: None,
            task: None,
            metrics_tx,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn format(&self) -> &FormatConfig {
        &self.format
    }

    pub fn metrics(&self) -> ConnectionMetrics {
        self.metrics_tx.borrow().clone()
    }

    pub fn subscribe_metrics(&self) -> watch::Receiver<ConnectionMetrics> {
        self.metrics_tx.subscribe()
    }

    /// True once the read loop has exited, whether or not `stop` was called.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Take ownership of an opened device and start the read loop.
    pub fn start(&mut self, io: Box<dyn SerialPortIO>, queues: ConnectionQueues) -> Result<(), ConnectionError> {
        if self.state != ReaderState::Created {
            return Err(ConnectionError::InvalidState(self.state));
        }

        let (stop_tx, stop_rx) = mpsc::channel(1);
        log::info!("Starting reader {} on {}", self.id, io.describe());

        let task = tokio::spawn(read_loop(
            self.id,
            io,
            self.format.clone(),
            self.settings,
            queues,
            stop_rx,
            self.metrics_tx.clone(),
        ));

        self.stop_tx = Some(stop_tx);
        self.task = Some(task);
        self.state = ReaderState::Open;
        Ok(())
    }

    /// Stop the read loop and wait until the device handle is released. Idempotent.
    pub async fn stop(&mut self) {
        match self.state {
            ReaderState::Closed => return,
            ReaderState::Created => {
                self.state = ReaderState::Closed;
                return;
            }
            _ => {}
        }

        self.state = ReaderState::Closing;
        if let Some(stop_tx) = self.stop_tx.take() {
            // A full channel already holds a stop request.
            let _ = stop_tx.try_send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("Reader {} task failed: {}", self.id, e);
            }
        }
        self.state = ReaderState::Closed;
        log::info!("Reader {} closed", self.id);
    }
}

async fn read_loop(
    id: ConnectionId,
    mut io: Box<dyn SerialPortIO>,
    format: Arc<FormatConfig>,
    settings: ReaderSettings,
    queues: ConnectionQueues,
    mut stop_rx: mpsc::Receiver<()>,
    metrics_tx: watch::Sender<ConnectionMetrics>,
) {
    let timeout_ms = settings.read_timeout.as_millis().max(1) as u64;
    let mut lines = LineBuffer::new();
    let mut buf = [0u8; READ_CHUNK];
    let mut metrics = ConnectionMetrics::default();

    'reading: loop {
        let read = tokio::select! {
            biased;
            _ = stop_rx.recv() => break,
            read = io.read_data(&mut buf, timeout_ms) => read,
        };

        match read {
            Ok(0) | Err(SerialError::Timeout) => {
                if !idle(&mut stop_rx, settings.idle_interval).await {
                    break;
                }
            }
            Ok(n) => {
                for line in lines.push(&buf[..n]) {
                    metrics.lines_read += 1;
                    let delivered = match decoder::decode_now(&line, &format) {
                        Ok(sample) => {
                            metrics.samples += 1;
                            forward(&queues.samples, sample, &mut stop_rx).await
                        }
                        Err(error) => {
                            metrics.decode_errors += 1;
                            forward(&queues.errors, error, &mut stop_rx).await
                        }
                    };
                    if !delivered {
                        break 'reading;
                    }
                }
                metrics.partial_buffer_trims = lines.trims();
                metrics_tx.send_replace(metrics.clone());
            }
            Err(e) => {
                let detail = e.to_string();
                log::warn!("Reader {} read error: {}", id, detail);
                metrics.read_errors += 1;
                metrics.last_error = Some(detail.clone());
                metrics_tx.send_replace(metrics.clone());

                if !forward(&queues.errors, DecodeError::device_read(detail), &mut stop_rx).await {
                    break;
                }
                if !idle(&mut stop_rx, settings.idle_interval).await {
                    break;
                }
            }
        }
    }

    // Release the device before the relay sees the end of the stream.
    let port = io.describe();
    drop(io);
    log::debug!("Reader {} released {}", id, port);

    let _ = queues.samples.send(QueueItem::Shutdown).await;
    let _ = queues.errors.send(QueueItem::Shutdown).await;
}

/// Enqueue one item, giving up if a stop arrives while the queue is full.
/// Returns false when the loop should exit.
async fn forward<T>(tx: &mpsc::Sender<QueueItem<T>>, item: T, stop_rx: &mut mpsc::Receiver<()>) -> bool {
    tokio::select! {
        biased;
        _ = stop_rx.recv() => false,
        sent = tx.send(QueueItem::Item(item)) => sent.is_ok(),
    }
}

async fn idle(stop_rx: &mut mpsc::Receiver<()>, interval: Duration) -> bool {
    tokio::select! {
        biased;
        _ = stop_rx.recv() => false,
        _ = tokio::time::sleep(interval) => true,
    }
}
