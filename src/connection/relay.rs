use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::ConnectionId;
use crate::decoder::{DecodeError, Sample};
use crate::dispatch::Dispatcher;

/// Queue entry between a reader and its relay. `Shutdown` ends the consuming loop.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueItem<T> {
    Item(T),
    Shutdown,
}

/// Producer side of a connection's two queues. Owned by the reader.
#[derive(Debug, Clone)]
pub struct ConnectionQueues {
    pub samples: mpsc::Sender<QueueItem<Sample>>,
    pub errors: mpsc::Sender<QueueItem<DecodeError>>,
}

/// Consumer side. Owned by the relay.
#[derive(Debug)]
pub struct QueueReceivers {
    pub samples: mpsc::Receiver<QueueItem<Sample>>,
    pub errors: mpsc::Receiver<QueueItem<DecodeError>>,
}

/// Create the bounded sample and error queues for one connection.
pub fn connection_queues(capacity: usize) -> (ConnectionQueues, QueueReceivers) {
    let capacity = capacity.max(1);
    let (samples_tx, samples_rx) = mpsc::channel(capacity);
    let (errors_tx, errors_rx) = mpsc::channel(capacity);
    (
        ConnectionQueues { samples: samples_tx, errors: errors_tx },
        QueueReceivers { samples: samples_rx, errors: errors_rx },
    )
}

/// Counts of items a relay forwarded before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayTotals {
    pub samples: u64,
    pub errors: u64,
}

/// Drains one connection's queues into the dispatcher on two independent tasks.
pub struct QueueRelay {
    connection: ConnectionId,
    sample_task: Option<JoinHandle<u64>>,
    error_task: Option<JoinHandle<u64>>,
}

impl QueueRelay {
    pub fn spawn(connection: ConnectionId, receivers: QueueReceivers, dispatcher: Arc<Dispatcher>) -> Self {
        let QueueReceivers { samples, errors } = receivers;

        let sample_dispatcher = dispatcher.clone();
        let sample_task = tokio::spawn(relay_loop(samples, move |sample: Sample| {
            sample_dispatcher.register_sample(&connection, sample);
        }));
        let error_task = tokio::spawn(relay_loop(errors, move |error: DecodeError| {
            dispatcher.register_error(&connection, &error);
        }));

        Self {
            connection,
            sample_task: Some(sample_task),
            error_task: Some(error_task),
        }
    }

    /// Wait for both loops to reach their shutdown sentinel (or a closed queue).
    pub async fn join(&mut self) -> RelayTotals {
        let mut totals = RelayTotals::default();
        if let Some(task) = self.sample_task.take() {
            match task.await {
                Ok(count) => totals.samples = count,
                Err(e) => log::error!("Sample relay for {} failed: {}", self.connection, e),
            }
        }
        if let Some(task) = self.error_task.take() {
            match task.await {
                Ok(count) => totals.errors = count,
                Err(e) => log::error!("Error relay for {} failed: {}", self.connection, e),
            }
        }
        log::debug!(
            "Relay for {} finished ({} samples, {} errors)",
            self.connection,
            totals.samples,
            totals.errors
        );
        totals
    }

    pub fn is_finished(&self) -> bool {
        self.sample_task.as_ref().map_or(true, JoinHandle::is_finished)
            && self.error_task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

async fn relay_loop<T, F>(mut rx: mpsc::Receiver<QueueItem<T>>, mut forward: F) -> u64
where
    F: FnMut(T),
{
    let mut forwarded = 0;
    while let Some(item) = rx.recv().await {
        match item {
            QueueItem::Item(value) => {
                forward(value);
                forwarded += 1;
            }
            QueueItem::Shutdown => break,
        }
    }
    forwarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{handler, SignalRegistry};
    use parking_lot::Mutex;

    fn sample(key: &str, value: f64) -> Sample {
        Sample { key: key.into(), value, time: 0.0 }
    }

    #[tokio::test]
    async fn test_relay_preserves_order_and_stops_on_sentinel() {
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(SignalRegistry::new())));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        dispatcher.subscribe(
            "k",
            handler(move |_, s| {
                sink.lock().push(s.value);
                Ok(())
            }),
        );

        let (queues, receivers) = connection_queues(4);
        let mut relay = QueueRelay::spawn(ConnectionId::new(), receivers, dispatcher);
        for i in 0..10 {
            queues.samples.send(QueueItem::Item(sample("k", i as f64))).await.unwrap();
        }
        queues.errors.send(QueueItem::Item(DecodeError::device_read("x"))).await.unwrap();
        queues.samples.send(QueueItem::Shutdown).await.unwrap();
        queues.errors.send(QueueItem::Shutdown).await.unwrap();

        let totals = relay.join().await;
        assert_eq!(totals, RelayTotals { samples: 10, errors: 1 });
        assert_eq!(*seen.lock(), (0..10).map(|i| i as f64).collect::<Vec<_>>());
        assert!(relay.is_finished());
    }

    #[tokio::test]
    async fn test_relay_survives_failing_handler() {
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(SignalRegistry::new())));
        dispatcher.subscribe("k", handler(|_, s| if s.value < 2.0 { Err("bad".into()) } else { Ok(()) }));
        dispatcher.subscribe("k", handler(|_, s| if s.value == 0.0 { panic!("first sample") } else { Ok(()) }));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        dispatcher.subscribe(
            "k",
            handler(move |_, s| {
                sink.lock().push(s.value);
                Ok(())
            }),
        );

        let (queues, receivers) = connection_queues(8);
        let mut relay = QueueRelay::spawn(ConnectionId::new(), receivers, dispatcher);
        for i in 0..3 {
            queues.samples.send(QueueItem::Item(sample("k", i as f64))).await.unwrap();
        }
        drop(queues);

        assert_eq!(relay.join().await.samples, 3);
        assert_eq!(*seen.lock(), vec![0.0, 1.0, 2.0]);
    }
}
