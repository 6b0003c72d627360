use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use super::{Transport, TransportError};
use crate::config::BridgeSettings;
use crate::decoder::Sample;
use crate::dispatch::{handler, Dispatcher, SampleHandler};

/// What a consumer receives for each sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamPayload {
    pub timestamp: f64,
    pub value: f64,
}

impl From<&Sample> for StreamPayload {
    fn from(sample: &Sample) -> Self {
        Self { timestamp: sample.time, value: sample.value }
    }
}

/// Subscribes a handler for as long as it is alive.
pub struct Subscription {
    dispatcher: Arc<Dispatcher>,
    signal: String,
    handler: Arc<dyn SampleHandler>,
}

impl Subscription {
    pub fn new(dispatcher: Arc<Dispatcher>, signal: impl Into<String>, handler: Arc<dyn SampleHandler>) -> Self {
        let signal = signal.into();
        dispatcher.subscribe(&signal, handler.clone());
        Self { dispatcher, signal, handler }
    }

    pub fn signal(&self) -> &str {
        &self.signal
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispatcher.unsubscribe(&self.signal, &self.handler);
        log::debug!("Unsubscribed stream from {}", self.signal);
    }
}

#[derive(Debug)]
pub enum StreamExit {
    /// The consumer went away or the server is shutting down.
    Disconnected,
    SendFailed(TransportError),
}

/// Turns a dispatcher subscription into paced writes on a [`Transport`].
pub struct StreamBridge {
    dispatcher: Arc<Dispatcher>,
    buffer: usize,
    pacing: Duration,
}

impl StreamBridge {
    pub fn new(dispatcher: Arc<Dispatcher>, buffer: usize, pacing: Duration) -> Self {
        Self { dispatcher, buffer: buffer.max(1), pacing }
    }

    pub fn from_settings(dispatcher: Arc<Dispatcher>, settings: &BridgeSettings) -> Self {
        Self::new(dispatcher, settings.stream_buffer, settings.stream_pacing())
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Forward samples of `signal` until the consumer disconnects or a write fails.
    ///
    /// The subscription is removed on every exit path, including when this future is dropped.
    /// When the consumer falls `buffer` payloads behind, the oldest ones are discarded.
    pub async fn run<T>(&self, signal: &str, transport: &mut T, closed: CancellationToken) -> StreamExit
    where
        T: Transport + ?Sized,
    {
        let (tx, mut rx) = broadcast::channel::<StreamPayload>(self.buffer);
        let enqueue = handler(move |_, sample| {
            // No receiver only means the stream is already winding down.
            let _ = tx.send(StreamPayload::from(sample));
            Ok(())
        });
        let _subscription = Subscription::new(self.dispatcher.clone(), signal, enqueue);
        log::info!("Streaming {} to consumer", signal);

        let exit = loop {
            let payload = tokio::select! {
                biased;
                _ = closed.cancelled() => break StreamExit::Disconnected,
                next = rx.recv() => match next {
                    Ok(payload) => payload,
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Stream for {} dropped {} payloads", signal, skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break StreamExit::Disconnected,
                },
            };

            let json = match serde_json::to_value(payload) {
                Ok(json) => json,
                Err(e) => break StreamExit::SendFailed(e.into()),
            };
            // A consumer that stopped reading can stall the write indefinitely.
            let sent = tokio::select! {
                biased;
                _ = closed.cancelled() => break StreamExit::Disconnected,
                sent = transport.send_json(json) => sent,
            };
            if let Err(e) = sent {
                break StreamExit::SendFailed(e);
            }

            if !self.pacing.is_zero() {
                tokio::select! {
                    biased;
                    _ = closed.cancelled() => break StreamExit::Disconnected,
                    _ = tokio::time::sleep(self.pacing) => {}
                }
            }
        };

        match &exit {
            StreamExit::Disconnected => log::info!("Stream for {} ended: consumer disconnected", signal),
            StreamExit::SendFailed(e) => log::info!("Stream for {} ended: {}", signal, e),
        }
        exit
    }
}
