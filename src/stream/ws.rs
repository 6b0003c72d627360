use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use super::{Transport, TransportError};

/// [`Transport`] over an accepted websocket.
///
/// The inbound half is drained by a watcher task that cancels `closed` when the consumer
/// sends Close, errors out, or the stream ends.
pub struct WsTransport<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
    closed: CancellationToken,
    watcher: JoinHandle<()>,
}

impl<S> WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// `parent` cancellation (server shutdown) also closes this transport.
    pub fn new(stream: WebSocketStream<S>, parent: &CancellationToken) -> Self {
        let (sink, mut source) = stream.split();
        let closed = parent.child_token();
        let token = closed.clone();

        let watcher = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    msg = source.next() => match msg {
                        Some(Ok(Message::Close(_))) | None => {
                            log::debug!("Stream consumer closed the connection");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            log::debug!("Stream consumer read error: {}", e);
                            break;
                        }
                    },
                }
            }
            token.cancel();
        });

        Self { sink, closed, watcher }
    }

    /// Cancelled once the consumer is gone.
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}

impl<S> Drop for WsTransport<S> {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

#[async_trait::async_trait]
impl<S> Transport for WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send_json(&mut self, payload: serde_json::Value) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Disconnected);
        }
        self.sink
            .send(Message::Text(payload.to_string().into()))
            .await
            .map_err(|e| match e {
                WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Disconnected,
                other => TransportError::Send(other.to_string()),
            })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.cancel();
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::Send(e.to_string())),
        }
    }
}
