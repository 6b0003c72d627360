use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_util::sync::CancellationToken;

use super::{StreamBridge, Transport, WsTransport};

/// Signal name requested by a websocket path: leading `/` removed, percent-decoded.
pub fn signal_from_path(path: &str) -> Option<String> {
    let raw = path.trim_start_matches('/');
    let decoded = urlencoding::decode(raw).ok()?;
    let name = decoded.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Accept stream consumers until `shutdown` is cancelled.
///
/// Each consumer connects to `ws://<addr>/<signal>` and gets its own bridge loop.
pub async fn serve(listener: TcpListener, bridge: Arc<StreamBridge>, shutdown: CancellationToken) -> std::io::Result<()> {
    log::info!("Stream server listening on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    log::warn!("Failed to accept stream consumer: {}", e);
                    continue;
                }
            },
        };

        let bridge = bridge.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            handle_consumer(stream, peer, bridge, shutdown).await;
        });
    }

    log::info!("Stream server stopped");
    Ok(())
}

async fn handle_consumer(stream: TcpStream, peer: SocketAddr, bridge: Arc<StreamBridge>, shutdown: CancellationToken) {
    let mut requested = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        match signal_from_path(request.uri().path()) {
            Some(signal) => {
                requested = Some(signal);
                Ok(response)
            }
            None => {
                let mut error = ErrorResponse::new(Some("missing signal name in path".to_string()));
                *error.status_mut() = StatusCode::BAD_REQUEST;
                Err(error)
            }
        }
    };

    let websocket = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(websocket) => websocket,
        Err(e) => {
            log::warn!("Rejected stream consumer {}: {}", peer, e);
            return;
        }
    };
    let Some(signal) = requested else {
        return;
    };

    log::info!("Stream consumer {} subscribed to {}", peer, signal);
    let mut transport = WsTransport::new(websocket, &shutdown);
    let closed = transport.closed();
    let exit = bridge.run(&signal, &mut transport, closed).await;
    if let Err(e) = transport.close().await {
        log::debug!("Closing stream for {} failed: {}", peer, e);
    }
    log::debug!("Stream consumer {} finished: {:?}", peer, exit);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_from_path() {
        assert_eq!(signal_from_path("/temp").as_deref(), Some("temp"));
        assert_eq!(signal_from_path("/temp%5B1%5D").as_deref(), Some("temp[1]"));
        assert_eq!(signal_from_path("/room%20a").as_deref(), Some("room a"));
        assert_eq!(signal_from_path("/"), None);
        assert_eq!(signal_from_path(""), None);
        assert_eq!(signal_from_path("/%20"), None);
    }
}
