//! Channel seams and the WebSocket default
//!
//! The gateway speaks over any duplex, multiplexed message channel. The
//! seams here carry that abstraction: a `Connector` dials and yields the
//! two halves, `MessageSink` sends text frames, `MessageSource` yields
//! them. The session layer never sees anything below these traits.
//!
//! The default `WsConnector` rides tokio-tungstenite; tests plug an
//! in-memory pair into the same seams.

use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{http::Request, protocol::Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use crate::error::GatewayError;

/// Send half of a connected channel.
#[async_trait]
pub trait MessageSink: Send {
    /// Send one text frame.
    async fn send(&mut self, frame: String) -> Result<(), GatewayError>;

    /// Close the channel from this side.
    async fn close(&mut self) -> Result<(), GatewayError>;
}

/// Receive half of a connected channel.
#[async_trait]
pub trait MessageSource: Send {
    /// Next inbound text frame. `None` means the channel is closed.
    async fn next(&mut self) -> Option<Result<String, GatewayError>>;
}

/// Dials the gateway and yields a connected channel.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn MessageSink>, Box<dyn MessageSource>), GatewayError>;
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Default connector: WebSocket via tokio-tungstenite.
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn MessageSink>, Box<dyn MessageSource>), GatewayError> {
        debug!(url = %url, "Connecting to gateway WebSocket");

        let request = Request::builder()
            .uri(url)
            .header("Host", extract_host(url))
            .header("Origin", "http://localhost")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .body(())
            .map_err(|e| GatewayError::Transport(format!("Failed to build request: {}", e)))?;

        let (ws, _) = connect_async_with_config(request, None, false)
            .await
            .map_err(|e| GatewayError::Transport(format!("WebSocket connect failed: {}", e)))?;

        let (sink, stream) = ws.split();

        debug!(url = %url, "Gateway WebSocket connected");
        Ok((Box::new(WsSinkHalf(sink)), Box::new(WsSourceHalf(stream))))
    }
}

struct WsSinkHalf(WsSink);

#[async_trait]
impl MessageSink for WsSinkHalf {
    async fn send(&mut self, frame: String) -> Result<(), GatewayError> {
        self.0
            .send(Message::Text(frame))
            .await
            .map_err(|e| GatewayError::Transport(format!("Failed to send: {}", e)))
    }

    async fn close(&mut self) -> Result<(), GatewayError> {
        self.0
            .close()
            .await
            .map_err(|e| GatewayError::Transport(format!("Failed to close: {}", e)))
    }
}

struct WsSourceHalf(WsStream);

#[async_trait]
impl MessageSource for WsSourceHalf {
    async fn next(&mut self) -> Option<Result<String, GatewayError>> {
        loop {
            match self.0.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text)),
                Some(Ok(Message::Close(_))) => return None,
                Some(Ok(Message::Ping(_))) => {
                    // Pong is handled automatically by tungstenite
                    continue;
                }
                Some(Ok(_)) => continue, // Skip binary, pong, frame messages
                Some(Err(e)) => {
                    return Some(Err(GatewayError::Transport(format!(
                        "WebSocket error: {}",
                        e
                    ))))
                }
                None => return None, // Stream ended
            }
        }
    }
}

/// Extract host from URL for Host header
fn extract_host(url: &str) -> &str {
    url.split("//")
        .nth(1)
        .and_then(|s| s.split('/').next())
        .unwrap_or("localhost")
}
