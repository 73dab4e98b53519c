//! In-memory channel for exercising the client without a network.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::transport::{Connector, MessageSink, MessageSource};
use crate::error::GatewayError;

/// The gateway's side of one in-memory connection.
pub(crate) struct ServerEnd {
    /// Frames the client sent
    pub incoming: mpsc::UnboundedReceiver<String>,
    /// Frames to push to the client
    pub outgoing: mpsc::UnboundedSender<String>,
}

/// Connector that yields in-memory channel pairs and hands the server
/// ends back to the test. Each dial produces one `ServerEnd`, so a test
/// can count dials by counting what it receives.
pub(crate) struct MemoryConnector {
    server_ends: mpsc::UnboundedSender<ServerEnd>,
}

impl MemoryConnector {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { server_ends: tx }, rx)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        _url: &str,
    ) -> Result<(Box<dyn MessageSink>, Box<dyn MessageSource>), GatewayError> {
        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        self.server_ends
            .send(ServerEnd {
                incoming: server_rx,
                outgoing: server_tx,
            })
            .map_err(|_| GatewayError::Transport("Test server gone".to_string()))?;
        Ok((
            Box::new(MemorySink { tx: Some(client_tx) }),
            Box::new(MemorySource { rx: client_rx }),
        ))
    }
}

struct MemorySink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn send(&mut self, frame: String) -> Result<(), GatewayError> {
        self.tx
            .as_ref()
            .and_then(|tx| tx.send(frame).ok())
            .ok_or_else(|| GatewayError::Transport("Channel closed".to_string()))
    }

    async fn close(&mut self) -> Result<(), GatewayError> {
        self.tx = None;
        Ok(())
    }
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn next(&mut self) -> Option<Result<String, GatewayError>> {
        self.rx.recv().await.map(Ok)
    }
}
