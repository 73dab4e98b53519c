//! Gateway client with explicit connection lifecycle
//!
//! The client owns the one shared mutable resource — the connection —
//! and everything else only reads its state or asks it to send. It is a
//! plain value: construct it, share it behind an `Arc` if needed. There
//! is no module-level singleton.
//!
//! # Lifecycle
//!
//! - `connect()` dials, authenticates, and only then installs a session;
//!   it is idempotent and never auto-retries a failure.
//! - `disconnect()` tears the session down and settles every pending
//!   call with `ConnectionClosed`, so no caller awaits forever.
//! - `connection_state()` is a watch channel for callers that must gate
//!   calls on connectivity.

use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use super::auth::{authenticate, Credential};
use super::session::{CallHandle, CallOptions, Session};
use super::transport::{Connector, WsConnector};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::protocol::{ControlFrame, OperationRequest};
use crate::subscriptions::{Subscription, SubscriptionHub};

/// Connection lifecycle state, observable via `connection_state()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Client for one logical gateway connection.
pub struct GatewayClient {
    config: GatewayConfig,
    connector: Box<dyn Connector>,
    /// The current session, if any. `None` means disconnected.
    session: RwLock<Option<Arc<Session>>>,
    hub: Arc<SubscriptionHub>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    last_reason: Arc<StdMutex<Option<String>>>,
}

impl GatewayClient {
    /// Create a client with the default WebSocket connector. No I/O
    /// happens until `connect()`.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        Self::with_connector(config, Box::new(WsConnector))
    }

    /// Create a client over a custom channel implementation.
    pub fn with_connector(
        config: GatewayConfig,
        connector: Box<dyn Connector>,
    ) -> Result<Self, GatewayError> {
        let config = config.validate()?;
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Ok(Self {
            config,
            connector,
            session: RwLock::new(None),
            hub: Arc::new(SubscriptionHub::new()),
            state_tx: Arc::new(state_tx),
            state_rx,
            last_reason: Arc::new(StdMutex::new(None)),
        })
    }

    /// Connect and authenticate.
    ///
    /// Idempotent: a second call while connected logs and returns. On
    /// failure the client is left disconnected with the reason recorded;
    /// it never retries on its own — re-invoke to try again.
    pub async fn connect(&self, credential: Credential) -> Result<(), GatewayError> {
        {
            let session = self.session.read().await;
            if session.as_ref().map(|s| s.is_live()).unwrap_or(false) {
                debug!("Already connected, ignoring connect()");
                return Ok(());
            }
        }

        let mut session_slot = self.session.write().await;
        // Lost the race to another connect()
        if session_slot.as_ref().map(|s| s.is_live()).unwrap_or(false) {
            debug!("Already connected, ignoring connect()");
            return Ok(());
        }

        info!(url = %self.config.gateway_url, "Connecting to gateway");
        let _ = self.state_tx.send(ConnectionState::Connecting);

        let dialed = tokio::time::timeout(
            self.config.connect_timeout(),
            self.connector.connect(&self.config.gateway_url),
        )
        .await
        .unwrap_or_else(|_| {
            Err(GatewayError::Transport(
                "Timed out connecting to gateway".to_string(),
            ))
        });

        let (mut sink, mut source) = match dialed {
            Ok(halves) => halves,
            Err(e) => {
                self.record_failure(&e);
                return Err(e);
            }
        };

        if let Err(e) = authenticate(
            &mut sink,
            &mut source,
            &credential,
            self.config.connect_timeout(),
        )
        .await
        {
            warn!(error = %e, "Gateway handshake failed");
            let _ = sink.close().await;
            self.record_failure(&e);
            return Err(e);
        }

        let session = Session::start(
            sink,
            source,
            Arc::clone(&self.hub),
            Arc::clone(&self.state_tx),
            Arc::clone(&self.last_reason),
            self.config.request_timeout(),
            self.config.transfer_timeout(),
        );
        *session_slot = Some(Arc::new(session));
        let _ = self.state_tx.send(ConnectionState::Connected);

        info!(url = %self.config.gateway_url, "Gateway connected");
        Ok(())
    }

    /// Tear down the connection.
    ///
    /// Every outstanding call settles with `ConnectionClosed` and the
    /// registry is left empty. A no-op when already disconnected.
    pub async fn disconnect(&self) {
        let session = self.session.write().await.take();
        match session {
            Some(session) => {
                session.close().await;
                *self
                    .last_reason
                    .lock()
                    .expect("disconnect reason mutex poisoned") =
                    Some("Disconnected by client".to_string());
                let _ = self.state_tx.send(ConnectionState::Disconnected);
                info!("Gateway disconnected");
            }
            None => {
                debug!("Already disconnected, ignoring disconnect()");
            }
        }
    }

    /// Observable connection state for callers that gate calls.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn is_connected(&self) -> bool {
        *self.state_rx.borrow() == ConnectionState::Connected
    }

    /// Why the last connection ended, for display.
    pub fn last_disconnect_reason(&self) -> Option<String> {
        self.last_reason
            .lock()
            .expect("disconnect reason mutex poisoned")
            .clone()
    }

    /// The call primitive: send one operation, get a handle that settles
    /// exactly once. Fails immediately with `ConnectionNotEstablished`
    /// while disconnected, without touching the channel.
    pub async fn call(
        &self,
        operation: &str,
        request: OperationRequest,
    ) -> Result<CallHandle, GatewayError> {
        self.call_with_options(operation, request, CallOptions::default())
            .await
    }

    pub async fn call_with_options(
        &self,
        operation: &str,
        request: OperationRequest,
        options: CallOptions,
    ) -> Result<CallHandle, GatewayError> {
        let session = self.live_session().await?;
        session.call(operation, request, options).await
    }

    /// Register for change notifications on a resource path.
    ///
    /// Not a call: no correlation key, no timeout. The gateway-side
    /// registration is sent only for the first subscriber of a path.
    pub async fn subscribe_to_changes(
        &self,
        path: &str,
    ) -> Result<Subscription, GatewayError> {
        let session = self.live_session().await?;
        let (subscription, first) = self.hub.subscribe(path);
        if first {
            if let Err(e) = session
                .send_control(&ControlFrame::Subscribe {
                    path: path.to_string(),
                })
                .await
            {
                self.hub.unsubscribe(subscription);
                return Err(e);
            }
        }
        Ok(subscription)
    }

    /// Release a change-notification registration. The gateway-side
    /// registration is released when the last subscriber for the path
    /// goes away; this is best-effort while disconnected.
    pub async fn unsubscribe(&self, subscription: Subscription) -> Result<(), GatewayError> {
        let path = subscription.path().to_string();
        let last = self.hub.unsubscribe(subscription);
        if last {
            if let Ok(session) = self.live_session().await {
                session
                    .send_control(&ControlFrame::Unsubscribe { path })
                    .await?;
            }
        }
        Ok(())
    }

    async fn live_session(&self) -> Result<Arc<Session>, GatewayError> {
        let session = self.session.read().await;
        match session.as_ref() {
            Some(s) if s.is_live() => Ok(Arc::clone(s)),
            _ => Err(GatewayError::ConnectionNotEstablished),
        }
    }

    fn record_failure(&self, error: &GatewayError) {
        *self
            .last_reason
            .lock()
            .expect("disconnect reason mutex poisoned") = Some(error.to_string());
        let _ = self.state_tx.send(ConnectionState::Disconnected);
    }

    #[cfg(test)]
    pub(crate) async fn pending_count(&self) -> usize {
        let session = self.session.read().await;
        session.as_ref().map(|s| s.pending_count()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::{MemoryConnector, ServerEnd};
    use crate::protocol::{InboundFrame, Method};
    use tokio::sync::mpsc;

    fn memory_client() -> (Arc<GatewayClient>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (connector, server_rx) = MemoryConnector::new();
        let client =
            GatewayClient::with_connector(GatewayConfig::default(), Box::new(connector)).unwrap();
        (Arc::new(client), server_rx)
    }

    fn ready_frame() -> String {
        serde_json::to_string(&InboundFrame::Ready).unwrap()
    }

    /// Drive connect() and the gateway side of the handshake together.
    async fn establish(
        client: &Arc<GatewayClient>,
        server_rx: &mut mpsc::UnboundedReceiver<ServerEnd>,
    ) -> ServerEnd {
        let connect = tokio::spawn({
            let client = Arc::clone(client);
            async move { client.connect(Credential::bearer("test-token")).await }
        });

        let mut end = server_rx.recv().await.unwrap();
        let handshake = end.incoming.recv().await.unwrap();
        assert!(handshake.contains("\"type\":\"authenticate\""));
        end.outgoing.send(ready_frame()).unwrap();

        connect.await.unwrap().unwrap();
        end
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let (client, mut server_rx) = memory_client();
        let _end = establish(&client, &mut server_rx).await;
        assert!(client.is_connected());

        // Second connect: logged no-op, no second dial
        client
            .connect(Credential::bearer("another-token"))
            .await
            .unwrap();
        assert!(server_rx.try_recv().is_err());
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_handshake_rejection_leaves_client_disconnected() {
        let (client, mut server_rx) = memory_client();

        let connect = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.connect(Credential::bearer("expired")).await }
        });

        let mut end = server_rx.recv().await.unwrap();
        let _handshake = end.incoming.recv().await.unwrap();
        end.outgoing
            .send(
                serde_json::to_string(&InboundFrame::Error {
                    id: 0,
                    message: "Token expired".to_string(),
                })
                .unwrap(),
            )
            .unwrap();

        let result = connect.await.unwrap();
        assert!(matches!(result, Err(GatewayError::HandshakeRejected(_))));
        assert!(!client.is_connected());
        assert!(client
            .last_disconnect_reason()
            .unwrap()
            .contains("Token expired"));
    }

    #[tokio::test]
    async fn test_disconnect_settles_pending_and_empties_registry() {
        let (client, mut server_rx) = memory_client();
        let _end = establish(&client, &mut server_rx).await;

        let handle = client
            .call(
                "file.read",
                OperationRequest::new("/storage/files", Method::Get).with_param("path", "/a.txt"),
            )
            .await
            .unwrap();
        assert_eq!(client.pending_count().await, 1);

        client.disconnect().await;

        assert!(matches!(
            handle.result().await,
            Err(GatewayError::ConnectionClosed)
        ));
        assert_eq!(client.pending_count().await, 0);
        assert!(!client.is_connected());
        assert_eq!(
            client.last_disconnect_reason().as_deref(),
            Some("Disconnected by client")
        );
    }

    #[tokio::test]
    async fn test_gateway_close_marks_disconnected() {
        let (client, mut server_rx) = memory_client();
        let end = establish(&client, &mut server_rx).await;

        // Gateway drops the connection
        drop(end);

        let mut state = client.connection_state();
        while *state.borrow() != ConnectionState::Disconnected {
            state.changed().await.unwrap();
        }
        assert!(client.last_disconnect_reason().is_some());

        // Calls now fail fast without touching the channel
        let result = client
            .call(
                "file.read",
                OperationRequest::new("/storage/files", Method::Get),
            )
            .await;
        assert!(matches!(
            result,
            Err(GatewayError::ConnectionNotEstablished)
        ));
    }

    #[tokio::test]
    async fn test_call_while_never_connected() {
        let (client, _server_rx) = memory_client();
        let result = client
            .call(
                "file.read",
                OperationRequest::new("/storage/files", Method::Get),
            )
            .await;
        assert!(matches!(
            result,
            Err(GatewayError::ConnectionNotEstablished)
        ));
    }
}
