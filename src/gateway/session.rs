//! An authenticated, ready-to-use gateway session
//!
//! A `Session` can only be created by the client after the channel is
//! connected and the handshake has been acknowledged. If you have a
//! `Session`, you can make calls.
//!
//! # Call lifecycle
//!
//! Every invocation gets its own correlation key from a monotonic
//! counter — never the operation name, so concurrent calls to the same
//! operation cannot be misattributed. The pending entry is registered
//! *before* the outbound frame is sent and removed exactly once, by
//! whichever of {terminal success, terminal error, timeout,
//! cancellation, connection close} fires first. Settlement is
//! idempotent: late or duplicate frames for a settled key are dropped
//! and logged, never surfaced.
//!
//! A single receiver task per session is the only demux point. Callers
//! suspend on their own reply channel; nothing blocks the dispatcher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, error, info, warn};

use super::client::ConnectionState;
use super::transport::{MessageSink, MessageSource};
use crate::error::GatewayError;
use crate::progress::ProgressEvent;
use crate::protocol::{encode_call, encode_control, CallEnvelope, ControlFrame, InboundFrame, OperationRequest};
use crate::subscriptions::{ChangeEvent, SubscriptionHub};

/// Operation class, used to pick the default timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationClass {
    /// Small, quick operations: metadata, create/delete/rename
    Control,
    /// Potentially large payload transfers: read/write
    Transfer,
}

/// Per-call options.
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub class: OperationClass,
    /// Explicit timeout; `None` uses the class default from the config
    pub timeout: Option<Duration>,
    /// Whether to open a progress stream for this call
    pub progress: bool,
}

impl CallOptions {
    pub fn control() -> Self {
        Self {
            class: OperationClass::Control,
            timeout: None,
            progress: false,
        }
    }

    pub fn transfer() -> Self {
        Self {
            class: OperationClass::Transfer,
            timeout: None,
            progress: true,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Default for CallOptions {
    fn default() -> Self {
        Self::control()
    }
}

type CallOutcome = Result<Value, GatewayError>;

/// One outstanding call.
struct PendingCall {
    operation: String,
    created_at: Instant,
    reply: oneshot::Sender<CallOutcome>,
    progress: Option<mpsc::UnboundedSender<ProgressEvent>>,
    timer: tokio::task::JoinHandle<()>,
}

/// In-flight call registry, keyed by correlation key.
///
/// Lock discipline: plain mutex, short critical sections, never held
/// across an await. Settlement must also work from a synchronous `Drop`
/// (cancel-on-drop), which rules out an async lock here.
pub(crate) struct Registry {
    entries: StdMutex<HashMap<u64, PendingCall>>,
}

impl Registry {
    fn new() -> Self {
        Self {
            entries: StdMutex::new(HashMap::new()),
        }
    }

    fn insert(&self, id: u64, call: PendingCall) {
        self.entries
            .lock()
            .expect("call registry mutex poisoned")
            .insert(id, call);
    }

    /// Settle the call, removing its entry and stopping its timer.
    ///
    /// Returns false when the key is unknown or already settled; the
    /// caller drops the event in that case.
    fn settle(&self, id: u64, outcome: CallOutcome) -> bool {
        let entry = self
            .entries
            .lock()
            .expect("call registry mutex poisoned")
            .remove(&id);
        match entry {
            Some(call) => {
                call.timer.abort();
                let _ = call.reply.send(outcome);
                // Dropping `call.progress` here ends the progress stream,
                // so no listener outlives its call.
                true
            }
            None => false,
        }
    }

    /// Forward a progress event to the call's stream without settling it.
    fn forward_progress(&self, id: u64, event: ProgressEvent) -> bool {
        let entries = self.entries.lock().expect("call registry mutex poisoned");
        match entries.get(&id).and_then(|call| call.progress.as_ref()) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Settle every outstanding call with `ConnectionClosed`.
    fn close_all(&self) -> usize {
        let drained: Vec<(u64, PendingCall)> = self
            .entries
            .lock()
            .expect("call registry mutex poisoned")
            .drain()
            .collect();
        let count = drained.len();
        for (id, call) in drained {
            call.timer.abort();
            debug!(
                id = id,
                operation = %call.operation,
                in_flight = ?call.created_at.elapsed(),
                "Settling pending call on close"
            );
            let _ = call.reply.send(Err(GatewayError::ConnectionClosed));
        }
        count
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("call registry mutex poisoned")
            .len()
    }
}

/// Handle to one in-flight call: the terminal future, the progress
/// stream, and cancellation, unified. Dropping an unsettled handle
/// cancels the call.
pub struct CallHandle {
    id: u64,
    operation: String,
    registry: Arc<Registry>,
    reply: Option<oneshot::Receiver<CallOutcome>>,
    progress: Option<mpsc::UnboundedReceiver<ProgressEvent>>,
}

impl CallHandle {
    /// The per-invocation correlation key.
    pub fn correlation_key(&self) -> u64 {
        self.id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Cancel the call. A no-op if it already settled.
    pub fn cancel(&self) {
        if self.registry.settle(self.id, Err(GatewayError::Cancelled)) {
            debug!(id = self.id, operation = %self.operation, "Call cancelled");
        }
    }

    /// Next progress event, or `None` once the call has settled
    /// (or when the call was made without a progress stream).
    pub async fn progress(&mut self) -> Option<ProgressEvent> {
        match self.progress.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Detach the progress stream for independent consumption.
    pub fn take_progress(&mut self) -> Option<mpsc::UnboundedReceiver<ProgressEvent>> {
        self.progress.take()
    }

    /// Await the terminal settlement.
    pub async fn result(mut self) -> CallOutcome {
        match self.reply.take() {
            Some(rx) => match rx.await {
                Ok(outcome) => outcome,
                // The registry always sends before dropping the sender, so
                // this only fires if the session vanished entirely.
                Err(_) => Err(GatewayError::ConnectionClosed),
            },
            None => Err(GatewayError::Cancelled),
        }
    }
}

impl Drop for CallHandle {
    fn drop(&mut self) {
        // Idempotent: a no-op when the call already settled.
        if self.registry.settle(self.id, Err(GatewayError::Cancelled)) {
            debug!(id = self.id, operation = %self.operation, "Call cancelled on drop");
        }
    }
}

/// An authenticated session over a connected channel.
pub(crate) struct Session {
    sink: Mutex<Box<dyn MessageSink>>,
    next_id: AtomicU64,
    registry: Arc<Registry>,
    recv_task: tokio::task::JoinHandle<()>,
    request_timeout: Duration,
    transfer_timeout: Duration,
}

impl Session {
    /// Take ownership of a connected, authenticated channel and start
    /// the inbound dispatcher.
    pub(crate) fn start(
        sink: Box<dyn MessageSink>,
        source: Box<dyn MessageSource>,
        hub: Arc<SubscriptionHub>,
        state_tx: Arc<watch::Sender<ConnectionState>>,
        last_reason: Arc<StdMutex<Option<String>>>,
        request_timeout: Duration,
        transfer_timeout: Duration,
    ) -> Self {
        let registry = Arc::new(Registry::new());

        let registry_for_recv = Arc::clone(&registry);
        let recv_task = tokio::spawn(async move {
            dispatch_loop(source, registry_for_recv, hub, state_tx, last_reason).await;
        });

        Self {
            sink: Mutex::new(sink),
            next_id: AtomicU64::new(1),
            registry,
            recv_task,
            request_timeout,
            transfer_timeout,
        }
    }

    /// Whether the dispatcher is still running. Once it exits, the
    /// connection is gone and every pending call has been settled.
    pub(crate) fn is_live(&self) -> bool {
        !self.recv_task.is_finished()
    }

    /// Send one operation and return the handle for its outcome.
    pub(crate) async fn call(
        &self,
        operation: &str,
        request: OperationRequest,
        options: CallOptions,
    ) -> Result<CallHandle, GatewayError> {
        if !self.is_live() {
            return Err(GatewayError::ConnectionNotEstablished);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        // Encode before registering so a serialization failure leaves
        // no trace in the registry.
        let frame = encode_call(&CallEnvelope {
            id,
            operation: operation.to_string(),
            request,
        })?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let (progress_tx, progress_rx) = if options.progress {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let timeout = options.timeout.unwrap_or(match options.class {
            OperationClass::Control => self.request_timeout,
            OperationClass::Transfer => self.transfer_timeout,
        });

        // The timer owns no state: it just tries to settle, and loses
        // the race if a terminal frame got there first.
        let registry_for_timer = Arc::clone(&self.registry);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if registry_for_timer.settle(id, Err(GatewayError::Timeout)) {
                debug!(id = id, "Call timed out");
            }
        });

        // Register before sending: a fast response must always find
        // its entry.
        self.registry.insert(
            id,
            PendingCall {
                operation: operation.to_string(),
                created_at: Instant::now(),
                reply: reply_tx,
                progress: progress_tx,
                timer,
            },
        );

        {
            let mut sink = self.sink.lock().await;
            if let Err(e) = sink.send(frame).await {
                self.registry
                    .settle(id, Err(GatewayError::Transport(format!("Send failed: {}", e))));
                return Err(e);
            }
        }

        debug!(id = id, operation = %operation, "Call dispatched");

        Ok(CallHandle {
            id,
            operation: operation.to_string(),
            registry: Arc::clone(&self.registry),
            reply: Some(reply_rx),
            progress: progress_rx,
        })
    }

    /// Send a non-correlated control frame (subscribe/unsubscribe).
    pub(crate) async fn send_control(&self, frame: &ControlFrame) -> Result<(), GatewayError> {
        if !self.is_live() {
            return Err(GatewayError::ConnectionNotEstablished);
        }
        let encoded = encode_control(frame)?;
        self.sink.lock().await.send(encoded).await
    }

    /// Tear the session down: stop the dispatcher, close the channel,
    /// and settle every outstanding call with `ConnectionClosed`.
    pub(crate) async fn close(&self) {
        self.recv_task.abort();
        if let Err(e) = self.sink.lock().await.close().await {
            debug!(error = %e, "Channel close failed");
        }
        let settled = self.registry.close_all();
        if settled > 0 {
            info!(settled = settled, "Settled pending calls on disconnect");
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.registry.len()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.recv_task.abort();
        self.registry.close_all();
    }
}

/// Receiver loop: the single demux point for one session.
///
/// Routes every inbound frame by correlation key, then drains the
/// registry with `ConnectionClosed` when the channel ends.
async fn dispatch_loop(
    mut source: Box<dyn MessageSource>,
    registry: Arc<Registry>,
    hub: Arc<SubscriptionHub>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    last_reason: Arc<StdMutex<Option<String>>>,
) {
    debug!("Dispatcher started");

    let mut reason = "Connection closed by gateway".to_string();

    while let Some(msg) = source.next().await {
        match msg {
            Ok(text) => match serde_json::from_str::<InboundFrame>(&text) {
                Ok(InboundFrame::Result { id, payload }) => {
                    if !registry.settle(id, Ok(payload)) {
                        debug!(id = id, "Dropping terminal frame for unknown or settled call");
                    }
                }
                Ok(InboundFrame::Error { id, message }) => {
                    if !registry.settle(id, Err(GatewayError::Remote(message))) {
                        debug!(id = id, "Dropping error frame for unknown or settled call");
                    }
                }
                Ok(InboundFrame::Progress {
                    id,
                    loaded,
                    total,
                    percent,
                    direction,
                }) => {
                    let event = ProgressEvent {
                        loaded,
                        total,
                        percent,
                        direction,
                    };
                    if !registry.forward_progress(id, event) {
                        debug!(id = id, "Dropping progress frame with no listener");
                    }
                }
                Ok(InboundFrame::Change { path, event, entry }) => {
                    hub.publish(ChangeEvent { path, event, entry });
                }
                Ok(InboundFrame::Ready) => {
                    debug!("Ignoring ready frame outside handshake");
                }
                Err(e) => {
                    warn!(error = %e, "Failed to decode inbound frame");
                }
            },
            Err(e) => {
                error!(error = %e, "Channel error");
                reason = e.to_string();
                break;
            }
        }
    }

    let settled = registry.close_all();
    if settled > 0 {
        info!(settled = settled, "Settled pending calls on connection loss");
    }

    *last_reason.lock().expect("disconnect reason mutex poisoned") = Some(reason);
    let _ = state_tx.send(ConnectionState::Disconnected);

    debug!("Dispatcher ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::Direction;
    use serde_json::json;

    fn pending(reply: oneshot::Sender<CallOutcome>) -> PendingCall {
        PendingCall {
            operation: "file.read".to_string(),
            created_at: Instant::now(),
            reply,
            progress: None,
            timer: tokio::spawn(async {}),
        }
    }

    #[tokio::test]
    async fn test_settle_removes_entry_exactly_once() {
        let registry = Registry::new();
        let (tx, rx) = oneshot::channel();
        registry.insert(1, pending(tx));

        assert!(registry.settle(1, Ok(json!("done"))));
        assert_eq!(registry.len(), 0);
        assert_eq!(rx.await.unwrap().unwrap(), json!("done"));

        // Second settlement for the same key is a no-op
        assert!(!registry.settle(1, Err(GatewayError::Timeout)));
    }

    #[tokio::test]
    async fn test_settle_unknown_key_is_noop() {
        let registry = Registry::new();
        assert!(!registry.settle(42, Ok(json!(null))));
    }

    #[tokio::test]
    async fn test_forward_progress_without_settling() {
        let registry = Registry::new();
        let (reply_tx, _reply_rx) = oneshot::channel();
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        registry.insert(
            5,
            PendingCall {
                operation: "file.write".to_string(),
                created_at: Instant::now(),
                reply: reply_tx,
                progress: Some(progress_tx),
                timer: tokio::spawn(async {}),
            },
        );

        let event = ProgressEvent {
            loaded: 10,
            total: Some(100),
            percent: None,
            direction: Direction::Upload,
        };
        assert!(registry.forward_progress(5, event.clone()));
        assert_eq!(registry.len(), 1);
        assert_eq!(progress_rx.recv().await.unwrap(), event);

        // After settlement the stream ends and further forwards are dropped
        assert!(registry.settle(5, Ok(json!(null))));
        assert!(!registry.forward_progress(5, event));
        assert!(progress_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_all_settles_everything() {
        let registry = Registry::new();
        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();
        registry.insert(1, pending(tx_a));
        registry.insert(2, pending(tx_b));

        assert_eq!(registry.close_all(), 2);
        assert_eq!(registry.len(), 0);
        assert!(matches!(
            rx_a.await.unwrap(),
            Err(GatewayError::ConnectionClosed)
        ));
        assert!(matches!(
            rx_b.await.unwrap(),
            Err(GatewayError::ConnectionClosed)
        ));
    }
}
