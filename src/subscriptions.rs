//! Change-notification subscriptions
//!
//! Subscriptions are not calls: they are open-ended registrations keyed
//! by resource path, with no correlation key and no timeout. The hub
//! fans inbound change frames out to every local subscriber for the
//! path; frames for paths nobody watches are dropped and logged.

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::protocol::ChangeKind;

/// Broadcast capacity per watched path. A slow subscriber that falls
/// further behind than this loses the oldest events (broadcast lag).
const CHANNEL_CAPACITY: usize = 256;

/// One change notification for a watched resource.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub path: String,
    pub event: ChangeKind,
    /// Entry metadata as reported by the gateway, when present
    pub entry: Option<Value>,
}

/// A live registration for one watched path.
///
/// Receive events via [`Subscription::recv`]. Dropping the subscription
/// only stops local delivery; use the client's `unsubscribe` to also
/// release the gateway-side registration.
pub struct Subscription {
    id: Uuid,
    path: String,
    receiver: broadcast::Receiver<ChangeEvent>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Next change event, or `None` when the hub entry is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(path = %self.path, skipped = skipped, "Subscriber lagged, events dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Fan-out registry for change notifications, keyed by path.
pub(crate) struct SubscriptionHub {
    channels: DashMap<String, broadcast::Sender<ChangeEvent>>,
}

impl SubscriptionHub {
    pub(crate) fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Register a local subscriber for a path.
    ///
    /// Returns the subscription and whether this is the first subscriber
    /// for the path (i.e. the gateway-side registration is still needed).
    pub(crate) fn subscribe(&self, path: &str) -> (Subscription, bool) {
        let mut first = false;
        let sender = self
            .channels
            .entry(path.to_string())
            .or_insert_with(|| {
                first = true;
                let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
                tx
            })
            .clone();

        let subscription = Subscription {
            id: Uuid::new_v4(),
            path: path.to_string(),
            receiver: sender.subscribe(),
        };
        debug!(path = %path, id = %subscription.id, first = first, "Subscribed to changes");
        (subscription, first)
    }

    /// Drop a local subscriber.
    ///
    /// Returns true when it was the last one for the path, meaning the
    /// gateway-side registration can be released.
    pub(crate) fn unsubscribe(&self, subscription: Subscription) -> bool {
        let Subscription { id, path, receiver } = subscription;
        drop(receiver);

        let last = match self.channels.get(&path) {
            // The just-dropped receiver no longer counts
            Some(sender) => sender.receiver_count() == 0,
            None => false,
        };
        if last {
            self.channels.remove(&path);
        }
        debug!(path = %path, id = %id, last = last, "Unsubscribed from changes");
        last
    }

    /// Fan one inbound change event out to the path's subscribers.
    pub(crate) fn publish(&self, event: ChangeEvent) {
        match self.channels.get(&event.path) {
            Some(sender) => {
                // Err means every receiver vanished without unsubscribing
                let _ = sender.send(event);
            }
            None => {
                debug!(path = %event.path, "Dropping change event with no subscribers");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn watched_paths(&self) -> usize {
        self.channels.len()
    }
}
