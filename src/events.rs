//! Session-local publish/subscribe bus
//!
//! Every component of a room session emits and listens through one
//! [`EventBus`] instance owned by the facade. Delivery is synchronous: `emit`
//! calls each handler in registration order before returning, so handlers
//! that need to do async work spawn a task.

use crate::stream::Stream;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Why the signaling channel closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelCloseReason {
    /// The peer session closed, taking the channel with it.
    PeerClosed,
    /// The room or client no longer exists.
    NotFound,
    /// Transient; a new push connection is being opened.
    Reconnect,
    /// Reconnect window exhausted.
    Timeout,
}

impl ChannelCloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelCloseReason::PeerClosed => "peerClosed",
            ChannelCloseReason::NotFound => "notfound",
            ChannelCloseReason::Reconnect => "reconnect",
            ChannelCloseReason::Timeout => "timeout",
        }
    }

    /// Terminal reasons end the session; the caller must reconnect.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelCloseReason::NotFound | ChannelCloseReason::Timeout)
    }
}

impl fmt::Display for ChannelCloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    PeerOpened { room_id: String, client_id: String },
    PeerClosed,
    /// ICE reached `connected` or `completed`.
    PeerConnected,
    /// ICE left the connected states.
    PeerDisconnected,
    IceConnectionStateChanged(crate::webrtc::IceConnectionState),
    /// The server-created internal data channel is open.
    InternalChannelAvailable,
    ChannelOpened,
    ChannelClosed { reason: ChannelCloseReason },
    StreamAvailable { stream: Stream },
    StreamRemoved { stream: Stream },
    MetadataChanged { key: String, data: Value },
}

impl Event {
    /// Stable wire-style name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Event::PeerOpened { .. } => "peer-opened",
            Event::PeerClosed => "peer-closed",
            Event::PeerConnected => "peer-connected",
            Event::PeerDisconnected => "peer-disconnected",
            Event::IceConnectionStateChanged(_) => "ice-connection-state-changed",
            Event::InternalChannelAvailable => "internal-channel-available",
            Event::ChannelOpened => "channel-opened",
            Event::ChannelClosed { .. } => "channel-closed",
            Event::StreamAvailable { .. } => "stream-available",
            Event::StreamRemoved { .. } => "stream-removed",
            Event::MetadataChanged { .. } => "metadata-changed",
        }
    }
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(SubscriptionId, Handler)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().push((id, Arc::new(handler)));
        id
    }

    /// Returns false when `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    pub fn emit(&self, event: Event) {
        log::debug!("event: {}", event.name());
        // Snapshot so handlers may subscribe, unsubscribe or emit re-entrantly.
        let handlers: Vec<Handler> = self
            .handlers
            .lock()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(&event);
        }
    }

    /// Forward every event into an unbounded channel.
    ///
    /// The subscription is dropped automatically once the receiver is gone
    /// and the next event is emitted.
    pub fn channel(self: &Arc<Self>) -> (SubscriptionId, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let weak = Arc::downgrade(self);
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let handler_slot = slot.clone();
        let id = self.subscribe(move |event| {
            if tx.send(event.clone()).is_err() {
                if let (Some(bus), Some(id)) = (weak.upgrade(), *handler_slot.lock()) {
                    bus.unsubscribe(id);
                }
            }
        });
        *slot.lock() = Some(id);
        (id, rx)
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.lock().len()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
