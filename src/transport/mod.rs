//! Transport layer for the room push channel
//!
//! Handles the server-sent-events stream that delivers signaling pushes and
//! the channel state machine that keeps it alive.

pub mod channel;
pub mod event_source;

pub use channel::SignalingChannel;
pub use event_source::{SseDecoder, SseEventSource};

use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One named push event with its raw payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    pub event: String,
    pub data: String,
}

impl PushMessage {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }
}

/// An open push connection
///
/// Yields messages until the connection fails; an `Err` item or the end of
/// the stream both mean the connection is gone. Dropping the subscription
/// closes it.
pub struct PushSubscription {
    rx: mpsc::UnboundedReceiver<Result<PushMessage>>,
    task: Option<JoinHandle<()>>,
}

impl PushSubscription {
    pub fn new(rx: mpsc::UnboundedReceiver<Result<PushMessage>>, task: Option<JoinHandle<()>>) -> Self {
        Self { rx, task }
    }

    pub async fn next(&mut self) -> Option<Result<PushMessage>> {
        self.rx.recv().await
    }
}

impl Drop for PushSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Opens per-client push connections
#[async_trait]
pub trait PushSource: Send + Sync {
    async fn open(&self, room_id: &str, client_id: &str) -> Result<PushSubscription>;
}

/// Network reachability probe consulted before reconnecting
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Assumes the network is always reachable
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}
