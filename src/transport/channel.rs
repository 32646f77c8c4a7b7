//! Signaling channel
//!
//! Keeps one push connection open per room membership, translates pushed
//! events into peer-session actions and recovers from transport errors.
//!
//! Recovery after an error:
//! 1. more than `reconnect_timeout` since the error: give up with `timeout`
//! 2. offline: wait `offline_retry` and re-check
//! 3. client status 404: give up with `notfound`
//! 4. otherwise reconnect, after `reconnect_debounce` when the error came
//!    within that long of the connection start

use super::{Connectivity, PushMessage, PushSource};
use crate::api::{ControlPlane, TrackSource, TrackSubscription};
use crate::config::SignalingConfig;
use crate::error::{Error, Result};
use crate::events::{ChannelCloseReason, Event, EventBus, SubscriptionId};
use crate::stream::{DraftStream, StreamOrigin, StreamSource};
use crate::webrtc::signaling::TrackAnnouncement;
use crate::webrtc::{PeerSession, PushEvent, SessionDescription};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Default)]
struct ChannelState {
    epoch: u64,
    room_id: Option<String>,
    client_id: Option<String>,
    connected_at: Option<Instant>,
    task: Option<JoinHandle<()>>,
}

/// Room and client of the current connection
#[derive(Clone)]
struct Membership {
    epoch: u64,
    room_id: String,
    client_id: String,
    connected_at: Instant,
}

pub struct SignalingChannel {
    weak: Weak<SignalingChannel>,
    session: Arc<PeerSession>,
    api: Arc<dyn ControlPlane>,
    source: Arc<dyn PushSource>,
    connectivity: Arc<dyn Connectivity>,
    bus: Arc<EventBus>,
    config: SignalingConfig,
    state: Mutex<ChannelState>,
    reconnecting: AtomicBool,
}

impl SignalingChannel {
    pub fn new(
        session: Arc<PeerSession>,
        api: Arc<dyn ControlPlane>,
        source: Arc<dyn PushSource>,
        connectivity: Arc<dyn Connectivity>,
        config: &SignalingConfig,
    ) -> Arc<Self> {
        let bus = session.bus();
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            session,
            api,
            source,
            connectivity,
            bus,
            config: config.clone(),
            state: Mutex::new(ChannelState::default()),
            reconnecting: AtomicBool::new(false),
        })
    }

    /// Follow the peer session: connect on `peer-opened`, disconnect on
    /// `peer-closed`.
    pub fn bind(&self) -> SubscriptionId {
        let weak = self.weak.clone();
        self.bus.subscribe(move |event| {
            let Some(channel) = weak.upgrade() else {
                return;
            };
            match event {
                Event::PeerOpened { room_id, client_id } => {
                    if let Err(e) = channel.connect(room_id, client_id) {
                        warn!("Failed to open signaling channel: {}", e);
                    }
                }
                Event::PeerClosed => {
                    if channel.disconnect() {
                        channel.bus.emit(Event::ChannelClosed {
                            reason: ChannelCloseReason::PeerClosed,
                        });
                    }
                }
                _ => {}
            }
        })
    }

    /// Open the push connection in the background. A no-op while connected.
    pub fn connect(&self, room_id: &str, client_id: &str) -> Result<()> {
        if room_id.is_empty() || client_id.is_empty() {
            return Err(Error::InvalidInput(
                "room id and client id must be non-empty".to_string(),
            ));
        }
        let mut state = self.state.lock();
        if state.room_id.is_some() {
            return Ok(());
        }
        state.room_id = Some(room_id.to_string());
        state.client_id = Some(client_id.to_string());
        self.start(&mut state);
        info!("Signaling channel connecting: room={} client={}", room_id, client_id);
        Ok(())
    }

    /// Close the push connection. Returns `false` if it was not connected.
    pub fn disconnect(&self) -> bool {
        match self.teardown() {
            Some(task) => {
                if let Some(task) = task {
                    task.abort();
                }
                info!("Signaling channel disconnected");
                true
            }
            None => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().room_id.is_some()
    }

    /// Reopen the push connection unless a reconnect is already running.
    pub fn reconnect(&self) {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            debug!("Reconnect already in progress");
            return;
        }
        if self.is_connected() {
            self.bus.emit(Event::ChannelClosed {
                reason: ChannelCloseReason::Reconnect,
            });
            let mut state = self.state.lock();
            if state.room_id.is_some() {
                // The running task finishes on its own once its epoch is stale.
                drop(state.task.take());
                self.start(&mut state);
            }
        }
        self.reconnecting.store(false, Ordering::SeqCst);
    }

    fn start(&self, state: &mut ChannelState) {
        state.epoch += 1;
        state.connected_at = Some(Instant::now());
        state.task = Some(tokio::spawn(Self::run(self.weak.clone(), state.epoch)));
    }

    /// Clear the connection state. `None` when not connected, otherwise the
    /// run task that was serving it.
    fn teardown(&self) -> Option<Option<JoinHandle<()>>> {
        let mut state = self.state.lock();
        state.room_id.as_ref()?;
        state.epoch += 1;
        state.room_id = None;
        state.client_id = None;
        state.connected_at = None;
        Some(state.task.take())
    }

    fn membership(&self, epoch: u64) -> Option<Membership> {
        let state = self.state.lock();
        if state.epoch != epoch {
            return None;
        }
        Some(Membership {
            epoch,
            room_id: state.room_id.clone()?,
            client_id: state.client_id.clone()?,
            connected_at: state.connected_at?,
        })
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.membership(epoch).is_some()
    }

    async fn run(weak: Weak<SignalingChannel>, epoch: u64) {
        let Some(membership) = weak.upgrade().and_then(|c| c.membership(epoch)) else {
            return;
        };

        let error = {
            let Some(channel) = weak.upgrade() else {
                return;
            };
            let opened = channel
                .source
                .open(&membership.room_id, &membership.client_id)
                .await;
            match opened {
                Ok(mut subscription) => {
                    if !channel.is_current(epoch) {
                        return;
                    }
                    debug!("Signaling channel open");
                    channel.bus.emit(Event::ChannelOpened);
                    drop(channel);

                    loop {
                        let next = subscription.next().await;
                        let Some(channel) = weak.upgrade() else {
                            return;
                        };
                        if !channel.is_current(epoch) {
                            return;
                        }
                        match next {
                            Some(Ok(message)) => channel.handle_message(&membership, message).await,
                            Some(Err(e)) => break e,
                            None => break Error::Signaling("push stream ended".to_string()),
                        }
                    }
                }
                Err(e) => e,
            }
        };

        if let Some(channel) = weak.upgrade() {
            warn!("Signaling channel error: {}", error);
            channel.recover(epoch, Instant::now()).await;
        }
    }

    /// Apply the recovery policy for an error that happened at `error_at`.
    async fn recover(&self, epoch: u64, error_at: Instant) {
        loop {
            let Some(membership) = self.membership(epoch) else {
                return;
            };

            if error_at.elapsed() > self.config.reconnect_timeout() {
                self.close(ChannelCloseReason::Timeout);
                return;
            }

            if !self.connectivity.is_online() {
                debug!("Offline, re-checking in {:?}", self.config.offline_retry());
                tokio::time::sleep(self.config.offline_retry()).await;
                continue;
            }

            match self
                .api
                .get_client(&membership.room_id, &membership.client_id)
                .await
            {
                Err(e) if e.is_not_found() => {
                    if self.is_current(epoch) {
                        self.close(ChannelCloseReason::NotFound);
                    }
                    return;
                }
                Err(e) => debug!("Client status check failed: {}", e),
                Ok(_) => {}
            }

            if !self.is_current(epoch) {
                return;
            }
            let debounce = self.config.reconnect_debounce();
            if error_at.saturating_duration_since(membership.connected_at) < debounce {
                debug!("Error right after connecting, reconnecting in {:?}", debounce);
                tokio::time::sleep(debounce).await;
                if !self.is_current(epoch) {
                    return;
                }
            }
            self.reconnect();
            return;
        }
    }

    /// Terminal close.
    fn close(&self, reason: ChannelCloseReason) {
        // Called from the run task itself; dropping the handle detaches it.
        if self.teardown().is_some() {
            info!("Signaling channel closed: {}", reason);
            self.bus.emit(Event::ChannelClosed { reason });
        }
    }

    async fn handle_message(&self, membership: &Membership, message: PushMessage) {
        match PushEvent::parse(&message.event, &message.data) {
            Ok(Some(event)) => self.handle_push(membership, event).await,
            Ok(None) => debug!("Ignoring unknown push event {}", message.event),
            Err(e) => warn!("Malformed {} push: {}", message.event, e),
        }
    }

    /// Candidates and offers are handled in arrival order; the rest run
    /// in the background.
    async fn handle_push(&self, membership: &Membership, event: PushEvent) {
        debug!("Push event: {}", event.name());
        match event {
            PushEvent::Candidate(candidate) => {
                if let Err(e) = self.session.add_ice_candidate(candidate).await {
                    warn!("Failed to add remote ICE candidate: {}", e);
                }
            }
            PushEvent::Offer(offer) => self.answer(membership, offer).await,
            PushEvent::TracksAdded(tracks) => {
                let Some(channel) = self.weak.upgrade() else {
                    return;
                };
                let membership = membership.clone();
                tokio::spawn(async move { channel.label_local_tracks(&membership, tracks).await });
            }
            PushEvent::TracksAvailable(tracks) => {
                let Some(channel) = self.weak.upgrade() else {
                    return;
                };
                let membership = membership.clone();
                tokio::spawn(async move { channel.subscribe_remote_tracks(&membership, tracks).await });
            }
            PushEvent::MetaChanged { key, data } => {
                self.bus.emit(Event::MetadataChanged { key, data });
            }
            PushEvent::AllowedRenegotiation => {
                let session = self.session.clone();
                tokio::spawn(async move { session.negotiate().await });
            }
        }
    }

    async fn answer(&self, membership: &Membership, offer: SessionDescription) {
        let local = match self.session.answer_offer(offer).await {
            Ok(Some(local)) => local,
            Ok(None) => return,
            Err(e) => {
                warn!("Failed to answer server offer: {}", e);
                return;
            }
        };
        if !self.is_current(membership.epoch) {
            return;
        }
        if let Err(e) = self
            .api
            .negotiate_connection(&membership.room_id, &membership.client_id, &local)
            .await
        {
            warn!("Failed to send answer: {}", e);
        }
    }

    async fn label_local_tracks(&self, membership: &Membership, tracks: Vec<TrackAnnouncement>) {
        let sources: Vec<TrackSource> = tracks
            .into_iter()
            .filter_map(|track| {
                let stream = self.session.get_stream(&track.stream_id)?;
                Some(TrackSource {
                    track_id: track.track_id,
                    source: stream.source.as_str().to_string(),
                })
            })
            .collect();
        if sources.is_empty() {
            return;
        }
        if let Err(e) = self
            .api
            .set_track_sources(&membership.room_id, &membership.client_id, sources)
            .await
        {
            warn!("Failed to set track sources: {}", e);
        }
    }

    async fn subscribe_remote_tracks(&self, membership: &Membership, tracks: Vec<TrackAnnouncement>) {
        if tracks.is_empty() {
            return;
        }
        let subscriptions = tracks
            .iter()
            .map(|track| TrackSubscription {
                client_id: track.client_id.clone(),
                stream_id: track.stream_id.clone(),
                track_id: track.track_id.clone(),
            })
            .collect();
        if let Err(e) = self
            .api
            .subscribe_tracks(&membership.room_id, &membership.client_id, subscriptions)
            .await
        {
            warn!("Failed to subscribe to remote tracks: {}", e);
            return;
        }
        if !self.is_current(membership.epoch) {
            return;
        }

        for track in tracks {
            let partial = DraftStream {
                client_id: Some(track.client_id.clone()),
                name: Some(track.client_name.clone().unwrap_or_default()),
                origin: Some(StreamOrigin::Remote),
                source: Some(track.stream_source().unwrap_or(StreamSource::Media)),
                media: None,
            };
            if let Err(e) = self.session.merge_draft(&track.stream_id, partial) {
                warn!("Failed to record remote stream {}: {}", track.stream_id, e);
            }
        }
    }

    #[cfg(test)]
    fn current_epoch(&self) -> Option<u64> {
        let epoch = self.state.lock().epoch;
        self.membership(epoch).map(|m| m.epoch)
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        if let Some(task) = self.state.get_mut().task.take() {
            task.abort();
        }
    }
}
