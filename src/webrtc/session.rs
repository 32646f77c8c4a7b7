//! Peer session
//!
//! Owns one peer connection per room membership and the local view of every
//! stream flowing over it:
//! - connect / disconnect with a connection epoch so that completions from
//!   a torn-down connection never touch a fresh one
//! - offer/answer negotiation gated by the server's permission check and
//!   serialised by a negotiation mutex
//! - FIFO buffering of remote ICE candidates until a remote description exists
//! - local media attachment (codec order, simulcast/SVC encodings)
//! - remote track bookkeeping through draft streams
//! - the internal data channel and the video-size observer behind it

use super::data_channel::{VideoObservation, VideoObserver};
use super::encoding::{audio_encoding, order_codecs, select_video_encoding};
use super::{
    CodecCapability, DataChannel, IceCandidate, IceConnectionState, PeerConnection,
    PeerConnectionEvent, PeerConnectionFactory, SdpType, SessionDescription, TransceiverInit,
};
use crate::api::ControlPlane;
use crate::config::{build_ice_servers, Bitrates, Config, MediaConfig, WebRTCConfig};
use crate::error::{Error, Result};
use crate::events::{Event, EventBus, SubscriptionId};
use crate::media::{MediaStream, MediaTrack, TrackKind};
use crate::stream::{
    DraftStream, Stream, StreamDescriptor, StreamOrigin, StreamRegistry, StreamSource,
};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

/// Result of one negotiation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationOutcome {
    /// Offer sent and answer applied
    Completed,
    /// The server refused; retried once it pushes `allowed_renegotiation`
    Deferred,
    /// Not connected, or the connection changed mid-flight
    Skipped,
}

#[derive(Default)]
struct PeerState {
    epoch: u64,
    connecting: bool,
    room_id: Option<String>,
    client_id: Option<String>,
    connection: Option<Arc<dyn PeerConnection>>,
    pending_negotiation: bool,
    ice_connected: bool,
    internal_channel: Option<Arc<dyn DataChannel>>,
    observer: Option<Arc<VideoObserver>>,
    pending_observations: Vec<VideoObservation>,
    /// Codec orders the connection could not apply, by transceiver id
    codec_preferences: HashMap<String, Vec<CodecCapability>>,
    event_task: Option<JoinHandle<()>>,
    bitrates: Bitrates,
}

/// Snapshot of a live connection
struct Active {
    epoch: u64,
    connection: Arc<dyn PeerConnection>,
    room_id: String,
    client_id: String,
}

pub struct PeerSession {
    weak: Weak<PeerSession>,
    webrtc: WebRTCConfig,
    media: MediaConfig,
    factory: Arc<dyn PeerConnectionFactory>,
    api: Arc<dyn ControlPlane>,
    bus: Arc<EventBus>,
    state: Mutex<PeerState>,
    registry: Mutex<StreamRegistry>,
    candidates: AsyncMutex<VecDeque<IceCandidate>>,
    negotiation: AsyncMutex<()>,
}

impl PeerSession {
    pub fn new(
        config: &Config,
        factory: Arc<dyn PeerConnectionFactory>,
        api: Arc<dyn ControlPlane>,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            webrtc: config.webrtc.clone(),
            media: config.media.clone(),
            factory,
            api,
            bus,
            state: Mutex::new(PeerState {
                bitrates: config.media.bitrates,
                ..Default::default()
            }),
            registry: Mutex::new(StreamRegistry::new()),
            candidates: AsyncMutex::new(VecDeque::new()),
            negotiation: AsyncMutex::new(()),
        })
    }

    /// Renegotiate whenever a local stream appears or goes away.
    pub fn bind(&self) -> SubscriptionId {
        let weak = self.weak.clone();
        self.bus.subscribe(move |event| {
            let stream = match event {
                Event::StreamAvailable { stream } | Event::StreamRemoved { stream } => stream,
                _ => return,
            };
            if !stream.is_local() {
                return;
            }
            if let Some(session) = weak.upgrade() {
                tokio::spawn(async move { session.negotiate().await });
            }
        })
    }

    /// Open the peer connection. A no-op while connected or connecting.
    pub async fn connect(&self, room_id: &str, client_id: &str) -> Result<()> {
        if room_id.is_empty() || client_id.is_empty() {
            return Err(Error::InvalidInput(
                "room id and client id must be non-empty".to_string(),
            ));
        }

        let epoch = {
            let mut state = self.state.lock();
            if state.connection.is_some() || state.connecting {
                debug!("connect ignored: peer session already active");
                return Ok(());
            }
            state.connecting = true;
            state.epoch += 1;
            state.epoch
        };

        let created = self.factory.create(build_ice_servers(&self.webrtc)).await;
        let (connection, events) = match created {
            Ok(pair) => pair,
            Err(e) => {
                let mut state = self.state.lock();
                if state.epoch == epoch {
                    state.connecting = false;
                }
                return Err(e);
            }
        };

        let abandoned = {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                Some(connection)
            } else {
                state.connecting = false;
                state.room_id = Some(room_id.to_string());
                state.client_id = Some(client_id.to_string());
                state.connection = Some(connection);
                state.pending_negotiation = false;
                state.ice_connected = false;
                state.event_task = Some(tokio::spawn(Self::run_events(
                    self.weak.clone(),
                    epoch,
                    events,
                )));
                None
            }
        };
        if let Some(connection) = abandoned {
            debug!("connect cancelled by disconnect");
            if let Err(e) = connection.close().await {
                warn!("Failed to close abandoned connection: {}", e);
            }
            return Ok(());
        }

        info!("Peer session opened: room={} client={}", room_id, client_id);
        self.bus.emit(Event::PeerOpened {
            room_id: room_id.to_string(),
            client_id: client_id.to_string(),
        });

        // Local streams registered while disconnected.
        let pending: Vec<Stream> = self
            .registry
            .lock()
            .get_all_streams()
            .into_iter()
            .filter(Stream::is_local)
            .collect();
        if !pending.is_empty() {
            for stream in &pending {
                if let Err(e) = self.attach_local_media(stream).await {
                    warn!("Failed to attach local stream {}: {}", stream.id, e);
                }
            }
            self.spawn_negotiate();
        }

        Ok(())
    }

    /// Close the connection and reset all per-connection state. The session
    /// can be connected again afterwards. A no-op when not connected, apart
    /// from cancelling a connect still in flight.
    pub async fn disconnect(&self) -> Result<()> {
        let (connection, event_task) = {
            let mut state = self.state.lock();
            if state.connection.is_none() {
                // An in-flight connect discards its connection on seeing
                // the new epoch. Nothing was opened, so nothing is reported.
                if state.connecting {
                    debug!("disconnect cancelled an in-flight connect");
                    state.epoch += 1;
                    state.connecting = false;
                }
                return Ok(());
            }
            state.epoch += 1;
            state.connecting = false;
            state.room_id = None;
            state.client_id = None;
            state.pending_negotiation = false;
            state.ice_connected = false;
            state.internal_channel = None;
            state.observer = None;
            state.pending_observations.clear();
            state.codec_preferences.clear();
            (state.connection.take(), state.event_task.take())
        };

        if let Some(task) = event_task {
            task.abort();
        }
        self.candidates.lock().await.clear();

        let streams = self.registry.lock().clear();
        for stream in streams.iter().filter(|s| s.is_local()) {
            for track in stream.tracks() {
                track.stop();
            }
        }

        if let Some(connection) = connection {
            if let Err(e) = connection.stop_transceivers().await {
                warn!("Failed to stop transceivers: {}", e);
            }
            if let Err(e) = connection.close().await {
                warn!("Failed to close peer connection: {}", e);
            }
        }

        for stream in streams {
            self.bus.emit(Event::StreamRemoved { stream });
        }
        info!("Peer session closed");
        self.bus.emit(Event::PeerClosed);
        Ok(())
    }

    /// Register a stream. Local streams are attached to the connection (now
    /// if connected, otherwise on the next connect).
    pub async fn add_stream(&self, key: &str, descriptor: StreamDescriptor) -> Result<Stream> {
        StreamRegistry::validate_key(key)?;
        if !StreamRegistry::validate_descriptor(&descriptor) {
            return Err(Error::InvalidInput(format!(
                "invalid stream descriptor for {}",
                key
            )));
        }

        let stream = Stream::new(key, descriptor);
        self.registry.lock().add_stream(stream.clone());

        if stream.is_local() {
            if self.is_connected() {
                if let Err(e) = self.attach_local_media(&stream).await {
                    self.registry.lock().remove_stream(key);
                    return Err(e);
                }
            }
            for track in stream.tracks() {
                self.watch_local_track(key.to_string(), track);
            }
        }

        debug!("Stream {} available ({:?})", key, stream.origin);
        self.bus.emit(Event::StreamAvailable {
            stream: stream.clone(),
        });
        Ok(stream)
    }

    /// Remove a stream; `None` when the key is unknown.
    pub fn remove_stream(&self, key: &str) -> Option<Stream> {
        let removed = self.registry.lock().remove_stream(key)?;
        debug!("Stream {} removed", key);
        self.bus.emit(Event::StreamRemoved {
            stream: removed.clone(),
        });
        Some(removed)
    }

    /// Merge partial metadata into the draft for `key`, promoting it when
    /// it becomes complete. Ignored for keys that are already active.
    pub fn merge_draft(&self, key: &str, partial: DraftStream) -> Result<Option<Stream>> {
        let promoted = {
            let mut registry = self.registry.lock();
            if registry.has_stream(key) {
                return Ok(None);
            }
            registry.add_draft(key, partial)?;
            registry.promote(key)
        };
        if let Some(stream) = &promoted {
            debug!("Draft {} promoted", key);
            self.bus.emit(Event::StreamAvailable {
                stream: stream.clone(),
            });
        }
        Ok(promoted)
    }

    /// Attach a local stream's tracks as send-only transceivers.
    pub async fn attach_local_media(&self, stream: &Stream) -> Result<()> {
        let active = self.active().ok_or(Error::NotConnected)?;
        let connection = &active.connection;
        let bitrates = self.bitrates();

        let attached: Vec<String> = connection
            .transceivers()
            .await
            .into_iter()
            .filter_map(|t| t.sender_track_id)
            .collect();

        for track in stream.media.audio_tracks() {
            if attached.iter().any(|id| id == track.id()) {
                continue;
            }
            let ordered = order_codecs(
                &connection.codec_capabilities(TrackKind::Audio),
                &self.media.preferred_audio_codecs,
            );
            let init = TransceiverInit::send_only(vec![audio_encoding(&ordered, &bitrates)]);
            let transceiver = connection.add_transceiver(&stream.id, &track, init).await?;
            if !self.is_current(active.epoch) {
                return Ok(());
            }
            if !connection
                .set_codec_preferences(&transceiver.id, &ordered)
                .await?
            {
                debug!("Recording audio codec order for {} for SDP munging", transceiver.id);
                self.state
                    .lock()
                    .codec_preferences
                    .insert(transceiver.id, ordered);
            }
        }

        for track in stream.media.video_tracks() {
            if attached.iter().any(|id| id == track.id()) {
                continue;
            }
            let strategy = select_video_encoding(
                &self.media,
                &bitrates,
                connection.supports_scalability_mode(),
            );
            debug!("Video track {} uses {} encoding", track.id(), strategy.name());
            connection
                .add_transceiver(
                    &stream.id,
                    &track,
                    TransceiverInit::send_only(strategy.into_encodings()),
                )
                .await?;
            if !self.is_current(active.epoch) {
                return Ok(());
            }
        }

        Ok(())
    }

    fn watch_local_track(&self, key: String, track: MediaTrack) {
        let weak = self.weak.clone();
        tokio::spawn(async move {
            track.ended().await;
            let Some(session) = weak.upgrade() else {
                return;
            };
            let owned = session
                .registry
                .lock()
                .get_stream(&key)
                .map_or(false, |s| s.tracks().iter().any(|t| t.same_track(&track)));
            if !owned {
                return;
            }
            if let Some(connection) = session.connection() {
                if let Err(e) = connection.remove_sender(track.id()).await {
                    warn!("Failed to remove sender for {}: {}", track.id(), e);
                }
            }
            session.remove_stream(&key);
        });
    }

    fn watch_remote_stream(&self, key: String, media: MediaStream) {
        let weak = self.weak.clone();
        tokio::spawn(async move {
            media.inactive().await;
            let Some(session) = weak.upgrade() else {
                return;
            };
            let owned = session
                .registry
                .lock()
                .get_stream(&key)
                .map_or(false, |s| s.media.id() == media.id());
            if owned {
                session.remove_stream(&key);
            } else {
                session.registry.lock().remove_draft(&key);
            }
        });
    }

    /// Best-effort negotiation; failures are logged.
    pub async fn negotiate(&self) {
        if let Err(e) = self.try_negotiate(false).await {
            warn!("Negotiation failed: {}", e);
        }
    }

    /// Negotiate with an ICE restart; failures are logged.
    pub async fn restart_negotiation(&self) {
        if let Err(e) = self.try_negotiate(true).await {
            warn!("ICE restart negotiation failed: {}", e);
        }
    }

    fn spawn_negotiate(&self) {
        if let Some(session) = self.weak.upgrade() {
            tokio::spawn(async move { session.negotiate().await });
        }
    }

    /// One offer/answer cycle with the server.
    pub async fn try_negotiate(&self, ice_restart: bool) -> Result<NegotiationOutcome> {
        if self.active().is_none() {
            return Ok(NegotiationOutcome::Skipped);
        }
        let _guard = self.negotiation.lock().await;
        let Some(active) = self.active() else {
            return Ok(NegotiationOutcome::Skipped);
        };
        let epoch = active.epoch;
        let connection = active.connection;

        let allowed = self
            .api
            .check_negotiate_allowed(&active.room_id, &active.client_id)
            .await?;
        if !self.is_current(epoch) {
            return Ok(NegotiationOutcome::Skipped);
        }
        if !allowed {
            info!("Negotiation not allowed yet, waiting for permission");
            self.state.lock().pending_negotiation = true;
            return Ok(NegotiationOutcome::Deferred);
        }
        self.state.lock().pending_negotiation = false;

        let offer = connection.create_offer(ice_restart).await?;
        if !self.is_current(epoch) {
            return Ok(NegotiationOutcome::Skipped);
        }
        connection.set_local_description(offer.clone()).await?;
        if !self.is_current(epoch) {
            return Ok(NegotiationOutcome::Skipped);
        }

        let local = connection.local_description().await.unwrap_or(offer);
        let answer = self
            .api
            .negotiate_connection(&active.room_id, &active.client_id, &local)
            .await?
            .ok_or_else(|| Error::Sdp("negotiate response carried no answer".to_string()))?;
        if !self.is_current(epoch) {
            return Ok(NegotiationOutcome::Skipped);
        }

        connection.set_remote_description(answer).await?;
        if !self.is_current(epoch) {
            return Ok(NegotiationOutcome::Skipped);
        }
        self.flush_candidates(&connection, epoch).await;

        debug!("Negotiation completed (ice_restart={})", ice_restart);
        Ok(NegotiationOutcome::Completed)
    }

    /// Apply a server offer and produce the local answer.
    ///
    /// Returns the resulting local description, or `None` when the
    /// connection changed while answering.
    pub async fn answer_offer(&self, offer: SessionDescription) -> Result<Option<SessionDescription>> {
        if offer.sdp_type != SdpType::Offer {
            return Err(Error::InvalidInput(format!(
                "expected an offer, got {:?}",
                offer.sdp_type
            )));
        }
        let _guard = self.negotiation.lock().await;
        let active = self.active().ok_or(Error::NotConnected)?;
        let epoch = active.epoch;
        let connection = active.connection;

        connection.set_remote_description(offer).await?;
        if !self.is_current(epoch) {
            return Ok(None);
        }
        self.flush_candidates(&connection, epoch).await;

        let answer = connection.create_answer().await?;
        if !self.is_current(epoch) {
            return Ok(None);
        }
        connection.set_local_description(answer).await?;
        if !self.is_current(epoch) {
            return Ok(None);
        }
        Ok(connection.local_description().await)
    }

    /// Apply a remote candidate, or buffer it until a remote description
    /// exists. Buffered candidates are applied once, in arrival order.
    pub async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut queue = self.candidates.lock().await;
        let Some(active) = self.active() else {
            queue.push_back(candidate);
            return Ok(());
        };
        let connection = active.connection;
        if connection.remote_description().await.is_none() {
            queue.push_back(candidate);
            return Ok(());
        }

        while let Some(buffered) = queue.pop_front() {
            if let Err(e) = connection.add_ice_candidate(buffered).await {
                warn!("Failed to apply buffered ICE candidate: {}", e);
            }
        }
        connection.add_ice_candidate(candidate).await
    }

    async fn flush_candidates(&self, connection: &Arc<dyn PeerConnection>, epoch: u64) {
        let mut queue = self.candidates.lock().await;
        if !queue.is_empty() {
            debug!("Applying {} buffered ICE candidates", queue.len());
        }
        while self.is_current(epoch) {
            let Some(candidate) = queue.pop_front() else {
                break;
            };
            if let Err(e) = connection.add_ice_candidate(candidate).await {
                warn!("Failed to apply buffered ICE candidate: {}", e);
            }
        }
    }

    pub async fn turn_on_camera(&self) -> Result<()> {
        self.set_local_track_enabled(TrackKind::Video, true).await
    }

    pub async fn turn_off_camera(&self) -> Result<()> {
        self.set_local_track_enabled(TrackKind::Video, false).await
    }

    pub async fn turn_on_mic(&self) -> Result<()> {
        self.set_local_track_enabled(TrackKind::Audio, true).await
    }

    pub async fn turn_off_mic(&self) -> Result<()> {
        self.set_local_track_enabled(TrackKind::Audio, false).await
    }

    async fn set_local_track_enabled(&self, kind: TrackKind, enabled: bool) -> Result<()> {
        let stream = self.local_media_stream().ok_or(Error::LocalMediaNotFound)?;
        let Some(connection) = self.connection() else {
            return Ok(());
        };
        let senders: Vec<String> = connection
            .transceivers()
            .await
            .into_iter()
            .filter_map(|t| t.sender_track_id)
            .collect();

        for track in stream.media.tracks_of(kind) {
            if senders.iter().any(|id| id == track.id()) {
                track.set_enabled(enabled);
            }
        }
        Ok(())
    }

    /// Swap `track` into every sender of the same kind, then renegotiate.
    pub async fn replace_track(&self, track: MediaTrack) -> Result<()> {
        let active = self.active().ok_or(Error::NotConnected)?;
        let connection = active.connection;

        let mut replaced = false;
        for transceiver in connection.transceivers().await {
            if transceiver.kind != track.kind() {
                continue;
            }
            let Some(old_id) = transceiver.sender_track_id else {
                continue;
            };
            connection.replace_sender_track(&transceiver.id, &track).await?;
            if !self.is_current(active.epoch) {
                return Ok(());
            }
            replaced = true;

            let owner = self.registry.lock().get_stream_by_track_id(&old_id).cloned();
            if let Some(stream) = owner {
                stream.replace_track(&old_id, track.clone());
                if stream.is_local() {
                    self.watch_local_track(stream.id.clone(), track.clone());
                }
            }
        }

        if replaced {
            self.negotiate().await;
        }
        Ok(())
    }

    async fn run_events(
        weak: Weak<PeerSession>,
        epoch: u64,
        mut events: mpsc::UnboundedReceiver<PeerConnectionEvent>,
    ) {
        while let Some(event) = events.recv().await {
            let Some(session) = weak.upgrade() else {
                break;
            };
            if !session.is_current(epoch) {
                break;
            }
            session.handle_event(epoch, event).await;
        }
    }

    async fn handle_event(&self, epoch: u64, event: PeerConnectionEvent) {
        match event {
            PeerConnectionEvent::IceConnectionState(state) => {
                self.on_ice_connection_state(epoch, state)
            }
            PeerConnectionEvent::Track { track, streams } => self.on_track(track, streams),
            PeerConnectionEvent::DataChannel(channel) => self.on_data_channel(channel).await,
            PeerConnectionEvent::IceCandidate(candidate) => self.forward_local_candidate(candidate),
        }
    }

    fn on_ice_connection_state(&self, epoch: u64, ice_state: IceConnectionState) {
        debug!("ICE connection state: {}", ice_state);
        self.bus.emit(Event::IceConnectionStateChanged(ice_state));

        let transition = {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                return;
            }
            let was_connected = state.ice_connected;
            state.ice_connected = ice_state.is_connected();
            (was_connected, state.ice_connected)
        };

        match transition {
            (false, true) => self.bus.emit(Event::PeerConnected),
            (true, false) => self.bus.emit(Event::PeerDisconnected),
            _ => {}
        }

        if ice_state == IceConnectionState::Failed {
            info!("ICE failed, restarting negotiation");
            if let Some(session) = self.weak.upgrade() {
                tokio::spawn(async move { session.restart_negotiation().await });
            }
        }
    }

    /// A remote track arrived. Registers an inactivity watcher for each new
    /// stream group and merges it into that stream's draft.
    pub fn on_track(&self, track: MediaTrack, streams: Vec<MediaStream>) {
        if streams.is_empty() {
            debug!("Ignoring remote track {} without a stream", track.id());
            return;
        }

        for media in streams {
            if !media.is_active() {
                continue;
            }
            let key = media.id().to_string();
            let known = {
                let registry = self.registry.lock();
                registry.has_stream(&key)
                    || registry
                        .get_draft(&key)
                        .map_or(false, |draft| draft.media.is_some())
            };
            if known {
                continue;
            }

            self.watch_remote_stream(key.clone(), media.clone());
            let partial = DraftStream {
                origin: Some(StreamOrigin::Remote),
                media: Some(media),
                ..Default::default()
            };
            if let Err(e) = self.merge_draft(&key, partial) {
                warn!("Failed to register remote stream {}: {}", key, e);
            }
        }
    }

    async fn on_data_channel(&self, channel: Arc<dyn DataChannel>) {
        let label = channel.label();
        if label != self.webrtc.internal_channel_label {
            debug!("Ignoring data channel {}", label);
            return;
        }

        let observer = Arc::new(VideoObserver::new(channel.clone()));
        let pending = {
            let mut state = self.state.lock();
            state.internal_channel = Some(channel);
            state.observer = Some(observer.clone());
            std::mem::take(&mut state.pending_observations)
        };
        info!("Internal data channel available");
        self.bus.emit(Event::InternalChannelAvailable);

        for observation in pending {
            if let Err(e) = observer.observe(observation).await {
                warn!("Failed to send queued video observation: {}", e);
            }
        }
    }

    fn forward_local_candidate(&self, candidate: IceCandidate) {
        let Some(active) = self.active() else {
            return;
        };
        let api = self.api.clone();
        tokio::spawn(async move {
            if let Err(e) = api
                .send_ice_candidate(&active.room_id, &active.client_id, &candidate)
                .await
            {
                warn!("Failed to send local ICE candidate: {}", e);
            }
        });
    }

    /// Report a remote video's rendered size, queueing it until the internal
    /// channel exists.
    pub async fn observe_video(&self, observation: VideoObservation) -> Result<()> {
        let observer = {
            let mut state = self.state.lock();
            match &state.observer {
                Some(observer) => observer.clone(),
                None => {
                    state.pending_observations.push(observation);
                    return Ok(());
                }
            }
        };
        observer.observe(observation).await.map(|_| ())
    }

    fn active(&self) -> Option<Active> {
        let state = self.state.lock();
        Some(Active {
            epoch: state.epoch,
            connection: state.connection.clone()?,
            room_id: state.room_id.clone()?,
            client_id: state.client_id.clone()?,
        })
    }

    fn is_current(&self, epoch: u64) -> bool {
        let state = self.state.lock();
        state.epoch == epoch && state.connection.is_some()
    }

    fn local_media_stream(&self) -> Option<Stream> {
        self.registry
            .lock()
            .get_all_streams()
            .into_iter()
            .find(|s| s.is_local() && s.source == StreamSource::Media)
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn room_id(&self) -> Option<String> {
        self.state.lock().room_id.clone()
    }

    pub fn client_id(&self) -> Option<String> {
        self.state.lock().client_id.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connection.is_some()
    }

    pub fn pending_negotiation(&self) -> bool {
        self.state.lock().pending_negotiation
    }

    pub fn connection(&self) -> Option<Arc<dyn PeerConnection>> {
        self.state.lock().connection.clone()
    }

    pub fn internal_channel(&self) -> Option<Arc<dyn DataChannel>> {
        self.state.lock().internal_channel.clone()
    }

    pub fn bitrates(&self) -> Bitrates {
        self.state.lock().bitrates
    }

    /// Replace the bitrate ceilings used for tracks attached from now on.
    pub fn set_bitrates(&self, bitrates: Bitrates) {
        self.state.lock().bitrates = bitrates;
    }

    /// Codec order awaiting SDP munging for a transceiver.
    pub fn recorded_codec_preferences(&self, transceiver_id: &str) -> Option<Vec<CodecCapability>> {
        self.state.lock().codec_preferences.get(transceiver_id).cloned()
    }

    pub fn get_stream(&self, key: &str) -> Option<Stream> {
        self.registry.lock().get_stream(key).cloned()
    }

    pub fn get_stream_by_track_id(&self, track_id: &str) -> Option<Stream> {
        self.registry.lock().get_stream_by_track_id(track_id).cloned()
    }

    pub fn get_all_streams(&self) -> Vec<Stream> {
        self.registry.lock().get_all_streams()
    }

    pub fn has_stream(&self, key: &str) -> bool {
        self.registry.lock().has_stream(key)
    }

    pub fn total_streams(&self) -> usize {
        self.registry.lock().get_total_streams()
    }

    pub fn get_draft(&self, key: &str) -> Option<DraftStream> {
        self.registry.lock().get_draft(key).cloned()
    }
}
