//! In-crate test doubles

use crate::api::{
    ClientInfo, ControlPlane, CreateRoomRequest, RegisterClientRequest, RegisteredClient, Room,
    TrackSource, TrackSubscription,
};
use crate::config::{Bitrates, IceServerConfig};
use crate::error::{Error, Result};
use crate::events::Event;
use crate::media::{MediaStream, MediaTrack, TrackKind};
use crate::transport::{Connectivity, PushMessage, PushSource, PushSubscription};
use crate::webrtc::{
    CodecCapability, DataChannel, IceCandidate, PeerConnection, PeerConnectionEvent,
    PeerConnectionFactory, SdpType, SessionDescription, StatsEntry, TransceiverInfo,
    TransceiverInit,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// Poll `condition` every millisecond, failing the test after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// A stream `id` holding `{id}-audio` and `{id}-video`.
pub fn local_media(id: &str) -> MediaStream {
    MediaStream::new(
        id,
        vec![
            MediaTrack::new(format!("{}-audio", id), TrackKind::Audio),
            MediaTrack::new(format!("{}-video", id), TrackKind::Video),
        ],
    )
}

#[derive(Default)]
struct MockPcState {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    offers: Vec<bool>,
    applied: Vec<IceCandidate>,
    transceivers: Vec<(TransceiverInfo, TransceiverInit)>,
    removed_senders: Vec<String>,
    stats: Vec<StatsEntry>,
    stopped: bool,
    closed: bool,
}

#[derive(Default)]
pub struct MockPeerConnection {
    state: Mutex<MockPcState>,
}

impl MockPeerConnection {
    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().applied.clone()
    }

    /// `ice_restart` flag of every offer created
    pub fn offers(&self) -> Vec<bool> {
        self.state.lock().offers.clone()
    }

    pub fn remote(&self) -> Option<SessionDescription> {
        self.state.lock().remote.clone()
    }

    pub fn added_transceivers(&self) -> Vec<(TransceiverInfo, TransceiverInit)> {
        self.state.lock().transceivers.clone()
    }

    pub fn sender_track(&self, transceiver_id: &str) -> Option<String> {
        self.state
            .lock()
            .transceivers
            .iter()
            .find(|(info, _)| info.id == transceiver_id)
            .and_then(|(info, _)| info.sender_track_id.clone())
    }

    pub fn removed_senders(&self) -> Vec<String> {
        self.state.lock().removed_senders.clone()
    }

    pub fn set_stats(&self, stats: Vec<StatsEntry>) {
        self.state.lock().stats = stats;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn transceivers_stopped(&self) -> bool {
        self.state.lock().stopped
    }
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription> {
        let mut state = self.state.lock();
        state.offers.push(ice_restart);
        Ok(SessionDescription::offer(format!("v=0 offer {}", state.offers.len())))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        if self.state.lock().remote.is_none() {
            return Err(Error::Sdp("no remote offer".to_string()));
        }
        Ok(SessionDescription::answer("v=0 local answer"))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.state.lock().local = Some(description);
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.state.lock().remote = Some(description);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    async fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote.clone()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut state = self.state.lock();
        if state.remote.is_none() {
            return Err(Error::Ice("no remote description".to_string()));
        }
        state.applied.push(candidate);
        Ok(())
    }

    async fn add_transceiver(
        &self,
        stream_id: &str,
        track: &MediaTrack,
        init: TransceiverInit,
    ) -> Result<TransceiverInfo> {
        let mut state = self.state.lock();
        let info = TransceiverInfo {
            id: format!("tr-{}", state.transceivers.len()),
            kind: track.kind(),
            stream_id: stream_id.to_string(),
            sender_track_id: Some(track.id().to_string()),
        };
        state.transceivers.push((info.clone(), init));
        Ok(info)
    }

    async fn transceivers(&self) -> Vec<TransceiverInfo> {
        self.state
            .lock()
            .transceivers
            .iter()
            .map(|(info, _)| info.clone())
            .collect()
    }

    fn codec_capabilities(&self, kind: TrackKind) -> Vec<CodecCapability> {
        match kind {
            TrackKind::Audio => vec![
                CodecCapability::new("audio/opus", 48000, 2),
                CodecCapability::new("audio/PCMU", 8000, 1),
                CodecCapability::new("audio/red", 48000, 2),
            ],
            TrackKind::Video => vec![
                CodecCapability::new("video/VP8", 90000, 0),
                CodecCapability::new("video/H264", 90000, 0),
            ],
        }
    }

    async fn set_codec_preferences(
        &self,
        _transceiver_id: &str,
        _codecs: &[CodecCapability],
    ) -> Result<bool> {
        Ok(false)
    }

    fn supports_scalability_mode(&self) -> bool {
        false
    }

    async fn replace_sender_track(&self, transceiver_id: &str, track: &MediaTrack) -> Result<()> {
        let mut state = self.state.lock();
        let (info, _) = state
            .transceivers
            .iter_mut()
            .find(|(info, _)| info.id == transceiver_id)
            .ok_or_else(|| Error::Media(format!("unknown transceiver {}", transceiver_id)))?;
        info.sender_track_id = Some(track.id().to_string());
        Ok(())
    }

    async fn remove_sender(&self, track_id: &str) -> Result<bool> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let found = state
            .transceivers
            .iter_mut()
            .find(|(info, _)| info.sender_track_id.as_deref() == Some(track_id));
        match found {
            Some((info, _)) => {
                info.sender_track_id = None;
                state.removed_senders.push(track_id.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn stop_transceivers(&self) -> Result<()> {
        self.state.lock().stopped = true;
        Ok(())
    }

    async fn get_stats(&self) -> Result<Vec<StatsEntry>> {
        Ok(self.state.lock().stats.clone())
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}

type CreatedConnection = (
    Arc<MockPeerConnection>,
    mpsc::UnboundedSender<PeerConnectionEvent>,
);

#[derive(Default)]
pub struct MockPeerConnectionFactory {
    created: Mutex<Vec<CreatedConnection>>,
    ice_servers: Mutex<Vec<IceServerConfig>>,
    paused: AtomicBool,
    resume: Notify,
}

impl MockPeerConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> usize {
        self.created.lock().len()
    }

    /// Most recent connection and the sender feeding its events.
    pub fn last(&self) -> CreatedConnection {
        self.created
            .lock()
            .last()
            .cloned()
            .expect("no connection created")
    }

    pub fn ice_servers(&self) -> Vec<IceServerConfig> {
        self.ice_servers.lock().clone()
    }

    /// Hold `create` after the connection is recorded.
    pub fn pause_create(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume_create(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resume.notify_one();
    }
}

#[async_trait]
impl PeerConnectionFactory for MockPeerConnectionFactory {
    async fn create(
        &self,
        ice_servers: Vec<IceServerConfig>,
    ) -> Result<(
        Arc<dyn PeerConnection>,
        mpsc::UnboundedReceiver<PeerConnectionEvent>,
    )> {
        let connection = Arc::new(MockPeerConnection::default());
        let (tx, rx) = mpsc::unbounded_channel();
        *self.ice_servers.lock() = ice_servers;
        self.created.lock().push((connection.clone(), tx));
        if self.paused.load(Ordering::SeqCst) {
            self.resume.notified().await;
        }
        Ok((connection, rx))
    }
}

pub struct MockControlPlane {
    negotiate_allowed: AtomicBool,
    negotiate_checks: AtomicUsize,
    negotiated: Mutex<Vec<SessionDescription>>,
    paused: AtomicBool,
    resume: Notify,
    client_missing: AtomicBool,
    client_checks: AtomicUsize,
    sent_candidates: Mutex<Vec<IceCandidate>>,
    track_sources: Mutex<Vec<TrackSource>>,
    subscriptions: Mutex<Vec<TrackSubscription>>,
    metadata: Mutex<Map<String, Value>>,
    bitrates: Mutex<Option<Bitrates>>,
    left: Mutex<Vec<(String, bool)>>,
    ended: Mutex<Vec<String>>,
}

impl Default for MockControlPlane {
    fn default() -> Self {
        Self {
            negotiate_allowed: AtomicBool::new(true),
            negotiate_checks: AtomicUsize::new(0),
            negotiated: Mutex::new(Vec::new()),
            paused: AtomicBool::new(false),
            resume: Notify::new(),
            client_missing: AtomicBool::new(false),
            client_checks: AtomicUsize::new(0),
            sent_candidates: Mutex::new(Vec::new()),
            track_sources: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            metadata: Mutex::new(Map::new()),
            bitrates: Mutex::new(None),
            left: Mutex::new(Vec::new()),
            ended: Mutex::new(Vec::new()),
        }
    }
}

impl MockControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_negotiate_allowed(&self, allowed: bool) {
        self.negotiate_allowed.store(allowed, Ordering::SeqCst);
    }

    pub fn negotiate_checks(&self) -> usize {
        self.negotiate_checks.load(Ordering::SeqCst)
    }

    pub fn negotiated(&self) -> Vec<SessionDescription> {
        self.negotiated.lock().clone()
    }

    /// Hold `negotiate_connection` after it records its argument.
    pub fn pause_negotiate(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume_negotiate(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resume.notify_one();
    }

    pub fn set_client_missing(&self, missing: bool) {
        self.client_missing.store(missing, Ordering::SeqCst);
    }

    pub fn client_checks(&self) -> usize {
        self.client_checks.load(Ordering::SeqCst)
    }

    pub fn sent_candidates(&self) -> Vec<IceCandidate> {
        self.sent_candidates.lock().clone()
    }

    pub fn track_sources(&self) -> Vec<TrackSource> {
        self.track_sources.lock().clone()
    }

    pub fn subscriptions(&self) -> Vec<TrackSubscription> {
        self.subscriptions.lock().clone()
    }

    pub fn set_bitrates(&self, bitrates: Option<Bitrates>) {
        *self.bitrates.lock() = bitrates;
    }

    pub fn left(&self) -> Vec<(String, bool)> {
        self.left.lock().clone()
    }

    pub fn ended(&self) -> Vec<String> {
        self.ended.lock().clone()
    }
}

#[async_trait]
impl ControlPlane for MockControlPlane {
    async fn create_room(&self, request: CreateRoomRequest) -> Result<Room> {
        Ok(Room {
            id: request.id.unwrap_or_else(|| "room-1".to_string()),
            name: request.name.unwrap_or_default(),
            extra: Map::new(),
        })
    }

    async fn get_room(&self, room_id: &str) -> Result<Room> {
        Ok(Room {
            id: room_id.to_string(),
            name: String::new(),
            extra: Map::new(),
        })
    }

    async fn register_client(
        &self,
        _room_id: &str,
        request: RegisterClientRequest,
    ) -> Result<RegisteredClient> {
        Ok(RegisteredClient {
            client_id: request.client_id.unwrap_or_else(|| "client-1".to_string()),
            name: request.name.unwrap_or_default(),
            bitrates: *self.bitrates.lock(),
        })
    }

    async fn get_client(&self, _room_id: &str, client_id: &str) -> Result<ClientInfo> {
        self.client_checks.fetch_add(1, Ordering::SeqCst);
        if self.client_missing.load(Ordering::SeqCst) {
            return Err(Error::Api {
                code: 404,
                message: "client not found".to_string(),
            });
        }
        Ok(ClientInfo {
            client_id: client_id.to_string(),
            name: String::new(),
        })
    }

    async fn set_client_name(&self, _room_id: &str, client_id: &str, name: &str) -> Result<ClientInfo> {
        Ok(ClientInfo {
            client_id: client_id.to_string(),
            name: name.to_string(),
        })
    }

    async fn get_metadata(&self, _room_id: &str) -> Result<Map<String, Value>> {
        Ok(self.metadata.lock().clone())
    }

    async fn set_metadata(&self, _room_id: &str, metadata: Map<String, Value>) -> Result<()> {
        self.metadata.lock().extend(metadata);
        Ok(())
    }

    async fn delete_metadata(&self, _room_id: &str, key: &str) -> Result<()> {
        self.metadata.lock().remove(key);
        Ok(())
    }

    async fn send_ice_candidate(
        &self,
        _room_id: &str,
        _client_id: &str,
        candidate: &IceCandidate,
    ) -> Result<()> {
        self.sent_candidates.lock().push(candidate.clone());
        Ok(())
    }

    async fn check_negotiate_allowed(&self, _room_id: &str, _client_id: &str) -> Result<bool> {
        self.negotiate_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.negotiate_allowed.load(Ordering::SeqCst))
    }

    async fn negotiate_connection(
        &self,
        _room_id: &str,
        _client_id: &str,
        description: &SessionDescription,
    ) -> Result<Option<SessionDescription>> {
        self.negotiated.lock().push(description.clone());
        if self.paused.load(Ordering::SeqCst) {
            self.resume.notified().await;
        }
        Ok(match description.sdp_type {
            SdpType::Offer => Some(SessionDescription::answer("v=0 remote answer")),
            _ => None,
        })
    }

    async fn set_track_sources(
        &self,
        _room_id: &str,
        _client_id: &str,
        sources: Vec<TrackSource>,
    ) -> Result<()> {
        self.track_sources.lock().extend(sources);
        Ok(())
    }

    async fn subscribe_tracks(
        &self,
        _room_id: &str,
        _client_id: &str,
        tracks: Vec<TrackSubscription>,
    ) -> Result<()> {
        self.subscriptions.lock().extend(tracks);
        Ok(())
    }

    async fn leave_room(&self, _room_id: &str, client_id: &str, use_beacon: bool) -> Result<()> {
        self.left.lock().push((client_id.to_string(), use_beacon));
        Ok(())
    }

    async fn end_room(&self, room_id: &str) -> Result<()> {
        self.ended.lock().push(room_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MockPushSource {
    opened: AtomicUsize,
    fail_next: AtomicBool,
    senders: Mutex<Vec<mpsc::UnboundedSender<Result<PushMessage>>>>,
}

impl MockPushSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open attempts so far, failed ones included
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn fail_next_open(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn push(&self, event: &str, data: &str) {
        if let Some(tx) = self.senders.lock().last() {
            let _ = tx.send(Ok(PushMessage::new(event, data)));
        }
    }

    /// Break the most recent connection.
    pub fn fail(&self, reason: &str) {
        if let Some(tx) = self.senders.lock().last() {
            let _ = tx.send(Err(Error::Signaling(reason.to_string())));
        }
    }
}

#[async_trait]
impl PushSource for MockPushSource {
    async fn open(&self, _room_id: &str, _client_id: &str) -> Result<PushSubscription> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::Http("connection refused".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().push(tx);
        Ok(PushSubscription::new(rx, None))
    }
}

pub struct MockConnectivity {
    online: AtomicBool,
}

impl MockConnectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Connectivity for MockConnectivity {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

pub struct MockDataChannel {
    label: String,
    open: AtomicBool,
    sent: Mutex<VecDeque<String>>,
}

impl MockDataChannel {
    pub fn open(label: &str) -> Self {
        Self {
            label: label.to_string(),
            open: AtomicBool::new(true),
            sent: Mutex::new(VecDeque::new()),
        }
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().iter().cloned().collect()
    }
}

#[async_trait]
impl DataChannel for MockDataChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: String) -> Result<()> {
        if !self.is_open() {
            return Err(Error::DataChannel("channel closed".to_string()));
        }
        self.sent.lock().push_back(text);
        Ok(())
    }
}
