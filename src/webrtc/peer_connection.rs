//! webrtc-rs implementation of the peer connection seam
//!
//! Local tracks are backed by `TrackLocalStaticSample` writers; remote tracks
//! are drained on their own task and their RTP packets re-broadcast. Both are
//! reachable by track id through the factory.

use super::{
    CodecCapability, DataChannel, IceCandidate, IceConnectionState, PeerConnection,
    PeerConnectionEvent, PeerConnectionFactory, SdpType, SessionDescription, StatsEntry,
    TransceiverDirection, TransceiverInfo, TransceiverInit,
};
use crate::config::IceServerConfig;
use crate::error::{Error, Result};
use crate::media::{MediaStream, MediaTrack, TrackKind};
use async_trait::async_trait;
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{
    MediaEngine, MIME_TYPE_H264, MIME_TYPE_OPUS, MIME_TYPE_PCMU, MIME_TYPE_VP8, MIME_TYPE_VP9,
};
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::stats::StatsReportType;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

const H264_FMTP: &str = "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";
const RTP_BROADCAST_CAPACITY: usize = 256;

/// Codecs registered on every connection, in registration order
fn supported_codecs(kind: TrackKind) -> Vec<CodecCapability> {
    match kind {
        TrackKind::Audio => vec![
            CodecCapability::new(MIME_TYPE_OPUS, 48000, 2),
            CodecCapability::new(MIME_TYPE_PCMU, 8000, 1),
        ],
        TrackKind::Video => vec![
            CodecCapability {
                sdp_fmtp_line: H264_FMTP.to_string(),
                ..CodecCapability::new(MIME_TYPE_H264, 90000, 0)
            },
            CodecCapability::new(MIME_TYPE_VP8, 90000, 0),
            CodecCapability {
                sdp_fmtp_line: "profile-id=0".to_string(),
                ..CodecCapability::new(MIME_TYPE_VP9, 90000, 0)
            },
        ],
    }
}

fn rtc_capability(codec: &CodecCapability) -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: codec.mime_type.clone(),
        clock_rate: codec.clock_rate,
        channels: codec.channels,
        sdp_fmtp_line: codec.sdp_fmtp_line.clone(),
        rtcp_feedback: vec![],
    }
}

fn rtp_codec_type(kind: TrackKind) -> RTPCodecType {
    match kind {
        TrackKind::Audio => RTPCodecType::Audio,
        TrackKind::Video => RTPCodecType::Video,
    }
}

fn register_codecs(media_engine: &mut MediaEngine) -> Result<()> {
    let mut payload_type = 96;
    for kind in [TrackKind::Video, TrackKind::Audio] {
        for codec in supported_codecs(kind) {
            // PCMU keeps its static payload type
            let pt = if codec.mime_type == MIME_TYPE_PCMU {
                0
            } else {
                payload_type += 1;
                payload_type
            };
            media_engine
                .register_codec(
                    RTCRtpCodecParameters {
                        capability: rtc_capability(&codec),
                        payload_type: pt,
                        ..Default::default()
                    },
                    rtp_codec_type(kind),
                )
                .map_err(|e| {
                    Error::ConnectionFailed(format!("Failed to register {}: {}", codec.mime_type, e))
                })?;
        }
    }
    Ok(())
}

fn rtc_ice_servers(servers: &[IceServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let sdp = description.sdp;
    let parsed = match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(sdp),
        SdpType::Answer => RTCSessionDescription::answer(sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(sdp),
    };
    parsed.map_err(|e| Error::Sdp(format!("Invalid session description: {}", e)))
}

fn from_rtc_description(description: RTCSessionDescription) -> Option<SessionDescription> {
    let sdp_type = match description.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        _ => return None,
    };
    Some(SessionDescription {
        sdp_type,
        sdp: description.sdp,
    })
}

fn ice_state(state: RTCIceConnectionState) -> Option<IceConnectionState> {
    Some(match state {
        RTCIceConnectionState::New => IceConnectionState::New,
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        RTCIceConnectionState::Closed => IceConnectionState::Closed,
        _ => return None,
    })
}

fn rtc_direction(direction: TransceiverDirection) -> RTCRtpTransceiverDirection {
    match direction {
        TransceiverDirection::SendRecv => RTCRtpTransceiverDirection::Sendrecv,
        TransceiverDirection::SendOnly => RTCRtpTransceiverDirection::Sendonly,
        TransceiverDirection::RecvOnly => RTCRtpTransceiverDirection::Recvonly,
        TransceiverDirection::Inactive => RTCRtpTransceiverDirection::Inactive,
    }
}

/// Sample writers and RTP feeds shared by every connection of a factory
#[derive(Default)]
struct MediaTaps {
    local: Mutex<HashMap<String, Arc<TrackLocalStaticSample>>>,
    remote: Mutex<HashMap<String, broadcast::Sender<Packet>>>,
}

/// Creates webrtc-rs peer connections
pub struct NativePeerConnectionFactory {
    api: API,
    taps: Arc<MediaTaps>,
}

impl NativePeerConnectionFactory {
    pub fn new() -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        register_codecs(&mut media_engine)?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            Error::ConnectionFailed(format!("Failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api,
            taps: Arc::new(MediaTaps::default()),
        })
    }

    /// Sample writer behind a local track attached to any connection.
    pub fn sample_writer(&self, track_id: &str) -> Option<Arc<TrackLocalStaticSample>> {
        self.taps.local.lock().get(track_id).cloned()
    }

    /// RTP packets of a remote track.
    pub fn remote_rtp(&self, track_id: &str) -> Option<broadcast::Receiver<Packet>> {
        self.taps.remote.lock().get(track_id).map(broadcast::Sender::subscribe)
    }
}

#[async_trait]
impl PeerConnectionFactory for NativePeerConnectionFactory {
    async fn create(
        &self,
        ice_servers: Vec<IceServerConfig>,
    ) -> Result<(
        Arc<dyn PeerConnection>,
        mpsc::UnboundedReceiver<PeerConnectionEvent>,
    )> {
        let config = RTCConfiguration {
            ice_servers: rtc_ice_servers(&ice_servers),
            ..Default::default()
        };
        let pc = self
            .api
            .new_peer_connection(config)
            .await
            .map_err(|e| Error::ConnectionFailed(format!("Failed to create peer connection: {}", e)))?;
        let pc = Arc::new(pc);

        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(NativePeerConnection {
            pc,
            taps: self.taps.clone(),
            transceivers: Mutex::new(Vec::new()),
            remote_streams: Arc::new(Mutex::new(HashMap::new())),
            created: Instant::now(),
        });
        connection.install_handlers(tx);
        debug!("Peer connection created with {} ICE servers", ice_servers.len());

        Ok((connection, rx))
    }
}

struct LocalTransceiver {
    id: String,
    kind: TrackKind,
    /// msid the local tracks are announced under
    stream_id: String,
    track_id: Option<String>,
    transceiver: Arc<RTCRtpTransceiver>,
}

pub struct NativePeerConnection {
    pc: Arc<RTCPeerConnection>,
    taps: Arc<MediaTaps>,
    transceivers: Mutex<Vec<LocalTransceiver>>,
    remote_streams: Arc<Mutex<HashMap<String, MediaStream>>>,
    created: Instant,
}

impl NativePeerConnection {
    fn install_handlers(&self, tx: mpsc::UnboundedSender<PeerConnectionEvent>) {
        let events = tx.clone();
        self.pc
            .on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
                if let Some(state) = ice_state(state) {
                    let _ = events.send(PeerConnectionEvent::IceConnectionState(state));
                }
                Box::pin(async {})
            }));

        let events = tx.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let events = events.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else {
                        return;
                    };
                    match candidate.to_json() {
                        Ok(init) => {
                            let _ = events.send(PeerConnectionEvent::IceCandidate(IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                                username_fragment: init.username_fragment,
                            }));
                        }
                        Err(e) => warn!("Failed to serialize local ICE candidate: {}", e),
                    }
                })
            }));

        let events = tx.clone();
        self.pc
            .on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
                let events = events.clone();
                Box::pin(async move {
                    let opened = channel.clone();
                    channel.on_open(Box::new(move || {
                        let _ = events.send(PeerConnectionEvent::DataChannel(Arc::new(
                            NativeDataChannel { inner: opened },
                        )));
                        Box::pin(async {})
                    }));
                })
            }));

        let events = tx;
        let taps = self.taps.clone();
        let streams = self.remote_streams.clone();
        self.pc.on_track(Box::new(move |remote: Arc<TrackRemote>, _receiver, _transceiver| {
            let kind = match remote.kind() {
                RTPCodecType::Audio => Some(TrackKind::Audio),
                RTPCodecType::Video => Some(TrackKind::Video),
                _ => None,
            };
            if let Some(kind) = kind {
                let track = MediaTrack::new(remote.id(), kind);
                let stream_id = remote.stream_id();
                let stream = {
                    let mut streams = streams.lock();
                    let stream = streams
                        .entry(stream_id.clone())
                        .or_insert_with(|| MediaStream::new(stream_id, Vec::new()))
                        .clone();
                    stream.add_track(track.clone());
                    stream
                };

                let (rtp_tx, _) = broadcast::channel(RTP_BROADCAST_CAPACITY);
                taps.remote.lock().insert(track.id().to_string(), rtp_tx.clone());
                tokio::spawn(Self::forward_rtp(remote, track.clone(), rtp_tx, taps.clone()));

                let _ = events.send(PeerConnectionEvent::Track {
                    track,
                    streams: vec![stream],
                });
            }
            Box::pin(async {})
        }));
    }

    async fn forward_rtp(
        remote: Arc<TrackRemote>,
        track: MediaTrack,
        rtp_tx: broadcast::Sender<Packet>,
        taps: Arc<MediaTaps>,
    ) {
        loop {
            match remote.read_rtp().await {
                Ok((packet, _)) => {
                    // No subscribers is fine
                    let _ = rtp_tx.send(packet);
                }
                Err(e) => {
                    debug!("Remote track {} ended: {}", track.id(), e);
                    break;
                }
            }
        }
        taps.remote.lock().remove(track.id());
        track.stop();
    }

    fn timestamp_ms(&self) -> f64 {
        self.created.elapsed().as_secs_f64() * 1000.0
    }

    fn find_transceiver(
        &self,
        transceiver_id: &str,
    ) -> Option<(Arc<RTCRtpTransceiver>, TrackKind, String)> {
        self.transceivers
            .lock()
            .iter()
            .find(|t| t.id == transceiver_id)
            .map(|t| (t.transceiver.clone(), t.kind, t.stream_id.clone()))
    }

    fn sample_track(&self, stream_id: &str, track: &MediaTrack) -> Arc<TrackLocalStaticSample> {
        let codec = supported_codecs(track.kind())
            .into_iter()
            .next()
            .map(|c| rtc_capability(&c))
            .unwrap_or_default();
        let sample = Arc::new(TrackLocalStaticSample::new(
            codec,
            track.id().to_string(),
            stream_id.to_string(),
        ));
        self.taps
            .local
            .lock()
            .insert(track.id().to_string(), sample.clone());
        sample
    }
}

#[async_trait]
impl PeerConnection for NativePeerConnection {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription> {
        let options = RTCOfferOptions {
            ice_restart,
            ..Default::default()
        };
        let offer = self
            .pc
            .create_offer(Some(options))
            .await
            .map_err(|e| Error::Sdp(format!("Failed to create offer: {}", e)))?;
        from_rtc_description(offer).ok_or_else(|| Error::Sdp("unexpected offer type".to_string()))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to create answer: {}", e)))?;
        from_rtc_description(answer).ok_or_else(|| Error::Sdp("unexpected answer type".to_string()))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.pc
            .set_local_description(to_rtc_description(description)?)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(to_rtc_description(description)?)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to set remote description: {}", e)))
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.pc.local_description().await.and_then(from_rtc_description)
    }

    async fn remote_description(&self) -> Option<SessionDescription> {
        self.pc.remote_description().await.and_then(from_rtc_description)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::Ice(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn add_transceiver(
        &self,
        stream_id: &str,
        track: &MediaTrack,
        init: TransceiverInit,
    ) -> Result<TransceiverInfo> {
        // Per-encoding parameters are negotiated by the server for this stack.
        if init.send_encodings.len() > 1 {
            debug!(
                "Sending {} as a single encoding ({} requested)",
                track.id(),
                init.send_encodings.len()
            );
        }
        let sample = self.sample_track(stream_id, track);
        let transceiver = self
            .pc
            .add_transceiver_from_track(
                sample as Arc<dyn TrackLocal + Send + Sync>,
                Some(RTCRtpTransceiverInit {
                    direction: rtc_direction(init.direction),
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| Error::Media(format!("Failed to add transceiver: {}", e)))?;

        let info = TransceiverInfo {
            id: uuid::Uuid::new_v4().to_string(),
            kind: track.kind(),
            stream_id: stream_id.to_string(),
            sender_track_id: Some(track.id().to_string()),
        };
        self.transceivers.lock().push(LocalTransceiver {
            id: info.id.clone(),
            kind: info.kind,
            stream_id: info.stream_id.clone(),
            track_id: info.sender_track_id.clone(),
            transceiver,
        });
        Ok(info)
    }

    async fn transceivers(&self) -> Vec<TransceiverInfo> {
        self.transceivers
            .lock()
            .iter()
            .map(|t| TransceiverInfo {
                id: t.id.clone(),
                kind: t.kind,
                stream_id: t.stream_id.clone(),
                sender_track_id: t.track_id.clone(),
            })
            .collect()
    }

    fn codec_capabilities(&self, kind: TrackKind) -> Vec<CodecCapability> {
        supported_codecs(kind)
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
        let (transceiver, kind, stream_id) = self
            .find_transceiver(transceiver_id)
            .ok_or_else(|| Error::Media(format!("Unknown transceiver {}", transceiver_id)))?;
        if kind != track.kind() {
            return Err(Error::InvalidInput(format!(
                "cannot send a {} track on a {} transceiver",
                track.kind(),
                kind
            )));
        }

        let sample = self.sample_track(&stream_id, track);
        transceiver
            .sender()
            .await
            .replace_track(Some(sample as Arc<dyn TrackLocal + Send + Sync>))
            .await
            .map_err(|e| Error::Media(format!("Failed to replace track: {}", e)))?;

        let previous = {
            let mut transceivers = self.transceivers.lock();
            transceivers
                .iter_mut()
                .find(|t| t.id == transceiver_id)
                .and_then(|t| t.track_id.replace(track.id().to_string()))
        };
        if let Some(previous) = previous {
            self.taps.local.lock().remove(&previous);
        }
        Ok(())
    }

    async fn remove_sender(&self, track_id: &str) -> Result<bool> {
        let transceiver = {
            let mut transceivers = self.transceivers.lock();
            let Some(entry) = transceivers
                .iter_mut()
                .find(|t| t.track_id.as_deref() == Some(track_id))
            else {
                return Ok(false);
            };
            entry.track_id = None;
            entry.transceiver.clone()
        };

        let sender = transceiver.sender().await;
        self.pc
            .remove_track(&sender)
            .await
            .map_err(|e| Error::Media(format!("Failed to remove sender: {}", e)))?;
        self.taps.local.lock().remove(track_id);
        Ok(true)
    }

    async fn stop_transceivers(&self) -> Result<()> {
        let transceivers: Vec<_> = self
            .transceivers
            .lock()
            .drain(..)
            .map(|t| {
                if let Some(track_id) = &t.track_id {
                    self.taps.local.lock().remove(track_id);
                }
                t.transceiver
            })
            .collect();
        for transceiver in transceivers {
            if let Err(e) = transceiver.stop().await {
                warn!("Failed to stop transceiver: {}", e);
            }
        }
        Ok(())
    }

    async fn get_stats(&self) -> Result<Vec<StatsEntry>> {
        let report = self.pc.get_stats().await;
        let timestamp_ms = self.timestamp_ms();

        let entries = report
            .reports
            .into_values()
            .filter_map(|entry| stats_entry(entry, timestamp_ms))
            .collect();
        Ok(entries)
    }

    async fn close(&self) -> Result<()> {
        self.remote_streams.lock().clear();
        self.pc
            .close()
            .await
            .map_err(|e| Error::ConnectionFailed(format!("Failed to close connection: {}", e)))
    }
}

/// Map a webrtc-rs report onto the entries the bandwidth controller samples.
/// RTP entries are keyed by the application track id, not the stats id.
fn stats_entry(report: StatsReportType, timestamp_ms: f64) -> Option<StatsEntry> {
    match report {
        StatsReportType::InboundRTP(stats) => Some(StatsEntry::InboundRtp {
            kind: TrackKind::parse(&stats.kind)?,
            track_id: stats.track_identifier,
            bytes_received: stats.bytes_received,
            timestamp_ms,
        }),
        StatsReportType::OutboundRTP(stats) => Some(StatsEntry::OutboundRtp {
            kind: TrackKind::parse(&stats.kind)?,
            track_id: stats.track_identifier,
            rid: stats.rid.map(|rid| rid.to_string()),
            bytes_sent: stats.bytes_sent,
            // webrtc-rs does not encode, so it never reports a limitation
            quality_limitation_reason: None,
            timestamp_ms,
        }),
        StatsReportType::CandidatePair(stats) => Some(StatsEntry::CandidatePair {
            available_outgoing_bitrate: (stats.available_outgoing_bitrate > 0.0)
                .then_some(stats.available_outgoing_bitrate),
        }),
        _ => None,
    }
}

pub struct NativeDataChannel {
    inner: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannel for NativeDataChannel {
    fn label(&self) -> String {
        self.inner.label().to_string()
    }

    fn is_open(&self) -> bool {
        self.inner.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, text: String) -> Result<()> {
        self.inner
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|e| Error::DataChannel(format!("Failed to send: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::Encoding;
    use webrtc::stats::{OutboundRTPStats, RTCStatsType};

    #[test]
    fn ice_servers_map_credentials() {
        let servers = rtc_ice_servers(&[
            IceServerConfig {
                urls: vec!["stun:stun.example.org:3478".into()],
                username: None,
                credential: None,
            },
            IceServerConfig {
                urls: vec!["turn:turn.example.org:3478?transport=udp".into()],
                username: Some("user".into()),
                credential: Some("pass".into()),
            },
        ]);
        assert_eq!(servers.len(), 2);
        assert!(servers[0].username.is_empty());
        assert_eq!(servers[1].credential, "pass");
    }

    #[test]
    fn description_conversion() {
        let sdp = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";
        let rtc = to_rtc_description(SessionDescription::answer(sdp)).unwrap();
        assert_eq!(rtc.sdp_type, RTCSdpType::Answer);
        assert_eq!(
            from_rtc_description(rtc),
            Some(SessionDescription::answer(sdp))
        );
    }

    #[test]
    fn ice_state_mapping() {
        assert_eq!(
            ice_state(RTCIceConnectionState::Completed),
            Some(IceConnectionState::Completed)
        );
        assert_eq!(ice_state(RTCIceConnectionState::Unspecified), None);
    }

    #[test]
    fn opus_is_first_audio_codec() {
        let audio = supported_codecs(TrackKind::Audio);
        assert_eq!(audio[0].mime_type, MIME_TYPE_OPUS);
        assert!(supported_codecs(TrackKind::Video)
            .iter()
            .any(|c| c.mime_type == MIME_TYPE_VP8));
    }

    #[tokio::test]
    async fn offer_carries_local_tracks() {
        let factory = NativePeerConnectionFactory::new().unwrap();
        let (pc, _events) = factory.create(Vec::new()).await.unwrap();

        let audio = MediaTrack::new("mic", TrackKind::Audio);
        let info = pc
            .add_transceiver(
                "cam",
                &audio,
                TransceiverInit::send_only(vec![Encoding::default()]),
            )
            .await
            .unwrap();
        assert_eq!(info.sender_track_id.as_deref(), Some("mic"));
        assert_eq!(info.stream_id, "cam");
        assert!(factory.sample_writer("mic").is_some());

        let offer = pc.create_offer(false).await.unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert!(offer.sdp.contains("m=audio"));

        assert!(pc.remove_sender("mic").await.unwrap());
        assert!(!pc.remove_sender("mic").await.unwrap());
        assert!(factory.sample_writer("mic").is_none());
        pc.close().await.unwrap();
    }

    #[tokio::test]
    async fn offer_announces_tracks_under_their_stream_key() {
        let factory = NativePeerConnectionFactory::new().unwrap();
        let (pc, _events) = factory.create(Vec::new()).await.unwrap();

        let cam = MediaTrack::new("cam-video", TrackKind::Video);
        let screen = MediaTrack::new("screen-video", TrackKind::Video);
        let init = || TransceiverInit::send_only(vec![Encoding::default()]);
        pc.add_transceiver("cam", &cam, init()).await.unwrap();
        let info = pc.add_transceiver("screen", &screen, init()).await.unwrap();

        let offer = pc.create_offer(false).await.unwrap();
        let msids: Vec<&str> = offer
            .sdp
            .lines()
            .filter(|l| l.starts_with("a=msid:"))
            .collect();
        assert!(msids.contains(&"a=msid:cam cam-video"), "{:?}", msids);
        assert!(msids.contains(&"a=msid:screen screen-video"), "{:?}", msids);

        // A replacement track keeps the stream it was announced under
        let display = MediaTrack::new("display-video", TrackKind::Video);
        pc.replace_sender_track(&info.id, &display).await.unwrap();
        let transceivers = pc.transceivers().await;
        let replaced = transceivers.iter().find(|t| t.id == info.id).unwrap();
        assert_eq!(replaced.stream_id, "screen");
        assert_eq!(replaced.sender_track_id.as_deref(), Some("display-video"));
        pc.close().await.unwrap();
    }

    fn outbound(kind: &str, rid: Option<&str>) -> StatsReportType {
        StatsReportType::OutboundRTP(OutboundRTPStats {
            timestamp: tokio::time::Instant::now(),
            stats_type: RTCStatsType::OutboundRTP,
            id: "RTCOutboundRTPVideoStream_1234".to_string(),
            ssrc: 1234,
            kind: kind.to_string(),
            packets_sent: 10,
            bytes_sent: 12_000,
            track_identifier: "cam-video".to_string(),
            mid: "0".into(),
            rid: rid.map(Into::into),
            header_bytes_sent: 120,
            nack_count: 0,
            fir_count: None,
            pli_count: None,
        })
    }

    #[test]
    fn outbound_stats_keyed_by_track_and_layer() {
        let entry = stats_entry(outbound("video", Some("high")), 250.0);
        assert_eq!(
            entry,
            Some(StatsEntry::OutboundRtp {
                track_id: "cam-video".to_string(),
                kind: TrackKind::Video,
                rid: Some("high".to_string()),
                bytes_sent: 12_000,
                quality_limitation_reason: None,
                timestamp_ms: 250.0,
            })
        );

        match stats_entry(outbound("audio", None), 0.0) {
            Some(StatsEntry::OutboundRtp { rid, kind, .. }) => {
                assert_eq!(rid, None);
                assert_eq!(kind, TrackKind::Audio);
            }
            other => panic!("unexpected entry {:?}", other),
        }
        assert_eq!(stats_entry(outbound("data", None), 0.0), None);
    }
}
