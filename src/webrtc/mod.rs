//! WebRTC peer session and the seams it drives
//!
//! This module provides:
//! - The [`PeerConnection`] / [`PeerConnectionFactory`] traits the session
//!   talks to, with a webrtc-rs implementation behind `webrtc-native`
//! - SDP/ICE value types shared with the control plane
//! - The peer session, encoding selection and bandwidth estimation
//! - Push-channel payload decoding

pub mod bandwidth;
pub mod data_channel;
pub mod encoding;
#[cfg(feature = "webrtc-native")]
pub mod peer_connection;
pub mod session;
pub mod signaling;

pub use bandwidth::BandwidthController;
pub use session::{NegotiationOutcome, PeerSession};
pub use signaling::PushEvent;

use crate::config::IceServerConfig;
use crate::error::Result;
use crate::media::{MediaStream, MediaTrack, TrackKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
}

/// An SDP offer or answer, `{"type": "...", "sdp": "..."}` on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate init, accepting both camelCase and snake_case keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", alias = "sdp_mid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", alias = "sdp_mline_index", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", alias = "username_fragment", default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl IceConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, IceConnectionState::Connected | IceConnectionState::Completed)
    }
}

impl fmt::Display for IceConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IceConnectionState::New => "new",
            IceConnectionState::Checking => "checking",
            IceConnectionState::Connected => "connected",
            IceConnectionState::Completed => "completed",
            IceConnectionState::Disconnected => "disconnected",
            IceConnectionState::Failed => "failed",
            IceConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransceiverDirection {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

/// One RTP encoding of an outgoing track
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Encoding {
    /// Simulcast layer name (`high`, `mid`, `low`)
    pub rid: Option<String>,
    /// Bits per second
    pub max_bitrate: Option<u32>,
    pub scale_resolution_down_by: Option<f64>,
    pub scalability_mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransceiverInit {
    pub direction: TransceiverDirection,
    pub send_encodings: Vec<Encoding>,
}

impl TransceiverInit {
    pub fn send_only(send_encodings: Vec<Encoding>) -> Self {
        Self {
            direction: TransceiverDirection::SendOnly,
            send_encodings,
        }
    }
}

/// Snapshot of a transceiver carrying a local track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransceiverInfo {
    pub id: String,
    pub kind: TrackKind,
    /// Stream key the sender's tracks are announced under (the msid)
    pub stream_id: String,
    /// Id of the track currently attached to the sender
    pub sender_track_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecCapability {
    pub mime_type: String,
    pub clock_rate: u32,
    pub channels: u16,
    pub sdp_fmtp_line: String,
}

impl CodecCapability {
    pub fn new(mime_type: impl Into<String>, clock_rate: u32, channels: u16) -> Self {
        Self {
            mime_type: mime_type.into(),
            clock_rate,
            channels,
            sdp_fmtp_line: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityLimitationReason {
    None,
    Cpu,
    Bandwidth,
    Other,
}

/// The subset of connection statistics the bandwidth controller reads
#[derive(Debug, Clone, PartialEq)]
pub enum StatsEntry {
    InboundRtp {
        track_id: String,
        kind: TrackKind,
        bytes_received: u64,
        timestamp_ms: f64,
    },
    OutboundRtp {
        track_id: String,
        kind: TrackKind,
        rid: Option<String>,
        bytes_sent: u64,
        quality_limitation_reason: Option<QualityLimitationReason>,
        timestamp_ms: f64,
    },
    CandidatePair {
        available_outgoing_bitrate: Option<f64>,
    },
}

/// Events raised by a peer connection
pub enum PeerConnectionEvent {
    IceConnectionState(IceConnectionState),
    /// A remote track arrived, with the stream groups it belongs to.
    Track {
        track: MediaTrack,
        streams: Vec<MediaStream>,
    },
    /// A remotely created data channel finished opening.
    DataChannel(Arc<dyn DataChannel>),
    /// A local candidate was gathered.
    IceCandidate(IceCandidate),
}

impl fmt::Debug for PeerConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerConnectionEvent::IceConnectionState(state) => {
                f.debug_tuple("IceConnectionState").field(state).finish()
            }
            PeerConnectionEvent::Track { track, streams } => f
                .debug_struct("Track")
                .field("track", track)
                .field("streams", streams)
                .finish(),
            PeerConnectionEvent::DataChannel(channel) => {
                f.debug_tuple("DataChannel").field(&channel.label()).finish()
            }
            PeerConnectionEvent::IceCandidate(candidate) => {
                f.debug_tuple("IceCandidate").field(candidate).finish()
            }
        }
    }
}

/// A data channel as seen by the session
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> String;

    fn is_open(&self) -> bool;

    async fn send_text(&self, text: String) -> Result<()>;
}

/// The RTCPeerConnection operations the session relies on
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn local_description(&self) -> Option<SessionDescription>;

    async fn remote_description(&self) -> Option<SessionDescription>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Attach a local track on a new transceiver, announced as part of
    /// `stream_id`.
    async fn add_transceiver(
        &self,
        stream_id: &str,
        track: &MediaTrack,
        init: TransceiverInit,
    ) -> Result<TransceiverInfo>;

    /// Transceivers carrying local tracks.
    async fn transceivers(&self) -> Vec<TransceiverInfo>;

    /// Codecs the connection can send for `kind`.
    fn codec_capabilities(&self, kind: TrackKind) -> Vec<CodecCapability>;

    /// Apply a codec order to a transceiver. `Ok(false)` when the
    /// implementation cannot apply preferences.
    async fn set_codec_preferences(
        &self,
        transceiver_id: &str,
        codecs: &[CodecCapability],
    ) -> Result<bool>;

    /// Whether a named scalability mode (SVC) is honoured on send encodings.
    fn supports_scalability_mode(&self) -> bool;

    async fn replace_sender_track(&self, transceiver_id: &str, track: &MediaTrack) -> Result<()>;

    /// Remove the sender currently carrying `track_id`. `Ok(false)` if none.
    async fn remove_sender(&self, track_id: &str) -> Result<bool>;

    async fn stop_transceivers(&self) -> Result<()>;

    async fn get_stats(&self) -> Result<Vec<StatsEntry>>;

    async fn close(&self) -> Result<()>;
}

/// Creates connections together with their event stream
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        ice_servers: Vec<IceServerConfig>,
    ) -> Result<(
        Arc<dyn PeerConnection>,
        mpsc::UnboundedReceiver<PeerConnectionEvent>,
    )>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_wire_format() {
        let json = serde_json::to_value(SessionDescription::answer("v=0")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "answer", "sdp": "v=0"}));
        let parsed: SessionDescription =
            serde_json::from_str(r#"{"type":"offer","sdp":"v=0\r\n"}"#).unwrap();
        assert_eq!(parsed.sdp_type, SdpType::Offer);
    }

    #[test]
    fn candidate_accepts_both_key_styles() {
        let camel: IceCandidate = serde_json::from_str(
            r#"{"candidate":"candidate:1 1 udp 1 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}"#,
        )
        .unwrap();
        let snake: IceCandidate = serde_json::from_str(
            r#"{"candidate":"candidate:1 1 udp 1 10.0.0.1 5000 typ host","sdp_mid":"0","sdp_mline_index":0}"#,
        )
        .unwrap();
        assert_eq!(camel, snake);
        assert_eq!(camel.sdp_mline_index, Some(0));
    }

    #[test]
    fn connected_states() {
        assert!(IceConnectionState::Connected.is_connected());
        assert!(IceConnectionState::Completed.is_connected());
        assert!(!IceConnectionState::Disconnected.is_connected());
    }
}
