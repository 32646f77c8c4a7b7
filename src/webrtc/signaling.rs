//! Push-channel events
//!
//! The server pushes named events (`candidate`, `offer`, `tracks_added`,
//! `tracks_available`, `meta_changed`, `allowed_renegotiation`), each with a
//! JSON payload. [`PushEvent::parse`] turns one of them into a typed value.

use super::{IceCandidate, SessionDescription};
use crate::error::{Error, Result};
use crate::stream::StreamSource;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One track announced by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackAnnouncement {
    #[serde(default)]
    pub track_id: String,
    #[serde(default)]
    pub stream_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

impl TrackAnnouncement {
    pub fn stream_source(&self) -> Option<StreamSource> {
        self.source.as_deref().and_then(StreamSource::parse)
    }
}

#[derive(Debug, Deserialize)]
struct TracksPayload {
    #[serde(default)]
    tracks: BTreeMap<String, TrackAnnouncement>,
}

impl TracksPayload {
    fn into_announcements(self) -> Vec<TrackAnnouncement> {
        self.tracks
            .into_iter()
            .map(|(key, mut track)| {
                if track.track_id.is_empty() {
                    track.track_id = key;
                }
                track
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// Remote ICE candidate
    Candidate(IceCandidate),

    /// Server-initiated offer
    Offer(SessionDescription),

    /// Local tracks were registered server-side and need a source label
    TracksAdded(Vec<TrackAnnouncement>),

    /// Remote tracks can be subscribed to
    TracksAvailable(Vec<TrackAnnouncement>),

    /// One room metadata key changed
    MetaChanged { key: String, data: Value },

    /// A previously refused negotiation may proceed
    AllowedRenegotiation,
}

impl PushEvent {
    /// Decode a push event. Unknown event names yield `Ok(None)`.
    pub fn parse(event: &str, data: &str) -> Result<Option<Self>> {
        let parsed = match event {
            "candidate" => PushEvent::Candidate(from_json(event, data)?),
            "offer" => PushEvent::Offer(from_json(event, data)?),
            "tracks_added" => {
                PushEvent::TracksAdded(from_json::<TracksPayload>(event, data)?.into_announcements())
            }
            "tracks_available" => PushEvent::TracksAvailable(
                from_json::<TracksPayload>(event, data)?.into_announcements(),
            ),
            "meta_changed" => {
                let object: serde_json::Map<String, Value> = from_json(event, data)?;
                let (key, data) = object.into_iter().next().ok_or_else(|| {
                    Error::Signaling("meta_changed payload carries no key".to_string())
                })?;
                PushEvent::MetaChanged { key, data }
            }
            "allowed_renegotiation" => PushEvent::AllowedRenegotiation,
            _ => return Ok(None),
        };
        Ok(Some(parsed))
    }

    pub fn name(&self) -> &'static str {
        match self {
            PushEvent::Candidate(_) => "candidate",
            PushEvent::Offer(_) => "offer",
            PushEvent::TracksAdded(_) => "tracks_added",
            PushEvent::TracksAvailable(_) => "tracks_available",
            PushEvent::MetaChanged { .. } => "meta_changed",
            PushEvent::AllowedRenegotiation => "allowed_renegotiation",
        }
    }
}

fn from_json<T: serde::de::DeserializeOwned>(event: &str, data: &str) -> Result<T> {
    serde_json::from_str(data)
        .map_err(|e| Error::Signaling(format!("Invalid {} payload: {}", event, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::SdpType;

    #[test]
    fn test_parse_candidate() {
        let event = PushEvent::parse(
            "candidate",
            r#"{"candidate":"candidate:1 1 udp 2122260223 192.168.1.2 54321 typ host","sdpMid":"0","sdpMLineIndex":0}"#,
        )
        .unwrap()
        .unwrap();
        match event {
            PushEvent::Candidate(candidate) => {
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert!(candidate.candidate.contains("typ host"));
            }
            other => panic!("Wrong event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_offer() {
        let event = PushEvent::parse("offer", r#"{"type":"offer","sdp":"v=0\r\n"}"#)
            .unwrap()
            .unwrap();
        match event {
            PushEvent::Offer(offer) => assert_eq!(offer.sdp_type, SdpType::Offer),
            other => panic!("Wrong event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_tracks_available() {
        let data = r#"{"tracks":{
            "t-audio":{"track_id":"t-audio","stream_id":"s1","client_id":"c2","client_name":"bob","source":"media"},
            "t-screen":{"stream_id":"s2","client_id":"c2","source":"screen"}
        }}"#;
        let event = PushEvent::parse("tracks_available", data).unwrap().unwrap();
        let PushEvent::TracksAvailable(tracks) = event else {
            panic!("Wrong event");
        };
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].client_name.as_deref(), Some("bob"));
        // Missing track_id falls back to the map key
        assert_eq!(tracks[1].track_id, "t-screen");
        assert_eq!(tracks[1].stream_source(), Some(StreamSource::Screen));
    }

    #[test]
    fn test_parse_meta_changed() {
        let event = PushEvent::parse("meta_changed", r#"{"topic":{"title":"standup"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            PushEvent::MetaChanged {
                key: "topic".into(),
                data: serde_json::json!({"title": "standup"}),
            }
        );
        assert!(PushEvent::parse("meta_changed", "{}").is_err());
    }

    #[test]
    fn test_allowed_renegotiation_ignores_payload() {
        let event = PushEvent::parse("allowed_renegotiation", "").unwrap();
        assert_eq!(event, Some(PushEvent::AllowedRenegotiation));
    }

    #[test]
    fn test_unknown_and_invalid() {
        assert!(PushEvent::parse("heartbeat", "{}").unwrap().is_none());
        assert!(PushEvent::parse("offer", "not json").is_err());
    }
}
