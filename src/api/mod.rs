//! REST control plane
//!
//! [`ControlPlane`] is the set of room/client calls the session makes;
//! [`http::HttpControlPlane`] implements it over reqwest.

pub mod auth;
pub mod http;

pub use auth::{StaticToken, TokenProvider};
pub use http::HttpControlPlane;

use crate::config::Bitrates;
use crate::error::Result;
use crate::webrtc::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Normalised control-plane response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub code: u16,
    pub ok: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

impl ApiResponse {
    /// Error carrying this response's code and message
    pub fn to_error(&self) -> crate::error::Error {
        crate::error::Error::Api {
            code: self.code,
            message: self.message.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateRoomRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Server-side room options, passed through untouched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Room {
    #[serde(alias = "room_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RegisterClientRequest {
    #[serde(rename = "uid", skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_vad: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegisteredClient {
    pub client_id: String,
    #[serde(default)]
    pub name: String,
    /// Server-assigned ceilings; replace the configured ones when present
    #[serde(default)]
    pub bitrates: Option<Bitrates>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientInfo {
    pub client_id: String,
    #[serde(default)]
    pub name: String,
}

/// Source label for a published track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSource {
    pub track_id: String,
    pub source: String,
}

/// A remote track to receive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSubscription {
    pub client_id: String,
    pub stream_id: String,
    pub track_id: String,
}

/// Room/client operations on the media server
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn create_room(&self, request: CreateRoomRequest) -> Result<Room>;

    async fn get_room(&self, room_id: &str) -> Result<Room>;

    async fn register_client(
        &self,
        room_id: &str,
        request: RegisterClientRequest,
    ) -> Result<RegisteredClient>;

    /// Fails with `Error::Api { code: 404, .. }` once the client is gone.
    async fn get_client(&self, room_id: &str, client_id: &str) -> Result<ClientInfo>;

    async fn set_client_name(&self, room_id: &str, client_id: &str, name: &str)
        -> Result<ClientInfo>;

    async fn get_metadata(&self, room_id: &str) -> Result<Map<String, Value>>;

    async fn set_metadata(&self, room_id: &str, metadata: Map<String, Value>) -> Result<()>;

    async fn delete_metadata(&self, room_id: &str, key: &str) -> Result<()>;

    async fn send_ice_candidate(
        &self,
        room_id: &str,
        client_id: &str,
        candidate: &IceCandidate,
    ) -> Result<()>;

    /// `Ok(false)` when the server refuses renegotiation for now.
    async fn check_negotiate_allowed(&self, room_id: &str, client_id: &str) -> Result<bool>;

    /// Send the local description. Returns the server's answer when the
    /// description was an offer; answers to server offers get `None`.
    async fn negotiate_connection(
        &self,
        room_id: &str,
        client_id: &str,
        description: &SessionDescription,
    ) -> Result<Option<SessionDescription>>;

    async fn set_track_sources(
        &self,
        room_id: &str,
        client_id: &str,
        sources: Vec<TrackSource>,
    ) -> Result<()>;

    async fn subscribe_tracks(
        &self,
        room_id: &str,
        client_id: &str,
        tracks: Vec<TrackSubscription>,
    ) -> Result<()>;

    /// With `use_beacon`, fire the request and return without waiting.
    async fn leave_room(&self, room_id: &str, client_id: &str, use_beacon: bool) -> Result<()>;

    async fn end_room(&self, room_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_client_bitrates_are_optional() {
        let plain: RegisteredClient =
            serde_json::from_value(serde_json::json!({"client_id": "c1", "name": "alice"})).unwrap();
        assert!(plain.bitrates.is_none());

        let with_bitrates: RegisteredClient = serde_json::from_value(serde_json::json!({
            "client_id": "c1",
            "bitrates": {"audio": 32000, "video_high": 900000}
        }))
        .unwrap();
        let bitrates = with_bitrates.bitrates.unwrap();
        assert_eq!(bitrates.audio, 32_000);
        assert_eq!(bitrates.video_high, 900_000);
        assert_eq!(bitrates.video_low, Bitrates::default().video_low);
    }

    #[test]
    fn register_request_uses_uid_key() {
        let body = serde_json::to_value(RegisterClientRequest {
            client_id: Some("c1".into()),
            name: None,
            enable_vad: Some(true),
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"uid": "c1", "enable_vad": true}));
    }

    #[test]
    fn room_keeps_unknown_fields() {
        let room: Room = serde_json::from_value(serde_json::json!({
            "room_id": "r1",
            "name": "standup",
            "codecs": ["audio/opus"]
        }))
        .unwrap();
        assert_eq!(room.id, "r1");
        assert!(room.extra.contains_key("codecs"));
    }
}
