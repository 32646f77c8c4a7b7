//! Internal data channel messages
//!
//! The server opens one data channel (labelled `internal` by default) on
//! which the client reports its bandwidth estimate and the rendered size of
//! each remote video so the server can pick a simulcast layer.

use super::DataChannel;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Bandwidth report, sent as a flat JSON object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandwidthReport {
    pub available_outgoing_bitrate: u64,
    pub quality_limitation_reason: String,
}

/// Rendered size of a remote video track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoObservation {
    pub track_id: String,
    pub width: u32,
    pub height: u32,
}

/// Typed messages on the internal channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum InternalMessage {
    VideoSize(VideoObservation),
}

impl InternalMessage {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::DataChannel(format!("Failed to serialize message: {}", e)))
    }
}

/// Reports video sizes over the internal channel, skipping repeats
pub struct VideoObserver {
    channel: Arc<dyn DataChannel>,
    reported: Mutex<HashMap<String, (u32, u32)>>,
}

impl VideoObserver {
    pub fn new(channel: Arc<dyn DataChannel>) -> Self {
        Self {
            channel,
            reported: Mutex::new(HashMap::new()),
        }
    }

    /// Send `observation` unless the same size was already reported for the
    /// track. Returns whether a message went out.
    pub async fn observe(&self, observation: VideoObservation) -> Result<bool> {
        let size = (observation.width, observation.height);
        if self.reported.lock().get(&observation.track_id) == Some(&size) {
            return Ok(false);
        }
        if !self.channel.is_open() {
            return Err(Error::DataChannel("internal channel is not open".to_string()));
        }

        let track_id = observation.track_id.clone();
        let text = InternalMessage::VideoSize(observation).to_json()?;
        self.channel.send_text(text).await?;
        self.reported.lock().insert(track_id, size);
        Ok(true)
    }

    /// Drop the remembered size so the next observation is always sent.
    pub fn forget(&self, track_id: &str) {
        self.reported.lock().remove(track_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDataChannel;

    #[test]
    fn video_size_wire_format() {
        let msg = InternalMessage::VideoSize(VideoObservation {
            track_id: "t1".into(),
            width: 640,
            height: 360,
        });
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "video_size", "data": {"track_id": "t1", "width": 640, "height": 360}})
        );
    }

    #[tokio::test]
    async fn observer_skips_repeated_sizes() {
        let channel = Arc::new(MockDataChannel::open("internal"));
        let observer = VideoObserver::new(channel.clone());
        let obs = VideoObservation {
            track_id: "t1".into(),
            width: 320,
            height: 180,
        };

        assert!(observer.observe(obs.clone()).await.unwrap());
        assert!(!observer.observe(obs.clone()).await.unwrap());
        observer.forget("t1");
        assert!(observer.observe(obs).await.unwrap());
        assert_eq!(channel.sent().len(), 2);
    }

    #[tokio::test]
    async fn observer_requires_open_channel() {
        let channel = Arc::new(MockDataChannel::open("internal"));
        channel.set_open(false);
        let observer = VideoObserver::new(channel);
        let result = observer
            .observe(VideoObservation {
                track_id: "t1".into(),
                width: 1,
                height: 1,
            })
            .await;
        assert!(result.is_err());
    }
}
