//! Stream descriptors and the registry of active and draft streams.

pub mod registry;

pub use registry::{StreamEntry, StreamRegistry};

use crate::media::{MediaStream, MediaTrack};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side produced the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamOrigin {
    Local,
    Remote,
}

/// What the stream carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamSource {
    /// Camera and microphone
    Media,
    Screen,
}

impl StreamSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamSource::Media => "media",
            StreamSource::Screen => "screen",
        }
    }

    pub fn parse(source: &str) -> Option<Self> {
        match source {
            "media" => Some(StreamSource::Media),
            "screen" => Some(StreamSource::Screen),
            _ => None,
        }
    }
}

impl fmt::Display for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to construct a [`Stream`].
///
/// Field presence is checked by [`StreamRegistry::validate_stream`] rather
/// than by the type so that user-supplied descriptors and promoted drafts go
/// through the same gate.
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    pub client_id: String,
    pub name: String,
    pub origin: StreamOrigin,
    pub source: StreamSource,
    pub media: MediaStream,
}

/// One media flow registered with the peer session
#[derive(Debug, Clone)]
pub struct Stream {
    pub id: String,
    pub client_id: String,
    pub name: String,
    pub origin: StreamOrigin,
    pub source: StreamSource,
    pub media: MediaStream,
}

impl Stream {
    pub fn new(id: impl Into<String>, descriptor: StreamDescriptor) -> Self {
        Self {
            id: id.into(),
            client_id: descriptor.client_id,
            name: descriptor.name,
            origin: descriptor.origin,
            source: descriptor.source,
            media: descriptor.media,
        }
    }

    pub fn is_local(&self) -> bool {
        self.origin == StreamOrigin::Local
    }

    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.media.tracks()
    }

    pub fn has_track(&self, track_id: &str) -> bool {
        self.media.has_track(track_id)
    }

    /// Replace the track with `old_id` by `track`; the only mutation a
    /// registered stream allows.
    pub fn replace_track(&self, old_id: &str, track: MediaTrack) -> Option<MediaTrack> {
        self.media.replace_track(old_id, track)
    }
}

/// Partial stream metadata accumulated from the push channel and the
/// peer connection's `track` event, whichever arrives first.
#[derive(Debug, Clone, Default)]
pub struct DraftStream {
    pub client_id: Option<String>,
    pub name: Option<String>,
    pub origin: Option<StreamOrigin>,
    pub source: Option<StreamSource>,
    pub media: Option<MediaStream>,
}

impl DraftStream {
    /// Fill every absent field from `incoming`; present fields are kept.
    pub fn merge(&mut self, incoming: DraftStream) {
        if self.client_id.is_none() {
            self.client_id = incoming.client_id;
        }
        if self.name.is_none() {
            self.name = incoming.name;
        }
        if self.origin.is_none() {
            self.origin = incoming.origin;
        }
        if self.source.is_none() {
            self.source = incoming.source;
        }
        if self.media.is_none() {
            self.media = incoming.media;
        }
    }

    /// Convert into a descriptor when every required field is present.
    pub fn to_descriptor(&self) -> Option<StreamDescriptor> {
        Some(StreamDescriptor {
            client_id: self.client_id.clone()?,
            name: self.name.clone()?,
            origin: self.origin?,
            source: self.source?,
            media: self.media.clone()?,
        })
    }
}
