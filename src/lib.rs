//! roomrtc-core - WebRTC room client
//!
//! Joins a room on a media server: REST control plane for room and client
//! calls, a server-sent-events push channel for signaling, and a webrtc-rs
//! peer connection for media.

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod room;
pub mod stream;
pub mod transport;
pub mod webrtc;

#[cfg(test)]
mod testing;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use events::{ChannelCloseReason, Event, EventBus};
pub use media::{MediaStream, MediaTrack, TrackKind};
pub use room::{RoomClient, RoomClientBuilder};
pub use stream::{Stream, StreamDescriptor, StreamSource};
pub use webrtc::{BandwidthController, PeerSession};
