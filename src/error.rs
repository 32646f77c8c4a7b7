//! Crate-wide error type.

use thiserror::Error;

/// Errors surfaced by the room client core.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad room/client id, stream key, stream descriptor or track type.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The peer session has no live connection.
    #[error("Peer session is not connected")]
    NotConnected,

    /// No local media stream is registered.
    #[error("Local media stream not found")]
    LocalMediaNotFound,

    /// Peer connection creation or teardown failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// SDP processing failed
    #[error("SDP error: {0}")]
    Sdp(String),

    /// ICE candidate processing failed
    #[error("ICE error: {0}")]
    Ice(String),

    /// Data channel error
    #[error("DataChannel error: {0}")]
    DataChannel(String),

    /// Media track error
    #[error("Media error: {0}")]
    Media(String),

    /// Invalid state transition
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The control plane answered with a non-OK response.
    #[error("API error {code}: {message}")]
    Api { code: u16, message: String },

    /// Transport-level HTTP failure (no response received).
    #[error("HTTP error: {0}")]
    Http(String),

    /// Push channel failure.
    #[error("Signaling error: {0}")]
    Signaling(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Feature not enabled
    #[error("WebRTC native feature is not enabled")]
    FeatureDisabled,
}

impl Error {
    /// True for a control-plane 404 (room or client no longer exists).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Api { code: 404, .. })
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Http(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
