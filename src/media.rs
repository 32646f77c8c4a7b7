//! Media track and track-container handles
//!
//! `MediaTrack` and `MediaStream` are cheap, clonable handles: every clone
//! observes the same enabled flag, ended signal and track list.

use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }

    /// Parse the `kind` string reported by stats and SDP.
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "audio" => Some(TrackKind::Audio),
            "video" => Some(TrackKind::Video),
            _ => None,
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct TrackInner {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    ended: watch::Sender<bool>,
}

/// A single audio or video track
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        let (ended, _) = watch::channel(false);
        Self {
            inner: Arc::new(TrackInner {
                id: id.into(),
                kind,
                enabled: AtomicBool::new(true),
                ended,
            }),
        }
    }

    /// Create a track with a random id.
    pub fn generate(kind: TrackKind) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), kind)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Stop the track. Idempotent; wakes every `ended()` waiter.
    pub fn stop(&self) {
        self.inner.ended.send_replace(true);
    }

    pub fn is_ended(&self) -> bool {
        *self.inner.ended.borrow()
    }

    /// Resolves once the track has ended.
    pub async fn ended(&self) {
        let mut rx = self.inner.ended.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = rx.wait_for(|ended| *ended).await;
    }

    /// True when both handles point at the same track.
    pub fn same_track(&self, other: &MediaTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("enabled", &self.is_enabled())
            .field("ended", &self.is_ended())
            .finish()
    }
}

struct StreamInner {
    id: String,
    tracks: RwLock<Vec<MediaTrack>>,
    changed: watch::Sender<u64>,
}

/// Ordered group of tracks sharing one transport-level stream id
#[derive(Clone)]
pub struct MediaStream {
    inner: Arc<StreamInner>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            inner: Arc::new(StreamInner {
                id: id.into(),
                tracks: RwLock::new(tracks),
                changed,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.inner.tracks.read().clone()
    }

    pub fn audio_tracks(&self) -> Vec<MediaTrack> {
        self.tracks_of(TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> Vec<MediaTrack> {
        self.tracks_of(TrackKind::Video)
    }

    pub fn tracks_of(&self, kind: TrackKind) -> Vec<MediaTrack> {
        self.inner
            .tracks
            .read()
            .iter()
            .filter(|t| t.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn track_count(&self) -> usize {
        self.inner.tracks.read().len()
    }

    pub fn has_track(&self, track_id: &str) -> bool {
        self.inner.tracks.read().iter().any(|t| t.id() == track_id)
    }

    pub fn add_track(&self, track: MediaTrack) {
        {
            let mut tracks = self.inner.tracks.write();
            if tracks.iter().any(|t| t.id() == track.id()) {
                return;
            }
            tracks.push(track);
        }
        self.bump();
    }

    pub fn remove_track(&self, track_id: &str) -> Option<MediaTrack> {
        let removed = {
            let mut tracks = self.inner.tracks.write();
            let index = tracks.iter().position(|t| t.id() == track_id)?;
            tracks.remove(index)
        };
        self.bump();
        Some(removed)
    }

    /// Swap the track with `old_id` for `track`, keeping its position.
    pub fn replace_track(&self, old_id: &str, track: MediaTrack) -> Option<MediaTrack> {
        let replaced = {
            let mut tracks = self.inner.tracks.write();
            let slot = tracks.iter_mut().find(|t| t.id() == old_id)?;
            std::mem::replace(slot, track)
        };
        self.bump();
        Some(replaced)
    }

    /// At least one track that has not ended.
    pub fn is_active(&self) -> bool {
        self.inner.tracks.read().iter().any(|t| !t.is_ended())
    }

    /// Resolves once every track has ended or the stream holds no tracks.
    pub async fn inactive(&self) {
        let mut changed = self.inner.changed.subscribe();
        loop {
            let tracks = self.tracks();
            if tracks.is_empty() || tracks.iter().all(MediaTrack::is_ended) {
                return;
            }
            let all_ended = join_all(tracks.iter().map(MediaTrack::ended));
            tokio::select! {
                _ = all_ended => {}
                res = changed.changed() => {
                    if res.is_err() {
                        return;
                    }
                }
            }
        }
    }

    fn bump(&self) {
        self.inner.changed.send_modify(|v| *v = v.wrapping_add(1));
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.inner.id)
            .field("tracks", &*self.inner.tracks.read())
            .finish()
    }
}
