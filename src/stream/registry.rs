//! Authoritative store of active streams and in-flight drafts
//!
//! Each stream id maps to exactly one [`StreamEntry`]. A draft becomes an
//! active stream only through [`StreamRegistry::promote`], which requires
//! [`StreamRegistry::validate_stream`] to pass; readers of active streams
//! never see drafts.

use super::{DraftStream, Stream, StreamDescriptor};
use crate::error::{Error, Result};
use std::collections::HashMap;

/// State of one stream id
#[derive(Debug, Clone)]
pub enum StreamEntry {
    Draft(DraftStream),
    Active(Stream),
}

#[derive(Debug, Default)]
pub struct StreamRegistry {
    entries: HashMap<String, StreamEntry>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an active stream, replacing any draft for the same id.
    pub fn add_stream(&mut self, stream: Stream) -> Option<Stream> {
        match self.entries.insert(stream.id.clone(), StreamEntry::Active(stream)) {
            Some(StreamEntry::Active(previous)) => Some(previous),
            _ => None,
        }
    }

    /// Remove an active stream. Drafts are left untouched.
    pub fn remove_stream(&mut self, key: &str) -> Option<Stream> {
        match self.entries.get(key) {
            Some(StreamEntry::Active(_)) => match self.entries.remove(key) {
                Some(StreamEntry::Active(stream)) => Some(stream),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn get_stream(&self, key: &str) -> Option<&Stream> {
        match self.entries.get(key) {
            Some(StreamEntry::Active(stream)) => Some(stream),
            _ => None,
        }
    }

    /// Linear scan for the active stream containing `track_id`.
    pub fn get_stream_by_track_id(&self, track_id: &str) -> Option<&Stream> {
        self.active().find(|stream| stream.has_track(track_id))
    }

    pub fn get_all_streams(&self) -> Vec<Stream> {
        self.active().cloned().collect()
    }

    pub fn has_stream(&self, key: &str) -> bool {
        matches!(self.entries.get(key), Some(StreamEntry::Active(_)))
    }

    pub fn get_total_streams(&self) -> usize {
        self.active().count()
    }

    /// Merge `partial` into the draft for `key`, creating it if needed.
    ///
    /// Fields already present on the draft win; absent fields never erase
    /// present ones. Returns the merged draft. Fails when `key` already names
    /// an active stream.
    pub fn add_draft(&mut self, key: &str, partial: DraftStream) -> Result<DraftStream> {
        Self::validate_key(key)?;
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StreamEntry::Draft(DraftStream::default()));
        match entry {
            StreamEntry::Draft(draft) => {
                draft.merge(partial);
                Ok(draft.clone())
            }
            StreamEntry::Active(_) => Err(Error::InvalidState(format!(
                "stream {} is already active",
                key
            ))),
        }
    }

    pub fn get_draft(&self, key: &str) -> Option<&DraftStream> {
        match self.entries.get(key) {
            Some(StreamEntry::Draft(draft)) => Some(draft),
            _ => None,
        }
    }

    pub fn remove_draft(&mut self, key: &str) -> Option<DraftStream> {
        match self.entries.get(key) {
            Some(StreamEntry::Draft(_)) => match self.entries.remove(key) {
                Some(StreamEntry::Draft(draft)) => Some(draft),
                _ => None,
            },
            _ => None,
        }
    }

    /// Turn the draft for `key` into an active stream if it validates.
    ///
    /// Returns the new stream on the transition, `None` otherwise (no draft,
    /// already active, or still incomplete).
    pub fn promote(&mut self, key: &str) -> Option<Stream> {
        let descriptor = match self.entries.get(key) {
            Some(StreamEntry::Draft(draft)) if Self::validate_stream(draft) => {
                draft.to_descriptor()?
            }
            _ => return None,
        };
        let stream = Stream::new(key, descriptor);
        self.entries
            .insert(key.to_string(), StreamEntry::Active(stream.clone()));
        Some(stream)
    }

    /// Drop every entry, returning the active streams that were removed.
    pub fn clear(&mut self) -> Vec<Stream> {
        self.entries
            .drain()
            .filter_map(|(_, entry)| match entry {
                StreamEntry::Active(stream) => Some(stream),
                StreamEntry::Draft(_) => None,
            })
            .collect()
    }

    /// A candidate is valid when it carries a track container, a non-empty
    /// client id, a (possibly empty) name, an origin and a source.
    pub fn validate_stream(candidate: &DraftStream) -> bool {
        match candidate.to_descriptor() {
            Some(descriptor) => Self::validate_descriptor(&descriptor),
            None => false,
        }
    }

    pub fn validate_descriptor(descriptor: &StreamDescriptor) -> bool {
        !descriptor.client_id.is_empty() && !descriptor.media.id().is_empty()
    }

    pub fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidInput("stream key must be a non-empty string".to_string()));
        }
        Ok(())
    }

    fn active(&self) -> impl Iterator<Item = &Stream> {
        self.entries.values().filter_map(|entry| match entry {
            StreamEntry::Active(stream) => Some(stream),
            StreamEntry::Draft(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaStream, MediaTrack, TrackKind};
    use crate::stream::{StreamOrigin, StreamSource};

    fn media(id: &str) -> MediaStream {
        MediaStream::new(
            id,
            vec![
                MediaTrack::new(format!("{}-audio", id), TrackKind::Audio),
                MediaTrack::new(format!("{}-video", id), TrackKind::Video),
            ],
        )
    }

    fn local(id: &str) -> Stream {
        Stream::new(
            id,
            StreamDescriptor {
                client_id: "client-1".to_string(),
                name: "alice".to_string(),
                origin: StreamOrigin::Local,
                source: StreamSource::Media,
                media: media(id),
            },
        )
    }

    #[test]
    fn test_keyed_collection() {
        let mut registry = StreamRegistry::new();
        registry.add_stream(local("s1"));
        registry.add_stream(local("s2"));

        assert!(registry.has_stream("s1"));
        assert_eq!(registry.get_total_streams(), 2);
        assert_eq!(registry.get_all_streams().len(), 2);
        assert_eq!(registry.get_stream_by_track_id("s2-video").unwrap().id, "s2");
        assert!(registry.get_stream_by_track_id("nope").is_none());

        let removed = registry.remove_stream("s1").unwrap();
        assert_eq!(removed.id, "s1");
        assert!(registry.remove_stream("s1").is_none());
        assert_eq!(registry.get_total_streams(), 1);
    }

    #[test]
    fn test_draft_merge_is_first_write_wins() {
        let mut registry = StreamRegistry::new();
        registry
            .add_draft(
                "s1",
                DraftStream {
                    source: Some(StreamSource::Screen),
                    name: Some("first".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        let merged = registry
            .add_draft(
                "s1",
                DraftStream {
                    source: Some(StreamSource::Media),
                    name: None,
                    client_id: Some("c1".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(merged.source, Some(StreamSource::Screen));
        assert_eq!(merged.name.as_deref(), Some("first"));
        assert_eq!(merged.client_id.as_deref(), Some("c1"));
        // Drafts are not visible as streams.
        assert!(!registry.has_stream("s1"));
        assert_eq!(registry.get_total_streams(), 0);
    }

    #[test]
    fn test_draft_promotion_happens_once() {
        let mut registry = StreamRegistry::new();
        registry
            .add_draft(
                "s1",
                DraftStream {
                    source: Some(StreamSource::Media),
                    origin: Some(StreamOrigin::Remote),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(registry.promote("s1").is_none());

        let merged = registry
            .add_draft(
                "s1",
                DraftStream {
                    client_id: Some("c9".to_string()),
                    name: Some("bob".to_string()),
                    media: Some(media("s1")),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(StreamRegistry::validate_stream(&merged));

        let stream = registry.promote("s1").unwrap();
        assert_eq!(stream.client_id, "c9");
        assert_eq!(stream.origin, StreamOrigin::Remote);
        assert!(registry.get_draft("s1").is_none());
        assert!(registry.promote("s1").is_none());
        assert!(registry.add_draft("s1", DraftStream::default()).is_err());
    }

    #[test]
    fn test_validate_stream_rules() {
        let mut candidate = DraftStream {
            client_id: Some(String::new()),
            name: Some(String::new()),
            origin: Some(StreamOrigin::Remote),
            source: Some(StreamSource::Media),
            media: Some(media("m")),
        };
        assert!(!StreamRegistry::validate_stream(&candidate));
        candidate.client_id = Some("c".to_string());
        assert!(StreamRegistry::validate_stream(&candidate));
        candidate.name = None;
        assert!(!StreamRegistry::validate_stream(&candidate));
    }

    #[test]
    fn test_validate_key() {
        assert!(StreamRegistry::validate_key("").is_err());
        assert!(StreamRegistry::validate_key("abc").is_ok());
    }

    #[test]
    fn test_clear_returns_active_only() {
        let mut registry = StreamRegistry::new();
        registry.add_stream(local("s1"));
        registry.add_draft("d1", DraftStream::default()).unwrap();
        let cleared = registry.clear();
        assert_eq!(cleared.len(), 1);
        assert!(registry.get_draft("d1").is_none());
    }
}
