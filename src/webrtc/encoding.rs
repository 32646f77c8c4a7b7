//! Codec ordering and video encoding selection for local tracks

use super::{CodecCapability, Encoding};
use crate::config::{Bitrates, MediaConfig};

pub const MIME_TYPE_RED: &str = "audio/red";
pub const MIME_TYPE_OPUS: &str = "audio/opus";

/// Used when no preference is configured: redundancy first, then opus.
pub const DEFAULT_AUDIO_PREFERENCE: [&str; 2] = [MIME_TYPE_RED, MIME_TYPE_OPUS];

/// How an outgoing video track is encoded
#[derive(Debug, Clone, PartialEq)]
pub enum VideoEncodingStrategy {
    /// One encoding with a named scalability mode
    Scalable(Encoding),
    /// `high`, `mid` and `low` layers, in that order
    Simulcast(Vec<Encoding>),
    Single(Encoding),
}

impl VideoEncodingStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            VideoEncodingStrategy::Scalable(_) => "scalable",
            VideoEncodingStrategy::Simulcast(_) => "simulcast",
            VideoEncodingStrategy::Single(_) => "single",
        }
    }

    pub fn into_encodings(self) -> Vec<Encoding> {
        match self {
            VideoEncodingStrategy::Scalable(encoding) | VideoEncodingStrategy::Single(encoding) => {
                vec![encoding]
            }
            VideoEncodingStrategy::Simulcast(layers) => layers,
        }
    }
}

/// Reorder `capabilities` so that the preferred mime types come first, in
/// preference order, followed by everything else in reported order.
///
/// Mime types compare case-insensitively. An empty `preferred` list applies
/// [`DEFAULT_AUDIO_PREFERENCE`].
pub fn order_codecs(capabilities: &[CodecCapability], preferred: &[String]) -> Vec<CodecCapability> {
    let preference: Vec<&str> = if preferred.is_empty() {
        DEFAULT_AUDIO_PREFERENCE.to_vec()
    } else {
        preferred.iter().map(String::as_str).collect()
    };

    let mut ordered = Vec::with_capacity(capabilities.len());
    let mut taken = vec![false; capabilities.len()];

    for mime in preference {
        for (index, codec) in capabilities.iter().enumerate() {
            if !taken[index] && codec.mime_type.eq_ignore_ascii_case(mime) {
                taken[index] = true;
                ordered.push(codec.clone());
            }
        }
    }

    for (index, codec) in capabilities.iter().enumerate() {
        if !taken[index] {
            ordered.push(codec.clone());
        }
    }

    ordered
}

/// Audio send encoding; red gets its own, larger ceiling.
pub fn audio_encoding(ordered: &[CodecCapability], bitrates: &Bitrates) -> Encoding {
    let red_first = ordered
        .first()
        .map_or(false, |codec| codec.mime_type.eq_ignore_ascii_case(MIME_TYPE_RED));
    Encoding {
        max_bitrate: Some(if red_first { bitrates.audio_red } else { bitrates.audio }),
        ..Default::default()
    }
}

/// Pick the video strategy: scalable when configured and supported, then
/// simulcast when configured, otherwise a single layer.
pub fn select_video_encoding(
    media: &MediaConfig,
    bitrates: &Bitrates,
    supports_scalability_mode: bool,
) -> VideoEncodingStrategy {
    if media.svc {
        match media.scalability_mode.as_deref() {
            Some(mode) if !mode.is_empty() && supports_scalability_mode => {
                return VideoEncodingStrategy::Scalable(Encoding {
                    max_bitrate: Some(bitrates.video),
                    scalability_mode: Some(mode.to_string()),
                    ..Default::default()
                });
            }
            _ => log::debug!("Scalable video unavailable, falling back"),
        }
    }

    if media.simulcast {
        // Highest resolution first; some stacks reject any other order.
        let layers = [
            ("high", bitrates.video_high, 1.0),
            ("mid", bitrates.video_mid, 2.0),
            ("low", bitrates.video_low, 4.0),
        ];
        return VideoEncodingStrategy::Simulcast(
            layers
                .iter()
                .map(|(rid, max_bitrate, scale)| Encoding {
                    rid: Some(rid.to_string()),
                    max_bitrate: Some(*max_bitrate),
                    scale_resolution_down_by: Some(*scale),
                    scalability_mode: None,
                })
                .collect(),
        );
    }

    VideoEncodingStrategy::Single(Encoding {
        max_bitrate: Some(bitrates.video),
        ..Default::default()
    })
}
