//! Outgoing bandwidth estimation
//!
//! Samples connection statistics on a timer while the peer is connected,
//! derives per-track bitrates and the current congestion cause, and reports
//! the estimate to the server over the internal data channel.

use super::data_channel::BandwidthReport;
use super::{PeerSession, QualityLimitationReason, StatsEntry};
use crate::config::BandwidthConfig;
use crate::error::Result;
use crate::events::{Event, EventBus, SubscriptionId};
use crate::media::TrackKind;
use crate::stream::StreamSource;
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Why outgoing quality is currently limited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LimitationReason {
    #[default]
    None,
    Cpu,
    Bandwidth,
    Both,
}

impl LimitationReason {
    pub fn from_flags(cpu: bool, bandwidth: bool) -> Self {
        match (cpu, bandwidth) {
            (false, false) => LimitationReason::None,
            (true, false) => LimitationReason::Cpu,
            (false, true) => LimitationReason::Bandwidth,
            (true, true) => LimitationReason::Both,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LimitationReason::None => "none",
            LimitationReason::Cpu => "cpu",
            LimitationReason::Bandwidth => "bandwidth",
            LimitationReason::Both => "both",
        }
    }
}

/// Rolling byte counter for one track (and simulcast layer)
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSample {
    pub track_id: String,
    pub kind: TrackKind,
    pub bytes: u64,
    /// Bits per second; zero until two samples exist
    pub bitrate: f64,
    pub last_updated_ms: f64,
    pub source: Option<StreamSource>,
    pub rid: Option<String>,
}

impl TrackSample {
    fn seed(track_id: &str, kind: TrackKind, bytes: u64, timestamp_ms: f64) -> Self {
        Self {
            track_id: track_id.to_string(),
            kind,
            bytes,
            bitrate: 0.0,
            last_updated_ms: timestamp_ms,
            source: None,
            rid: None,
        }
    }

    /// `(Δbytes * 8 / Δms) * 1000`, or `None` when no time has passed.
    fn rate_to(&self, bytes: u64, timestamp_ms: f64) -> Option<f64> {
        let delta_ms = timestamp_ms - self.last_updated_ms;
        if delta_ms <= 0.0 {
            return None;
        }
        let delta_bytes = bytes as f64 - self.bytes as f64;
        Some(delta_bytes * 8.0 / delta_ms * 1000.0)
    }
}

type OutboundKey = (String, Option<String>);

#[derive(Default)]
struct BandwidthState {
    inbound: HashMap<String, TrackSample>,
    outbound: HashMap<OutboundKey, TrackSample>,
    available_outgoing_bitrate: Option<f64>,
    reason: LimitationReason,
    last_sample: Option<Instant>,
    timer: Option<JoinHandle<()>>,
}

pub struct BandwidthController {
    weak: Weak<BandwidthController>,
    session: Arc<PeerSession>,
    sample_interval: Duration,
    min_gap: Duration,
    state: Mutex<BandwidthState>,
    sampling: AsyncMutex<()>,
}

impl BandwidthController {
    pub fn new(session: Arc<PeerSession>, config: &BandwidthConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            session,
            sample_interval: config.sample_interval(),
            min_gap: config.min_sample_gap(),
            state: Mutex::new(BandwidthState::default()),
            sampling: AsyncMutex::new(()),
        })
    }

    /// Follow the peer lifecycle on `bus`.
    pub fn bind(&self, bus: &EventBus) -> SubscriptionId {
        let weak = self.weak.clone();
        bus.subscribe(move |event| {
            let Some(controller) = weak.upgrade() else {
                return;
            };
            match event {
                Event::PeerConnected => controller.start(),
                Event::PeerDisconnected => controller.stop(),
                Event::PeerClosed => controller.reset(),
                Event::InternalChannelAvailable => {
                    tokio::spawn(async move {
                        if let Err(e) = controller.sample().await {
                            warn!("Bandwidth sample failed: {}", e);
                        }
                        controller.publish().await;
                    });
                }
                _ => {}
            }
        })
    }

    /// Start the sampling timer. A no-op while it is running.
    pub fn start(&self) {
        let mut state = self.state.lock();
        if state.timer.is_some() {
            return;
        }
        debug!("Bandwidth sampling started ({:?} period)", self.sample_interval);
        let weak = self.weak.clone();
        let period = self.sample_interval;
        state.timer = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(controller) = weak.upgrade() else {
                    break;
                };
                controller.tick().await;
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(timer) = self.state.lock().timer.take() {
            debug!("Bandwidth sampling stopped");
            timer.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().timer.is_some()
    }

    /// Stop sampling and forget every sample.
    pub fn reset(&self) {
        self.stop();
        *self.state.lock() = BandwidthState::default();
    }

    async fn tick(&self) {
        match self.sample().await {
            Ok(true) => self.publish().await,
            Ok(false) => {}
            Err(e) => warn!("Bandwidth sample failed: {}", e),
        }
    }

    /// Take one statistics sample. Returns `false` when skipped because no
    /// connection exists or the previous sample is too recent.
    pub async fn sample(&self) -> Result<bool> {
        let _guard = self.sampling.lock().await;
        let Some(connection) = self.session.connection() else {
            return Ok(false);
        };
        {
            let mut state = self.state.lock();
            let now = Instant::now();
            if let Some(last) = state.last_sample {
                if now.duration_since(last) < self.min_gap {
                    return Ok(false);
                }
            }
            state.last_sample = Some(now);
        }

        let stats = connection.get_stats().await?;
        self.ingest(&stats);
        Ok(true)
    }

    /// Fold one statistics pass into the rolling samples.
    pub fn ingest(&self, stats: &[StatsEntry]) {
        let sources: HashMap<&str, StreamSource> = stats
            .iter()
            .filter_map(|entry| match entry {
                StatsEntry::InboundRtp { track_id, .. } => self
                    .session
                    .get_stream_by_track_id(track_id)
                    .map(|stream| (track_id.as_str(), stream.source)),
                _ => None,
            })
            .collect();

        let mut cpu = false;
        let mut bandwidth = false;
        let mut state = self.state.lock();

        for entry in stats {
            match entry {
                StatsEntry::InboundRtp {
                    track_id,
                    kind,
                    bytes_received,
                    timestamp_ms,
                } => {
                    let source = sources.get(track_id.as_str()).copied();
                    update_inbound(
                        &mut state.inbound,
                        track_id,
                        *kind,
                        *bytes_received,
                        *timestamp_ms,
                        source,
                    );
                }
                StatsEntry::OutboundRtp {
                    track_id,
                    kind,
                    rid,
                    bytes_sent,
                    quality_limitation_reason,
                    timestamp_ms,
                } => {
                    match quality_limitation_reason {
                        Some(QualityLimitationReason::Cpu) => cpu = true,
                        Some(QualityLimitationReason::Bandwidth) => bandwidth = true,
                        _ => {}
                    }
                    update_outbound(
                        &mut state.outbound,
                        track_id,
                        *kind,
                        rid.clone(),
                        *bytes_sent,
                        *timestamp_ms,
                    );
                }
                StatsEntry::CandidatePair {
                    available_outgoing_bitrate: Some(bitrate),
                } => state.available_outgoing_bitrate = Some(*bitrate),
                StatsEntry::CandidatePair { .. } => {}
            }
        }

        state.reason = LimitationReason::from_flags(cpu, bandwidth);
    }

    /// The current estimate as sent to the server.
    pub fn report(&self) -> BandwidthReport {
        let state = self.state.lock();
        let available = state
            .available_outgoing_bitrate
            .unwrap_or_else(|| f64::from(self.session.bitrates().initial_bandwidth));
        BandwidthReport {
            available_outgoing_bitrate: available.max(0.0).round() as u64,
            quality_limitation_reason: state.reason.as_str().to_string(),
        }
    }

    /// Send the current report if the internal channel is open.
    pub async fn publish(&self) {
        let Some(channel) = self.session.internal_channel() else {
            return;
        };
        if !channel.is_open() {
            return;
        }
        let text = match serde_json::to_string(&self.report()) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode bandwidth report: {}", e);
                return;
            }
        };
        if let Err(e) = channel.send_text(text).await {
            warn!("Failed to publish bandwidth report: {}", e);
        }
    }

    pub fn outbound_video_tracks(&self) -> usize {
        self.outbound_tracks(TrackKind::Video)
    }

    pub fn outbound_audio_tracks(&self) -> usize {
        self.outbound_tracks(TrackKind::Audio)
    }

    fn outbound_tracks(&self, kind: TrackKind) -> usize {
        self.state
            .lock()
            .outbound
            .values()
            .filter(|s| s.kind == kind)
            .map(|s| s.track_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Refresh statistics (subject to the sampling rate limit) and return
    /// the available outgoing bitrate in bits per second.
    pub async fn available(&self) -> Option<f64> {
        if let Err(e) = self.sample().await {
            warn!("Bandwidth refresh failed: {}", e);
        }
        self.state.lock().available_outgoing_bitrate
    }

    pub fn quality_limitation_reason(&self) -> LimitationReason {
        self.state.lock().reason
    }

    pub fn inbound_bitrate(&self, track_id: &str) -> Option<f64> {
        self.state.lock().inbound.get(track_id).map(|s| s.bitrate)
    }

    /// Sum over the track's simulcast layers.
    pub fn outbound_bitrate(&self, track_id: &str) -> Option<f64> {
        let state = self.state.lock();
        let mut layers = state
            .outbound
            .values()
            .filter(|s| s.track_id == track_id)
            .peekable();
        layers.peek()?;
        Some(layers.map(|s| s.bitrate).sum())
    }

    pub fn inbound_sample(&self, track_id: &str) -> Option<TrackSample> {
        self.state.lock().inbound.get(track_id).cloned()
    }
}

impl Drop for BandwidthController {
    fn drop(&mut self) {
        if let Some(timer) = self.state.get_mut().timer.take() {
            timer.abort();
        }
    }
}

fn update_inbound(
    samples: &mut HashMap<String, TrackSample>,
    track_id: &str,
    kind: TrackKind,
    bytes: u64,
    timestamp_ms: f64,
    source: Option<StreamSource>,
) {
    let rate = match samples.get(track_id) {
        Some(prev) if prev.bytes != 0 && bytes != 0 => prev.rate_to(bytes, timestamp_ms),
        _ => None,
    };

    let sample = samples
        .entry(track_id.to_string())
        .or_insert_with(|| TrackSample::seed(track_id, kind, bytes, timestamp_ms));
    if let Some(rate) = rate {
        sample.bitrate = rate;
    }
    sample.bytes = bytes;
    sample.last_updated_ms = timestamp_ms;
    sample.source = source;
}

fn update_outbound(
    samples: &mut HashMap<OutboundKey, TrackSample>,
    track_id: &str,
    kind: TrackKind,
    rid: Option<String>,
    bytes: u64,
    timestamp_ms: f64,
) {
    let key = (track_id.to_string(), rid.clone());
    let reseed = bytes == 0 || samples.get(&key).map_or(true, |prev| prev.bytes == 0);
    if reseed {
        let mut sample = TrackSample::seed(track_id, kind, bytes, timestamp_ms);
        sample.rid = rid;
        samples.insert(key, sample);
        return;
    }
    let Some(prev) = samples.get_mut(&key) else {
        return;
    };

    match prev.rate_to(bytes, timestamp_ms) {
        Some(rate) if rate > 0.0 => {
            prev.bitrate = rate;
            prev.bytes = bytes;
            prev.last_updated_ms = timestamp_ms;
        }
        _ => {}
    }
}
