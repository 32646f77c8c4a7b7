//! Configuration management for roomrtc

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub mod ice;

pub use ice::build_ice_servers;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// REST control plane
    #[serde(default)]
    pub api: ApiConfig,

    /// Peer connection configuration
    #[serde(default)]
    pub webrtc: WebRTCConfig,

    /// Local media publishing
    #[serde(default)]
    pub media: MediaConfig,

    /// Push channel reconnect policy
    #[serde(default)]
    pub signaling: SignalingConfig,

    /// Stats sampling
    #[serde(default)]
    pub bandwidth: BandwidthConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Control plane base URL, without the version segment
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API version; requests go to `{base_url}/v{version}`
    #[serde(default = "default_api_version")]
    pub version: u32,

    /// Static bearer token
    #[serde(default)]
    pub token: Option<String>,

    /// Per-request timeout in milliseconds (not applied to the push stream)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            version: default_api_version(),
            token: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ApiConfig {
    pub fn versioned_url(&self) -> String {
        format!("{}/v{}", self.base_url.trim_end_matches('/'), self.version)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// One ICE server entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

/// Peer connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebRTCConfig {
    /// Explicit ICE servers, used when no STUN/TURN host is configured
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<IceServerConfig>,

    #[serde(default)]
    pub stun_host: String,

    #[serde(default = "default_stun_port")]
    pub stun_port: u16,

    #[serde(default)]
    pub turn_host: String,

    #[serde(default = "default_turn_port")]
    pub turn_port: u16,

    /// "udp" or "tcp"
    #[serde(default = "default_turn_protocol")]
    pub turn_protocol: String,

    #[serde(default)]
    pub turn_tls: bool,

    /// TURN REST shared secret; takes precedence over username/password
    #[serde(default)]
    pub turn_shared_secret: String,

    #[serde(default)]
    pub turn_username: String,

    #[serde(default)]
    pub turn_password: String,

    /// Label of the server-created data channel carrying bandwidth reports
    #[serde(default = "default_internal_channel_label")]
    pub internal_channel_label: String,
}

impl Default for WebRTCConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            stun_host: String::new(),
            stun_port: default_stun_port(),
            turn_host: String::new(),
            turn_port: default_turn_port(),
            turn_protocol: default_turn_protocol(),
            turn_tls: false,
            turn_shared_secret: String::new(),
            turn_username: String::new(),
            turn_password: String::new(),
            internal_channel_label: default_internal_channel_label(),
        }
    }
}

/// Bitrate ceilings in bits per second
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bitrates {
    #[serde(default = "default_audio_bitrate")]
    pub audio: u32,
    #[serde(default = "default_audio_red_bitrate")]
    pub audio_red: u32,
    #[serde(default = "default_video_bitrate")]
    pub video: u32,
    #[serde(default = "default_video_high_bitrate")]
    pub video_high: u32,
    #[serde(default = "default_video_mid_bitrate")]
    pub video_mid: u32,
    #[serde(default = "default_video_low_bitrate")]
    pub video_low: u32,
    #[serde(default = "default_initial_bandwidth")]
    pub initial_bandwidth: u32,
}

impl Default for Bitrates {
    fn default() -> Self {
        Self {
            audio: default_audio_bitrate(),
            audio_red: default_audio_red_bitrate(),
            video: default_video_bitrate(),
            video_high: default_video_high_bitrate(),
            video_mid: default_video_mid_bitrate(),
            video_low: default_video_low_bitrate(),
            initial_bandwidth: default_initial_bandwidth(),
        }
    }
}

/// Local media publishing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Audio codec mime types in preference order, e.g. `["audio/opus"]`.
    /// Empty selects the built-in order (red, opus, rest).
    #[serde(default)]
    pub preferred_audio_codecs: Vec<String>,

    /// Publish video as three simulcast layers
    #[serde(default = "default_simulcast")]
    pub simulcast: bool,

    /// Publish video as one scalable (SVC) encoding
    #[serde(default)]
    pub svc: bool,

    /// Scalability mode used when `svc` is set, e.g. "L3T3"
    #[serde(default)]
    pub scalability_mode: Option<String>,

    #[serde(default)]
    pub bitrates: Bitrates,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            preferred_audio_codecs: Vec::new(),
            simulcast: default_simulcast(),
            svc: false,
            scalability_mode: None,
            bitrates: Bitrates::default(),
        }
    }
}

/// Push channel reconnect policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// Give up reconnecting this long after the error first occurred
    #[serde(default = "default_reconnect_timeout_ms")]
    pub reconnect_timeout_ms: u64,

    /// Re-check interval while offline
    #[serde(default = "default_offline_retry_ms")]
    pub offline_retry_ms: u64,

    /// Errors within this window after connecting reconnect after the same delay
    #[serde(default = "default_reconnect_debounce_ms")]
    pub reconnect_debounce_ms: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            reconnect_timeout_ms: default_reconnect_timeout_ms(),
            offline_retry_ms: default_offline_retry_ms(),
            reconnect_debounce_ms: default_reconnect_debounce_ms(),
        }
    }
}

impl SignalingConfig {
    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect_timeout_ms)
    }

    pub fn offline_retry(&self) -> Duration {
        Duration::from_millis(self.offline_retry_ms)
    }

    pub fn reconnect_debounce(&self) -> Duration {
        Duration::from_millis(self.reconnect_debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandwidthConfig {
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,

    /// Samples closer together than this are skipped
    #[serde(default = "default_min_sample_gap_ms")]
    pub min_sample_gap_ms: u64,
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_sample_interval_ms(),
            min_sample_gap_ms: default_min_sample_gap_ms(),
        }
    }
}

impl BandwidthConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn min_sample_gap(&self) -> Duration {
        Duration::from_millis(self.min_sample_gap_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default env_logger filter, e.g. `info` or `warn,roomrtc_core=debug`
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LoggingConfig {
    /// Filter used when `ROOMRTC_LOG` is unset. `verbose` forces debug.
    pub fn filter(&self, verbose: bool) -> String {
        if verbose {
            "debug".to_string()
        } else {
            self.level.clone()
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(Error::Config("API base URL must not be empty".into()));
        }

        if self.api.version == 0 {
            return Err(Error::Config("API version must be non-zero".into()));
        }

        if !self.webrtc.turn_host.is_empty() && self.webrtc.turn_port == 0 {
            return Err(Error::Config("TURN port must be non-zero".into()));
        }

        if !matches!(self.webrtc.turn_protocol.as_str(), "" | "udp" | "tcp") {
            return Err(Error::Config("TURN protocol must be \"udp\" or \"tcp\"".into()));
        }

        if self.logging.level.trim().is_empty() {
            return Err(Error::Config("Logging level must not be empty".into()));
        }

        if self.webrtc.internal_channel_label.is_empty() {
            return Err(Error::Config("Internal channel label must not be empty".into()));
        }

        let bitrates = &self.media.bitrates;
        if bitrates.audio == 0 || bitrates.video == 0 {
            return Err(Error::Config("Audio and video bitrates must be non-zero".into()));
        }
        if self.media.simulcast {
            if bitrates.video_high == 0 || bitrates.video_mid == 0 || bitrates.video_low == 0 {
                return Err(Error::Config("Simulcast layer bitrates must be non-zero".into()));
            }
            if bitrates.video_low > bitrates.video_mid || bitrates.video_mid > bitrates.video_high {
                return Err(Error::Config(
                    "Simulcast layer bitrates must satisfy low <= mid <= high".into(),
                ));
            }
        }

        if self.media.svc
            && self
                .media
                .scalability_mode
                .as_deref()
                .map_or(true, str::is_empty)
        {
            return Err(Error::Config("SVC requires a scalability mode".into()));
        }

        if self.signaling.reconnect_timeout_ms == 0 || self.signaling.offline_retry_ms == 0 {
            return Err(Error::Config("Signaling intervals must be non-zero".into()));
        }

        if self.bandwidth.sample_interval_ms == 0 {
            return Err(Error::Config("Bandwidth sample interval must be non-zero".into()));
        }

        if self.bandwidth.min_sample_gap_ms > self.bandwidth.sample_interval_ms {
            return Err(Error::Config(
                "Bandwidth sample gap cannot exceed the sample interval".into(),
            ));
        }

        Ok(())
    }
}


fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_api_version() -> u32 { 1 }
fn default_request_timeout_ms() -> u64 { 10_000 }

fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![IceServerConfig {
        urls: vec!["stun:stun.l.google.com:19302".to_string()],
        username: None,
        credential: None,
    }]
}

fn default_stun_port() -> u16 { 3478 }
fn default_turn_port() -> u16 { 3478 }

fn default_turn_protocol() -> String {
    "udp".to_string()
}

fn default_internal_channel_label() -> String {
    "internal".to_string()
}

fn default_audio_bitrate() -> u32 { 48_000 }
fn default_audio_red_bitrate() -> u32 { 96_000 }
fn default_video_bitrate() -> u32 { 1_200_000 }
fn default_video_high_bitrate() -> u32 { 1_200_000 }
fn default_video_mid_bitrate() -> u32 { 500_000 }
fn default_video_low_bitrate() -> u32 { 150_000 }
fn default_initial_bandwidth() -> u32 { 1_000_000 }
fn default_simulcast() -> bool { true }
fn default_reconnect_timeout_ms() -> u64 { 5_000 }
fn default_offline_retry_ms() -> u64 { 1_000 }
fn default_reconnect_debounce_ms() -> u64 { 1_000 }
fn default_sample_interval_ms() -> u64 { 3_000 }
fn default_min_sample_gap_ms() -> u64 { 1_000 }

fn default_log_level() -> String {
    "info".to_string()
}
