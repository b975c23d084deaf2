//! Core types for Carousel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Unique identifier for a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One entry of the static catalog. Never mutated after startup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItem {
    /// Stable identifier, also the key of the compatibility hint table
    pub id: String,
    /// Human-readable title
    pub display_name: String,
    /// Logical media name, percent-encoded as it appears on the origin
    pub canonical_path: String,
}

impl PlaylistItem {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        canonical_path: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            canonical_path: canonical_path.into(),
        }
    }
}

/// Codec profiles the capability probe checks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecProfile {
    H264Baseline,
    H264Main,
    H264High,
    Hevc,
    Vp9,
    Av1,
    Aac,
    Opus,
}

impl CodecProfile {
    pub const ALL: [CodecProfile; 8] = [
        CodecProfile::H264Baseline,
        CodecProfile::H264Main,
        CodecProfile::H264High,
        CodecProfile::Hevc,
        CodecProfile::Vp9,
        CodecProfile::Av1,
        CodecProfile::Aac,
        CodecProfile::Opus,
    ];

    /// MIME type with codecs parameter, as a browser `canPlayType` expects it
    pub fn mime_type(&self) -> &'static str {
        match self {
            CodecProfile::H264Baseline => "video/mp4; codecs=\"avc1.42E01E\"",
            CodecProfile::H264Main => "video/mp4; codecs=\"avc1.4D401E\"",
            CodecProfile::H264High => "video/mp4; codecs=\"avc1.64001E\"",
            CodecProfile::Hevc => "video/mp4; codecs=\"hvc1.1.6.L93.B0\"",
            CodecProfile::Vp9 => "video/webm; codecs=\"vp09.00.10.08\"",
            CodecProfile::Av1 => "video/mp4; codecs=\"av01.0.05M.08\"",
            CodecProfile::Aac => "audio/mp4; codecs=\"mp4a.40.2\"",
            CodecProfile::Opus => "audio/webm; codecs=\"opus\"",
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, CodecProfile::Aac | CodecProfile::Opus)
    }
}

impl std::fmt::Display for CodecProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecProfile::H264Baseline => write!(f, "H.264 Baseline"),
            CodecProfile::H264Main => write!(f, "H.264 Main"),
            CodecProfile::H264High => write!(f, "H.264 High"),
            CodecProfile::Hevc => write!(f, "H.265/HEVC"),
            CodecProfile::Vp9 => write!(f, "VP9"),
            CodecProfile::Av1 => write!(f, "AV1"),
            CodecProfile::Aac => write!(f, "AAC"),
            CodecProfile::Opus => write!(f, "Opus"),
        }
    }
}

/// Delivery format of a source candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    /// Adaptive manifest (multi-rendition)
    Adaptive,
    /// Single progressive file in the native container
    Progressive,
    /// Progressive file in an alternative codec container
    AlternativeCodec,
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFormat::Adaptive => write!(f, "adaptive"),
            SourceFormat::Progressive => write!(f, "progressive"),
            SourceFormat::AlternativeCodec => write!(f, "alternative-codec"),
        }
    }
}

/// One playable source for an item
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceCandidate {
    pub format: SourceFormat,
    pub url: Url,
    /// Lower is tried first
    pub priority: u32,
    /// MIME type the element should be told about
    pub mime_type: String,
}

/// Ordered fallback list for one playlist item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateChain {
    pub item_id: String,
    pub candidates: Vec<SourceCandidate>,
}

impl CandidateChain {
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SourceCandidate> {
        self.candidates.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceCandidate> {
        self.candidates.iter()
    }

    /// Index of the first non-adaptive candidate after `index`
    pub fn next_progressive_after(&self, index: usize) -> Option<usize> {
        self.candidates
            .iter()
            .enumerate()
            .skip(index + 1)
            .find(|(_, c)| c.format != SourceFormat::Adaptive)
            .map(|(i, _)| i)
    }
}

/// Playback phase of the active session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No item loaded
    Idle,
    /// Building the candidate chain
    Resolving,
    /// A candidate is attached and loading
    Loading,
    /// Playback waiting for data
    Buffering,
    /// Enough data to start
    Ready,
    /// Content is playing
    Playing,
    /// Playback paused
    Paused,
    /// The active candidate failed; moving to the next one
    Failed,
    /// Every candidate failed
    TrackFailed,
}

impl Phase {
    /// Check if transition to target phase is valid
    pub fn can_transition_to(&self, target: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, target),
            // A new load may start from anywhere
            (_, Resolving) |
            (Resolving, Loading) | (Resolving, TrackFailed) |
            (Loading, Ready) | (Loading, Failed) | (Loading, Buffering) | (Loading, Loading) |
            (Ready, Playing) | (Ready, Paused) | (Ready, Buffering) | (Ready, Failed) |
            (Playing, Buffering) | (Playing, Paused) | (Playing, Failed) |
            (Buffering, Playing) | (Buffering, Paused) | (Buffering, Failed) | (Buffering, Ready) |
            (Paused, Playing) | (Paused, Buffering) | (Paused, Failed) |
            (Failed, Loading) | (Failed, TrackFailed) |
            (_, Idle)
        )
    }

    /// Seeking is meaningful once the element has media attached
    pub fn is_seekable(&self) -> bool {
        matches!(self, Phase::Ready | Phase::Playing | Phase::Paused | Phase::Buffering)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Resolving => write!(f, "resolving"),
            Phase::Loading => write!(f, "loading"),
            Phase::Buffering => write!(f, "buffering"),
            Phase::Ready => write!(f, "ready"),
            Phase::Playing => write!(f, "playing"),
            Phase::Paused => write!(f, "paused"),
            Phase::Failed => write!(f, "failed"),
            Phase::TrackFailed => write!(f, "track-failed"),
        }
    }
}

/// State of the one live playback session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackSession {
    pub id: SessionId,
    pub item_id: String,
    pub active_candidate_index: usize,
    pub phase: Phase,
    pub current_time: f64,
    pub duration: Option<f64>,
    pub is_muted: bool,
    pub volume: f64,
    pub last_error: Option<String>,
}

impl PlaybackSession {
    pub fn new(item_id: impl Into<String>, is_muted: bool, volume: f64) -> Self {
        Self {
            id: SessionId::new(),
            item_id: item_id.into(),
            active_candidate_index: 0,
            phase: Phase::Resolving,
            current_time: 0.0,
            duration: None,
            is_muted,
            volume,
            last_error: None,
        }
    }
}

/// Metadata for one cached response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Request URL
    pub key: String,
    pub size_bytes: u64,
    pub last_accessed: DateTime<Utc>,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    /// Monotonic access counter, breaks `last_accessed` ties
    #[serde(default)]
    pub access_seq: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Device class reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Mobile,
    #[default]
    Desktop,
}

/// Connection type for network-aware decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Slow2G,
    Cellular2G,
    Cellular3G,
    Cellular4G,
    #[default]
    Unknown,
}

impl ConnectionType {
    pub fn is_constrained(&self) -> bool {
        matches!(self, ConnectionType::Slow2G | ConnectionType::Cellular2G | ConnectionType::Cellular3G)
    }
}

/// Network hint from the platform
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NetworkHint {
    /// Effective connection type
    pub effective_type: ConnectionType,
    /// Downlink estimate in Mbit/s (0 = unknown)
    pub downlink_mbps: f64,
    /// Data-saver preference
    pub save_data: bool,
}

/// One telemetry observation of the active media element
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSample {
    /// Rendered frames per second
    pub fps: f64,
    /// Dropped frames / total frames, 0.0-1.0
    pub dropped_frame_ratio: f64,
    /// Time spent buffering since the previous sample
    pub buffering_ms: f64,
    /// Bandwidth estimate in bits per second (0 = unknown)
    pub bandwidth_estimate: u64,
    /// Request latency in milliseconds
    pub latency_ms: f64,
    /// 0.0-1.0
    pub memory_pressure: f64,
    /// 0.0-1.0
    pub cpu_pressure: f64,
    pub timestamp: DateTime<Utc>,
}

impl Default for PerformanceSample {
    fn default() -> Self {
        Self {
            fps: 0.0,
            dropped_frame_ratio: 0.0,
            buffering_ms: 0.0,
            bandwidth_estimate: 0,
            latency_ms: 0.0,
            memory_pressure: 0.0,
            cpu_pressure: 0.0,
            timestamp: Utc::now(),
        }
    }
}

/// Direction of a quality recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityAction {
    Increase,
    Decrease,
    Hold,
}

/// Quality recommendation for the active adaptive session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityDirective {
    pub action: QualityAction,
    /// Recommended rendition index
    pub level: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(format: SourceFormat, path: &str, priority: u32) -> SourceCandidate {
        SourceCandidate {
            format,
            url: Url::parse(&format!("https://cdn.example.com/{}", path)).unwrap(),
            priority,
            mime_type: "video/mp4".to_string(),
        }
    }

    #[test]
    fn test_phase_transitions() {
        assert!(Phase::Idle.can_transition_to(Phase::Resolving));
        assert!(Phase::Resolving.can_transition_to(Phase::Loading));
        assert!(Phase::Loading.can_transition_to(Phase::Ready));
        assert!(Phase::Ready.can_transition_to(Phase::Playing));
        assert!(Phase::Playing.can_transition_to(Phase::Buffering));
        assert!(Phase::Buffering.can_transition_to(Phase::Playing));
        assert!(Phase::Failed.can_transition_to(Phase::Loading));
        assert!(Phase::Failed.can_transition_to(Phase::TrackFailed));

        assert!(!Phase::Idle.can_transition_to(Phase::Playing));
        assert!(!Phase::TrackFailed.can_transition_to(Phase::Playing));
        assert!(!Phase::Resolving.can_transition_to(Phase::Playing));
    }

    #[test]
    fn test_seekable_phases() {
        assert!(Phase::Ready.is_seekable());
        assert!(Phase::Buffering.is_seekable());
        assert!(!Phase::Loading.is_seekable());
        assert!(!Phase::Idle.is_seekable());
    }

    #[test]
    fn test_next_progressive_after() {
        let chain = CandidateChain {
            item_id: "a".into(),
            candidates: vec![
                candidate(SourceFormat::Adaptive, "hls/a/master.m3u8", 0),
                candidate(SourceFormat::Progressive, "video/a.mp4", 1),
                candidate(SourceFormat::AlternativeCodec, "webm/a.webm", 2),
            ],
        };
        assert_eq!(chain.next_progressive_after(0), Some(1));
        assert_eq!(chain.next_progressive_after(1), Some(2));
        assert_eq!(chain.next_progressive_after(2), None);
    }
}
