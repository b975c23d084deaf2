//! Media element seam
//!
//! The controller drives one [`MediaElement`] at a time. Elements report
//! native lifecycle events through an unbounded channel, each tagged with the
//! [`AttemptId`] it was attached under so stale events can be discarded.

use crate::{ErrorClass, PerformanceSample, Result, SourceCandidate};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identifies one candidate attempt within one load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptId {
    /// Incremented on every `load`
    pub generation: u64,
    /// Incremented on every attach within a generation, retries included
    pub attempt: u32,
}

impl std::fmt::Display for AttemptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.generation, self.attempt)
    }
}

/// Native media error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaErrorKind {
    /// Transfer failed or stalled
    Network,
    /// Data could not be decoded
    Decode,
    /// Container or codec not playable
    SourceNotSupported,
    /// The adaptive manifest is missing
    ManifestNotFound,
    /// Loading was aborted by the element
    Aborted,
}

impl MediaErrorKind {
    /// Recovery class of this error
    pub fn class(&self) -> ErrorClass {
        match self {
            MediaErrorKind::Network | MediaErrorKind::Aborted => ErrorClass::Network,
            MediaErrorKind::Decode | MediaErrorKind::SourceNotSupported => ErrorClass::Format,
            MediaErrorKind::ManifestNotFound => ErrorClass::ManifestNotFound,
        }
    }
}

impl std::fmt::Display for MediaErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaErrorKind::Network => write!(f, "network"),
            MediaErrorKind::Decode => write!(f, "decode"),
            MediaErrorKind::SourceNotSupported => write!(f, "source-not-supported"),
            MediaErrorKind::ManifestNotFound => write!(f, "manifest-not-found"),
            MediaErrorKind::Aborted => write!(f, "aborted"),
        }
    }
}

/// Native lifecycle event of a media element
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// Enough data to start
    CanPlay,
    /// Playback stalled waiting for data
    Waiting,
    /// Playback (re)started
    Playing,
    Paused,
    Ended,
    /// Current playback position in seconds
    TimeUpdate(f64),
    /// Duration in seconds became known
    DurationChange(f64),
    /// Fatal error of the attached source
    Error { kind: MediaErrorKind, message: String },
}

impl MediaEvent {
    pub fn error(kind: MediaErrorKind, message: impl Into<String>) -> Self {
        MediaEvent::Error {
            kind,
            message: message.into(),
        }
    }
}

/// Channel media elements report events on
pub type EventSink = mpsc::UnboundedSender<(AttemptId, MediaEvent)>;

/// Receiving side of [`EventSink`]
pub type EventStream = mpsc::UnboundedReceiver<(AttemptId, MediaEvent)>;

/// Live performance observations of an element
pub trait PerformanceSource: Send + Sync {
    fn sample(&self) -> PerformanceSample;
}

/// Rendition control of an active adaptive stream
pub trait AdaptiveSession: Send + Sync {
    /// Number of renditions, lowest bitrate first
    fn level_count(&self) -> usize;

    fn current_level(&self) -> usize;

    /// Switch renditions. Out-of-range levels are clamped.
    fn set_level(&self, level: usize);

    /// Bitrate of a rendition in bits per second
    fn level_bitrate(&self, level: usize) -> Option<u64>;
}

/// One playable element (video tag, decoder pipeline, headless fetcher)
#[async_trait]
pub trait MediaElement: Send + Sync {
    /// Attach `candidate`; subsequent events go to `sink` tagged with `attempt`
    async fn attach(&self, attempt: AttemptId, candidate: &SourceCandidate, sink: EventSink) -> Result<()>;

    /// Drop the current source and stop reporting events for it
    async fn detach(&self);

    async fn play(&self) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    async fn seek(&self, seconds: f64) -> Result<()>;

    async fn set_muted(&self, muted: bool);

    async fn set_volume(&self, volume: f64);

    /// Playback position in seconds
    async fn current_time(&self) -> f64;

    /// Rendition control, present while an adaptive candidate is attached
    fn adaptive_session(&self) -> Option<Arc<dyn AdaptiveSession>>;

    /// Performance observations of this element
    fn performance(&self) -> Arc<dyn PerformanceSource>;
}
