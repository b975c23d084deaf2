//! Playback telemetry
//!
//! Event stream for dashboards and overlays. Every event is wrapped in an
//! [`EventRecord`] with an id, timestamp and sequence number, broadcast to
//! subscribers and kept in a bounded buffer of recent events.

use crate::{media::MediaErrorKind, Phase, QualityAction, SessionId, SourceFormat};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Why the sequencer was asked for another item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvanceReason {
    /// The item played to its end
    Ended,
    /// Every candidate failed
    TrackFailed,
}

/// Telemetry event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlaybackEvent {
    /// Candidate chain built, first attempt starting
    Loading {
        item_id: String,
        candidates: usize,
    },

    /// A candidate is attached to the element
    CandidateAttached {
        item_id: String,
        index: usize,
        format: SourceFormat,
        url: String,
    },

    /// A candidate failed
    CandidateFailed {
        item_id: String,
        index: usize,
        format: SourceFormat,
        kind: MediaErrorKind,
        message: String,
        /// The same candidate is retried
        retrying: bool,
    },

    /// The element can play
    Ready {
        item_id: String,
        index: usize,
        format: SourceFormat,
    },

    /// Phase transition
    StateChange {
        from: Phase,
        to: Phase,
        position: f64,
    },

    /// Buffering started or ended
    BufferingChanged {
        buffering: bool,
        position: f64,
    },

    /// A quality directive was applied
    QualityChanged {
        action: QualityAction,
        level: usize,
    },

    /// Track-level error; the only user-visible one
    Error {
        item_id: String,
        code: String,
        message: String,
    },

    /// Playback moved to another item
    Advanced {
        from_item: String,
        to_item: String,
        reason: AdvanceReason,
    },
}

/// Telemetry event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique event ID
    pub id: Uuid,
    /// Playback session, if the event belongs to one
    pub session_id: Option<SessionId>,
    pub timestamp: DateTime<Utc>,
    /// Sequence number
    pub sequence: u64,
    #[serde(flatten)]
    pub event: PlaybackEvent,
}

/// Broadcast bus for telemetry events
pub struct TelemetryBus {
    sender: broadcast::Sender<EventRecord>,
    sequence: RwLock<u64>,
    recent: RwLock<VecDeque<EventRecord>>,
    max_recent: usize,
}

impl TelemetryBus {
    /// Create a bus keeping the last `max_recent` events
    pub fn new(max_recent: usize) -> Self {
        let (sender, _) = broadcast::channel(max_recent.max(16));
        Self {
            sender,
            sequence: RwLock::new(0),
            recent: RwLock::new(VecDeque::with_capacity(max_recent)),
            max_recent,
        }
    }

    /// Publish an event
    pub async fn emit(&self, session_id: Option<SessionId>, event: PlaybackEvent) {
        let mut seq = self.sequence.write().await;
        *seq += 1;

        let record = EventRecord {
            id: Uuid::new_v4(),
            session_id,
            timestamp: Utc::now(),
            sequence: *seq,
            event,
        };
        drop(seq);

        debug!(sequence = record.sequence, event = ?record.event, "Telemetry event");

        {
            let mut recent = self.recent.write().await;
            if recent.len() >= self.max_recent {
                recent.pop_front();
            }
            recent.push_back(record.clone());
        }

        // No subscribers is fine
        let _ = self.sender.send(record);
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.sender.subscribe()
    }

    /// Buffered recent events, oldest first
    pub async fn recent(&self) -> Vec<EventRecord> {
        self.recent.read().await.iter().cloned().collect()
    }

    /// Clear the recent buffer
    pub async fn clear(&self) {
        self.recent.write().await.clear();
    }
}

impl Default for TelemetryBus {
    fn default() -> Self {
        Self::new(256)
    }
}
