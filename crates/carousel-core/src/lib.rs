//! Carousel Core - Adaptive Media Delivery Engine
//!
//! This crate provides everything needed to keep a playlist of media items
//! playing on heterogeneous clients:
//! - Capability probing of the runtime (codecs, adaptive playback, device)
//! - Candidate chains of adaptive and progressive sources per item
//! - A persistent segment cache with TTL, eviction and stale fallback
//! - Shuffled, persisted play order with resume positions
//! - A playback state machine with per-candidate fallback
//! - Rate-limited adaptive quality control
//! - A swappable control surface for UI transport controls
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Carousel Core                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐           │
//! │  │  Capability  │  │    Source    │  │   Playlist   │           │
//! │  │    Probe     │─►│   Resolver   │  │  Sequencer   │           │
//! │  └──────────────┘  └──────┬───────┘  └──────┬───────┘           │
//! │                           │                 │                   │
//! │                    ┌──────┴─────────────────┴──┐                │
//! │                    │    Playback Controller    │◄── Control     │
//! │                    └──────┬─────────────┬──────┘    Surface     │
//! │                           │             │                       │
//! │  ┌──────────────┐  ┌──────┴──────┐  ┌───┴──────────┐            │
//! │  │  Telemetry   │  │   Media     │  │   Quality    │            │
//! │  │     Bus      │  │  Element    │  │  Controller  │            │
//! │  └──────────────┘  └──────┬──────┘  └──────────────┘            │
//! │                           │                                     │
//! │                    ┌──────┴──────┐                              │
//! │                    │  Segment    │                              │
//! │                    │   Cache     │                              │
//! │                    └─────────────┘                              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod types;
pub mod config;
pub mod platform;
pub mod capability;
pub mod layout;
pub mod hints;
pub mod fetch;
pub mod storage;
pub mod resolver;
pub mod cache;
pub mod sequencer;
pub mod media;
pub mod ladder;
pub mod headless;
pub mod quality;
pub mod telemetry;
pub mod control;
pub mod controller;
pub mod engine;

pub use error::{Error, ErrorClass, Result};
pub use types::*;
pub use config::{CacheConfig, EngineConfig, EvictionPolicy, PlaybackConfig, QualityConfig};
pub use platform::{Platform, PlatformProfile};
pub use capability::{Capabilities, CapabilityProbe};
pub use layout::MediaLayout;
pub use hints::{CompatibilityHint, HintTable};
pub use fetch::{FetchPriority, Fetcher, HttpFetcher};
pub use resolver::SourceResolver;
pub use cache::{CacheStats, SegmentCache};
pub use sequencer::{PlayOrder, PlaylistSequencer};
pub use media::{AttemptId, MediaElement, MediaErrorKind, MediaEvent};
pub use headless::HeadlessElement;
pub use quality::QualityController;
pub use telemetry::{EventRecord, PlaybackEvent, TelemetryBus};
pub use control::{ControlSurface, Controls, PhaseUpdate, StateUpdate};
pub use controller::PlaybackController;
pub use engine::Engine;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the library version
pub fn init() {
    tracing::info!(version = VERSION, "Carousel Core initialized");
}
