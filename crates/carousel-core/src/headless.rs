//! Headless media element
//!
//! Plays a candidate without rendering: the source is fetched through the
//! segment cache, adaptive manifests are read for their rendition ladder, and
//! playback time advances on a timer. Used by the CLI and by tests that need a
//! real element instead of a scripted one.

use crate::{
    cache::SegmentCache,
    ladder::RenditionLadder,
    media::{
        AdaptiveSession, AttemptId, EventSink, MediaElement, MediaErrorKind, MediaEvent,
        PerformanceSource,
    },
    Error, ErrorClass, PerformanceSample, Result, SourceCandidate, SourceFormat,
};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// [`AdaptiveSession`] over a parsed ladder
pub struct LadderSession {
    ladder: RenditionLadder,
    level: AtomicUsize,
}

impl LadderSession {
    pub fn new(ladder: RenditionLadder, initial_level: usize) -> Self {
        let level = initial_level.min(ladder.len().saturating_sub(1));
        Self {
            ladder,
            level: AtomicUsize::new(level),
        }
    }

    pub fn ladder(&self) -> &RenditionLadder {
        &self.ladder
    }
}

impl AdaptiveSession for LadderSession {
    fn level_count(&self) -> usize {
        self.ladder.len()
    }

    fn current_level(&self) -> usize {
        self.level.load(Ordering::SeqCst)
    }

    fn set_level(&self, level: usize) {
        let clamped = level.min(self.ladder.len().saturating_sub(1));
        let previous = self.level.swap(clamped, Ordering::SeqCst);
        if previous != clamped {
            info!(
                from = previous,
                to = clamped,
                rendition = %self.ladder.get(clamped).map(|r| r.label()).unwrap_or_default(),
                "Rendition switched"
            );
        }
    }

    fn level_bitrate(&self, level: usize) -> Option<u64> {
        self.ladder.get(level).map(|r| r.bandwidth)
    }
}

#[derive(Default)]
struct Observed {
    bandwidth_bps: u64,
    latency_ms: f64,
    loaded: bool,
}

/// Transfer observations of the last load
#[derive(Default)]
pub struct HeadlessStats {
    observed: Mutex<Observed>,
    target_fps: f64,
}

impl HeadlessStats {
    fn record(&self, bytes: usize, elapsed: Duration) {
        let mut observed = lock(&self.observed);
        let secs = elapsed.as_secs_f64();
        observed.bandwidth_bps = if secs > 0.0 {
            (bytes as f64 * 8.0 / secs) as u64
        } else {
            0
        };
        observed.latency_ms = secs * 1000.0;
        observed.loaded = true;
    }

    fn reset(&self) {
        *lock(&self.observed) = Observed::default();
    }
}

impl PerformanceSource for HeadlessStats {
    fn sample(&self) -> PerformanceSample {
        let observed = lock(&self.observed);
        PerformanceSample {
            fps: if observed.loaded { self.target_fps } else { 0.0 },
            bandwidth_estimate: observed.bandwidth_bps,
            latency_ms: observed.latency_ms,
            timestamp: Utc::now(),
            ..Default::default()
        }
    }
}

#[derive(Default)]
struct ElementState {
    attempt: Option<AttemptId>,
    sink: Option<EventSink>,
    adaptive: Option<Arc<LadderSession>>,
    loaded: bool,
    position: f64,
    muted: bool,
    volume: f64,
    loader: Option<JoinHandle<()>>,
    ticker: Option<JoinHandle<()>>,
}

impl ElementState {
    fn stop_tasks(&mut self) {
        if let Some(handle) = self.loader.take() {
            handle.abort();
        }
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
    }
}

struct Inner {
    cache: Arc<SegmentCache>,
    duration: f64,
    tick: Duration,
    playback_rate: f64,
    stats: Arc<HeadlessStats>,
    state: Mutex<ElementState>,
}

impl Inner {
    /// Send `event` if `attempt` is still attached
    fn emit(&self, attempt: AttemptId, event: MediaEvent) {
        let state = lock(&self.state);
        if state.attempt != Some(attempt) {
            return;
        }
        if let Some(sink) = &state.sink {
            let _ = sink.send((attempt, event));
        }
    }
}

/// Media element that plays by fetching through the cache
pub struct HeadlessElement {
    inner: Arc<Inner>,
}

impl HeadlessElement {
    pub fn new(cache: Arc<SegmentCache>) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                duration: 30.0,
                tick: Duration::from_millis(250),
                playback_rate: 1.0,
                stats: Arc::new(HeadlessStats {
                    target_fps: 30.0,
                    ..Default::default()
                }),
                state: Mutex::new(ElementState {
                    volume: 1.0,
                    ..Default::default()
                }),
            }),
        }
    }

    /// Simulated length of every item, in seconds
    pub fn with_duration(mut self, seconds: f64) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.duration = seconds.max(0.0);
        }
        self
    }

    /// Simulated playback speed
    pub fn with_playback_rate(mut self, rate: f64) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.playback_rate = rate.max(0.0);
        }
        self
    }

    pub fn is_muted(&self) -> bool {
        lock(&self.inner.state).muted
    }

    pub fn volume(&self) -> f64 {
        lock(&self.inner.state).volume
    }

    async fn load(inner: Arc<Inner>, attempt: AttemptId, candidate: SourceCandidate) {
        let started = Instant::now();
        let result = inner.cache.fetch_through_cache(&candidate.url).await;

        let body = match result {
            Ok(body) => body,
            Err(e) => {
                let kind = error_kind(&e, candidate.format);
                warn!(attempt = %attempt, url = %candidate.url, error = %e, kind = %kind, "Source load failed");
                inner.emit(attempt, MediaEvent::error(kind, e.to_string()));
                return;
            }
        };

        inner.stats.record(body.len(), started.elapsed());

        if candidate.format == SourceFormat::Adaptive {
            match RenditionLadder::parse(&body, &candidate.url) {
                Ok(ladder) => {
                    let bandwidth = inner.stats.sample().bandwidth_estimate;
                    let level = ladder.level_for_bandwidth(bandwidth);
                    let session = Arc::new(LadderSession::new(ladder, level));
                    let mut state = lock(&inner.state);
                    if state.attempt == Some(attempt) {
                        state.adaptive = Some(session);
                    }
                }
                Err(e) => {
                    warn!(attempt = %attempt, error = %e, "Manifest unreadable");
                    inner.emit(attempt, MediaEvent::error(MediaErrorKind::Decode, e.to_string()));
                    return;
                }
            }
        }

        {
            let mut state = lock(&inner.state);
            if state.attempt != Some(attempt) {
                return;
            }
            state.loaded = true;
        }

        debug!(attempt = %attempt, bytes = body.len(), "Source loaded");
        inner.emit(attempt, MediaEvent::DurationChange(inner.duration));
        inner.emit(attempt, MediaEvent::CanPlay);
    }

    async fn run_clock(inner: Arc<Inner>, attempt: AttemptId) {
        let mut ticker = tokio::time::interval(inner.tick);
        ticker.tick().await;
        let step = inner.tick.as_secs_f64() * inner.playback_rate;

        loop {
            ticker.tick().await;
            let (position, ended) = {
                let mut state = lock(&inner.state);
                if state.attempt != Some(attempt) {
                    return;
                }
                state.position = (state.position + step).min(inner.duration);
                (state.position, state.position >= inner.duration)
            };

            inner.emit(attempt, MediaEvent::TimeUpdate(position));
            if ended {
                lock(&inner.state).ticker = None;
                inner.emit(attempt, MediaEvent::Ended);
                return;
            }
        }
    }
}

#[async_trait]
impl MediaElement for HeadlessElement {
    async fn attach(&self, attempt: AttemptId, candidate: &SourceCandidate, sink: EventSink) -> Result<()> {
        let mut state = lock(&self.inner.state);
        state.stop_tasks();
        state.attempt = Some(attempt);
        state.sink = Some(sink);
        state.adaptive = None;
        state.loaded = false;
        state.position = 0.0;
        self.inner.stats.reset();

        debug!(attempt = %attempt, format = %candidate.format, url = %candidate.url, "Attaching source");
        state.loader = Some(tokio::spawn(Self::load(
            Arc::clone(&self.inner),
            attempt,
            candidate.clone(),
        )));
        Ok(())
    }

    async fn detach(&self) {
        let mut state = lock(&self.inner.state);
        state.stop_tasks();
        state.attempt = None;
        state.sink = None;
        state.adaptive = None;
        state.loaded = false;
    }

    async fn play(&self) -> Result<()> {
        let attempt = {
            let mut state = lock(&self.inner.state);
            let attempt = match state.attempt {
                Some(attempt) if state.loaded => attempt,
                _ => {
                    return Err(Error::InvalidPhase {
                        operation: "play",
                        phase: "unloaded".to_string(),
                    })
                }
            };
            if state.ticker.is_none() {
                state.ticker = Some(tokio::spawn(Self::run_clock(Arc::clone(&self.inner), attempt)));
            }
            attempt
        };
        self.inner.emit(attempt, MediaEvent::Playing);
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        let attempt = {
            let mut state = lock(&self.inner.state);
            if let Some(handle) = state.ticker.take() {
                handle.abort();
            }
            state.attempt
        };
        if let Some(attempt) = attempt {
            self.inner.emit(attempt, MediaEvent::Paused);
        }
        Ok(())
    }

    async fn seek(&self, seconds: f64) -> Result<()> {
        let (attempt, position) = {
            let mut state = lock(&self.inner.state);
            state.position = seconds.clamp(0.0, self.inner.duration);
            (state.attempt, state.position)
        };
        if let Some(attempt) = attempt {
            self.inner.emit(attempt, MediaEvent::TimeUpdate(position));
        }
        Ok(())
    }

    async fn set_muted(&self, muted: bool) {
        lock(&self.inner.state).muted = muted;
    }

    async fn set_volume(&self, volume: f64) {
        lock(&self.inner.state).volume = volume.clamp(0.0, 1.0);
    }

    async fn current_time(&self) -> f64 {
        lock(&self.inner.state).position
    }

    fn adaptive_session(&self) -> Option<Arc<dyn AdaptiveSession>> {
        lock(&self.inner.state)
            .adaptive
            .clone()
            .map(|s| s as Arc<dyn AdaptiveSession>)
    }

    fn performance(&self) -> Arc<dyn PerformanceSource> {
        self.inner.stats.clone()
    }
}

impl Drop for HeadlessElement {
    fn drop(&mut self) {
        lock(&self.inner.state).stop_tasks();
    }
}

/// Map a load failure to the native error category
fn error_kind(error: &Error, format: SourceFormat) -> MediaErrorKind {
    let missing = matches!(error, Error::HttpStatus { status: 404 | 410, .. })
        || matches!(error, Error::ManifestNotFound { .. });
    if missing && format == SourceFormat::Adaptive {
        return MediaErrorKind::ManifestNotFound;
    }
    match error.class() {
        ErrorClass::Network => MediaErrorKind::Network,
        ErrorClass::Format if matches!(error, Error::HttpStatus { .. }) => {
            MediaErrorKind::SourceNotSupported
        }
        _ => MediaErrorKind::Decode,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
