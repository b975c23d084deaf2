//! Playback controller
//!
//! Owns the one live [`PlaybackSession`] and drives a [`MediaElement`]
//! through the candidate chain of the current item:
//!
//! ```text
//! load ──► Resolving ──► Loading ──► Ready ──► Playing ◄──► Buffering
//!                          ▲   │                  │
//!                 retry /  │   ▼                  ▼
//!                 next  ── Failed ──► TrackFailed ──► (delay) advance
//! ```
//!
//! Every load bumps a generation counter and every attach an attempt
//! counter. Element events carry the [`AttemptId`] they were produced under;
//! anything not matching the live attempt is dropped, so a slow failure from
//! an abandoned candidate can never move the session.

use crate::cache::SegmentCache;
use crate::capability::CapabilityProbe;
use crate::config::PlaybackConfig;
use crate::control::{Controls, PhaseUpdate, PlayIntent, StateUpdate};
use crate::fetch::FetchPriority;
use crate::media::{AttemptId, EventSink, EventStream, MediaElement, MediaErrorKind, MediaEvent};
use crate::quality::QualityController;
use crate::resolver::SourceResolver;
use crate::sequencer::PlaylistSequencer;
use crate::telemetry::{AdvanceReason, PlaybackEvent, TelemetryBus};
use crate::{CandidateChain, Error, ErrorClass, Phase, PlaybackSession, PlaylistItem, Result, SessionId};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Collaborators of a controller
pub struct ControllerParts {
    pub element: Arc<dyn MediaElement>,
    pub probe: Arc<CapabilityProbe>,
    pub resolver: Arc<SourceResolver>,
    pub sequencer: Arc<PlaylistSequencer>,
    pub cache: Arc<SegmentCache>,
    pub quality: Arc<QualityController>,
    pub telemetry: Arc<TelemetryBus>,
}

struct ControllerState {
    session: Option<PlaybackSession>,
    item: Option<PlaylistItem>,
    chain: Option<CandidateChain>,
    attempt: AttemptId,
    /// The active candidate already used its network retry
    retried: bool,
    /// An advance is scheduled for this generation
    advancing: bool,
    /// The live attempt reached Ready
    ready: bool,
    preloaded: bool,
    /// Autoplay once ready; updated by play/pause at any time
    intent: PlayIntent,
    muted: bool,
    volume: f64,
}

impl ControllerState {
    fn phase(&self) -> Phase {
        self.session.as_ref().map_or(Phase::Idle, |s| s.phase)
    }

    fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    fn item_id(&self) -> String {
        self.item.as_ref().map(|i| i.id.clone()).unwrap_or_default()
    }
}

#[derive(Default)]
struct Tasks {
    pump: Option<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
    preload: Option<JoinHandle<()>>,
}

impl Tasks {
    fn cancel_item_tasks(&mut self) {
        for handle in [self.timer.take(), self.watchdog.take(), self.preload.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}

/// State machine over one media element
pub struct PlaybackController {
    config: PlaybackConfig,
    element: Arc<dyn MediaElement>,
    probe: Arc<CapabilityProbe>,
    resolver: Arc<SourceResolver>,
    sequencer: Arc<PlaylistSequencer>,
    cache: Arc<SegmentCache>,
    quality: Arc<QualityController>,
    telemetry: Arc<TelemetryBus>,
    state: Mutex<ControllerState>,
    generation: AtomicU64,
    advances: AtomicU64,
    sink: EventSink,
    events: Mutex<Option<EventStream>>,
    phase_tx: watch::Sender<PhaseUpdate>,
    tasks: Mutex<Tasks>,
}

impl PlaybackController {
    pub fn new(config: PlaybackConfig, parts: ControllerParts) -> Arc<Self> {
        let (sink, events) = mpsc::unbounded_channel();
        let (phase_tx, _) = watch::channel(PhaseUpdate {
            generation: 0,
            phase: Phase::Idle,
        });

        Arc::new(Self {
            state: Mutex::new(ControllerState {
                session: None,
                item: None,
                chain: None,
                attempt: AttemptId {
                    generation: 0,
                    attempt: 0,
                },
                retried: false,
                advancing: false,
                ready: false,
                preloaded: false,
                intent: if config.autoplay {
                    PlayIntent::Play
                } else {
                    PlayIntent::Pause
                },
                muted: config.initial_muted,
                volume: config.initial_volume,
            }),
            config,
            element: parts.element,
            probe: parts.probe,
            resolver: parts.resolver,
            sequencer: parts.sequencer,
            cache: parts.cache,
            quality: parts.quality,
            telemetry: parts.telemetry,
            generation: AtomicU64::new(0),
            advances: AtomicU64::new(0),
            sink,
            events: Mutex::new(Some(events)),
            phase_tx,
            tasks: Mutex::new(Tasks::default()),
        })
    }

    /// Start consuming element events
    pub async fn start(self: &Arc<Self>) {
        let Some(mut events) = self.events.lock().await.take() else {
            debug!("Event pump already running");
            return;
        };

        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some((attempt, event)) = events.recv().await {
                let Some(controller) = weak.upgrade() else {
                    break;
                };
                controller.handle_event(attempt, event).await;
            }
            debug!("Event pump stopped");
        });
        self.tasks.lock().await.pump = Some(handle);
    }

    /// Load `item`, abandoning whatever was loading or playing
    #[instrument(skip(self, item), fields(item_id = %item.id))]
    pub async fn load(self: &Arc<Self>, item: PlaylistItem) -> Result<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.tasks.lock().await.cancel_item_tasks();
        self.element.detach().await;
        self.quality.detach().await;

        {
            let mut state = self.state.lock().await;
            let from = state.phase();
            if let Some(old) = state.session.take() {
                self.quality.forget_session(old.id).await;
            }

            let session = PlaybackSession::new(item.id.clone(), state.muted, state.volume);
            let session_id = session.id;
            state.session = Some(session);
            state.item = Some(item.clone());
            state.chain = None;
            state.attempt = AttemptId { generation, attempt: 0 };
            state.retried = false;
            state.advancing = false;
            state.preloaded = false;

            self.phase_tx.send_replace(PhaseUpdate {
                generation,
                phase: Phase::Resolving,
            });
            self.telemetry
                .emit(
                    Some(session_id),
                    PlaybackEvent::StateChange {
                        from,
                        to: Phase::Resolving,
                        position: 0.0,
                    },
                )
                .await;
        }
        info!(generation, "Loading item");

        let caps = self.probe.probe().clone();
        let resolved = self.resolver.resolve(&item, &caps).await;

        let mut state = self.state.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "Discarding stale resolution");
            return Ok(());
        }

        let chain = match resolved {
            Ok(chain) if !chain.is_empty() => chain,
            Ok(_) => {
                warn!("No candidates for item");
                self.fail_track(&mut state, 0).await;
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, "Resolution failed");
                if let Some(session) = state.session.as_mut() {
                    session.last_error = Some(e.to_string());
                }
                self.fail_track(&mut state, 0).await;
                return Ok(());
            }
        };

        self.telemetry
            .emit(
                state.session_id(),
                PlaybackEvent::Loading {
                    item_id: item.id.clone(),
                    candidates: chain.len(),
                },
            )
            .await;
        state.chain = Some(chain);

        self.attach(&mut state, 0).await;
        Ok(())
    }

    /// Move to `index` in the play order and load it
    pub async fn jump_to(self: &Arc<Self>, index: usize) -> Result<()> {
        let item = self.sequencer.set_index(index).await?;
        self.load(item).await
    }

    /// Skip forward without waiting for the current item to end
    pub async fn next_item(self: &Arc<Self>) -> Result<()> {
        let item = self.sequencer.next().await?;
        self.load(item).await
    }

    pub async fn previous_item(self: &Arc<Self>) -> Result<()> {
        let item = self.sequencer.prev().await?;
        self.load(item).await
    }

    /// Tear down the session
    pub async fn dispose(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut tasks = self.tasks.lock().await;
            tasks.cancel_item_tasks();
            if let Some(pump) = tasks.pump.take() {
                pump.abort();
            }
        }
        self.element.detach().await;
        self.quality.detach().await;

        let mut state = self.state.lock().await;
        if let Some(session) = state.session.take() {
            self.quality.forget_session(session.id).await;
            self.telemetry
                .emit(
                    Some(session.id),
                    PlaybackEvent::StateChange {
                        from: session.phase,
                        to: Phase::Idle,
                        position: session.current_time,
                    },
                )
                .await;
        }
        state.item = None;
        state.chain = None;
        self.phase_tx.send_replace(PhaseUpdate {
            generation,
            phase: Phase::Idle,
        });
        info!("Playback controller disposed");
    }

    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase()
    }

    /// Snapshot of the live session
    pub async fn session(&self) -> Option<PlaybackSession> {
        self.state.lock().await.session.clone()
    }

    pub async fn current_item(&self) -> Option<PlaylistItem> {
        self.state.lock().await.item.clone()
    }

    pub async fn candidate_chain(&self) -> Option<CandidateChain> {
        self.state.lock().await.chain.clone()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<PhaseUpdate> {
        self.phase_tx.subscribe()
    }

    /// Automatic advances requested so far
    pub fn advance_requests(&self) -> u64 {
        self.advances.load(Ordering::SeqCst)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    async fn handle_event(self: &Arc<Self>, attempt: AttemptId, event: MediaEvent) {
        let mut state = self.state.lock().await;
        if state.attempt != attempt || self.generation.load(Ordering::SeqCst) != attempt.generation {
            trace!(%attempt, live = %state.attempt, ?event, "Dropping stale event");
            return;
        }

        let phase = state.phase();
        match event {
            MediaEvent::TimeUpdate(seconds) => {
                if let Some(session) = state.session.as_mut() {
                    session.current_time = seconds;
                }
            }
            MediaEvent::DurationChange(seconds) => {
                if let Some(session) = state.session.as_mut() {
                    session.duration = (seconds.is_finite() && seconds >= 0.0).then_some(seconds);
                }
            }
            MediaEvent::CanPlay => {
                // A waiting event may have moved the attempt to Buffering before it was ever ready
                if !state.ready && matches!(phase, Phase::Loading | Phase::Buffering) {
                    if phase == Phase::Buffering {
                        let position = state.session.as_ref().map_or(0.0, |s| s.current_time);
                        self.telemetry
                            .emit(
                                state.session_id(),
                                PlaybackEvent::BufferingChanged {
                                    buffering: false,
                                    position,
                                },
                            )
                            .await;
                    }
                    self.on_ready(&mut state).await;
                }
            }
            MediaEvent::Waiting => {
                if matches!(phase, Phase::Loading | Phase::Ready | Phase::Playing | Phase::Paused) {
                    self.set_phase(&mut state, Phase::Buffering).await;
                    let position = state.session.as_ref().map_or(0.0, |s| s.current_time);
                    self.telemetry
                        .emit(
                            state.session_id(),
                            PlaybackEvent::BufferingChanged {
                                buffering: true,
                                position,
                            },
                        )
                        .await;
                    self.arm_watchdog(attempt).await;
                }
            }
            MediaEvent::Playing => {
                if self.set_phase(&mut state, Phase::Playing).await {
                    self.disarm_watchdog().await;
                    if phase == Phase::Buffering {
                        let position = state.session.as_ref().map_or(0.0, |s| s.current_time);
                        self.telemetry
                            .emit(
                                state.session_id(),
                                PlaybackEvent::BufferingChanged {
                                    buffering: false,
                                    position,
                                },
                            )
                            .await;
                    }
                }
            }
            MediaEvent::Paused => {
                if matches!(phase, Phase::Playing | Phase::Buffering | Phase::Ready) {
                    self.set_phase(&mut state, Phase::Paused).await;
                    self.disarm_watchdog().await;
                }
            }
            MediaEvent::Ended => {
                if !state.advancing {
                    state.advancing = true;
                    self.disarm_watchdog().await;
                    info!(item_id = %state.item_id(), "Item ended");
                    self.schedule_advance(attempt.generation, Duration::ZERO, AdvanceReason::Ended)
                        .await;
                }
            }
            MediaEvent::Error { kind, message } => {
                if matches!(phase, Phase::Failed | Phase::TrackFailed) {
                    trace!(%attempt, "Ignoring error after failure");
                    return;
                }
                self.on_failure(&mut state, kind, message).await;
            }
        }
    }

    async fn on_ready(self: &Arc<Self>, state: &mut ControllerState) {
        state.ready = true;
        self.disarm_watchdog().await;
        self.set_phase(state, Phase::Ready).await;

        let Some((session_id, index)) = state.session.as_ref().map(|s| (s.id, s.active_candidate_index)) else {
            return;
        };
        let item_id = state.item_id();
        let format = state.chain.as_ref().and_then(|c| c.get(index)).map(|c| c.format);
        if let Some(format) = format {
            info!(item_id = %item_id, index, format = %format, "Candidate ready");
            self.telemetry
                .emit(Some(session_id), PlaybackEvent::Ready { item_id: item_id.clone(), index, format })
                .await;
        }

        let max_level = self.resolver.hints().get(&item_id).and_then(|h| h.max_quality_level);
        self.quality
            .attach(session_id, self.element.performance(), self.element.adaptive_session(), max_level)
            .await;

        if self.config.preload_next && !state.preloaded {
            state.preloaded = true;
            self.spawn_preload().await;
        }

        if state.intent == PlayIntent::Play {
            if let Err(e) = self.element.play().await {
                warn!(error = %e, "Autoplay rejected");
            }
        } else {
            debug!(item_id = %item_id, "Autoplay suppressed by pause intent");
        }
    }

    async fn on_failure(self: &Arc<Self>, state: &mut ControllerState, kind: MediaErrorKind, message: String) {
        let Some(chain) = state.chain.clone() else {
            return;
        };
        let Some(session) = state.session.as_mut() else {
            return;
        };
        let index = session.active_candidate_index;
        session.last_error = Some(format!("{}: {}", kind, message));
        let session_id = session.id;

        self.disarm_watchdog().await;
        self.set_phase(state, Phase::Failed).await;

        let Some(candidate) = chain.get(index) else {
            return;
        };
        let class = kind.class();
        warn!(
            attempt = %state.attempt,
            index,
            format = %candidate.format,
            url = %candidate.url,
            kind = %kind,
            message = %message,
            "Candidate failed"
        );

        let retrying = class == ErrorClass::Network && !state.retried;
        self.telemetry
            .emit(
                Some(session_id),
                PlaybackEvent::CandidateFailed {
                    item_id: chain.item_id.clone(),
                    index,
                    format: candidate.format,
                    kind,
                    message,
                    retrying,
                },
            )
            .await;

        if retrying {
            state.retried = true;
            self.schedule_retry(state.attempt, index).await;
            return;
        }

        let next = match class {
            ErrorClass::ManifestNotFound => chain.next_progressive_after(index),
            _ => Some(index + 1).filter(|&i| i < chain.len()),
        };

        match next {
            Some(next) => {
                state.retried = false;
                self.attach(state, next).await;
            }
            None => self.fail_track(state, chain.len()).await,
        }
    }

    /// Attach candidate `index` under a fresh attempt id
    async fn attach(&self, state: &mut ControllerState, index: usize) {
        let Some(candidate) = state.chain.as_ref().and_then(|c| c.get(index)).cloned() else {
            return;
        };

        state.attempt.attempt += 1;
        state.ready = false;
        let attempt = state.attempt;
        let (muted, volume) = (state.muted, state.volume);
        if let Some(session) = state.session.as_mut() {
            session.active_candidate_index = index;
            session.current_time = 0.0;
            session.duration = None;
        }
        self.set_phase(state, Phase::Loading).await;

        info!(
            %attempt,
            index,
            format = %candidate.format,
            url = %candidate.url,
            "Attaching candidate"
        );
        self.telemetry
            .emit(
                state.session_id(),
                PlaybackEvent::CandidateAttached {
                    item_id: state.item_id(),
                    index,
                    format: candidate.format,
                    url: candidate.url.to_string(),
                },
            )
            .await;

        self.element.set_muted(muted).await;
        self.element.set_volume(volume).await;
        if let Err(e) = self.element.attach(attempt, &candidate, self.sink.clone()).await {
            let _ = self
                .sink
                .send((attempt, MediaEvent::error(MediaErrorKind::SourceNotSupported, e.to_string())));
        }
    }

    /// Every candidate failed: surface one error and advance after a delay
    async fn fail_track(self: &Arc<Self>, state: &mut ControllerState, attempted: usize) {
        if state.advancing {
            return;
        }
        state.advancing = true;

        self.element.detach().await;
        self.quality.detach().await;
        self.set_phase(state, Phase::TrackFailed).await;

        let item_id = state.item_id();
        let err = Error::ChainExhausted {
            item_id: item_id.clone(),
            attempted,
        };
        error!(item_id = %item_id, attempted, "All candidates failed");
        self.telemetry
            .emit(
                state.session_id(),
                PlaybackEvent::Error {
                    item_id,
                    code: err.error_code().to_string(),
                    message: err.to_string(),
                },
            )
            .await;

        self.schedule_advance(state.attempt.generation, self.config.advance_delay(), AdvanceReason::TrackFailed)
            .await;
    }

    async fn schedule_retry(self: &Arc<Self>, failed: AttemptId, index: usize) {
        let backoff = self.config.network_retry_backoff();
        debug!(%failed, index, backoff_ms = backoff.as_millis() as u64, "Retrying candidate");

        let controller = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            let mut state = controller.state.lock().await;
            if state.attempt != failed || controller.generation.load(Ordering::SeqCst) != failed.generation {
                return;
            }
            controller.attach(&mut state, index).await;
        });
        self.replace_timer(handle).await;
    }

    async fn schedule_advance(self: &Arc<Self>, generation: u64, delay: Duration, reason: AdvanceReason) {
        let controller = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Detached so the load it starts cannot be cancelled with this timer
            tokio::spawn(controller.advance(generation, reason));
        });
        self.replace_timer(handle).await;
    }

    fn advance(self: Arc<Self>, generation: u64, reason: AdvanceReason) -> BoxFuture<()> {
        Box::pin(async move {
            if self.generation.load(Ordering::SeqCst) != generation {
                debug!(generation, "Skipping stale advance");
                return;
            }
            self.advances.fetch_add(1, Ordering::SeqCst);

            let (from_item, session_id) = {
                let state = self.state.lock().await;
                (state.item_id(), state.session_id())
            };
            let next = match self.sequencer.next().await {
                Ok(next) => next,
                Err(e) => {
                    warn!(error = %e, "No item to advance to");
                    return;
                }
            };

            info!(from = %from_item, to = %next.id, ?reason, "Advancing");
            self.telemetry
                .emit(
                    session_id,
                    PlaybackEvent::Advanced {
                        from_item,
                        to_item: next.id.clone(),
                        reason,
                    },
                )
                .await;

            if let Err(e) = self.load(next).await {
                warn!(error = %e, "Advance failed to load");
            }
        })
    }

    async fn arm_watchdog(&self, attempt: AttemptId) {
        let timeout = self.config.stall_timeout();
        let sink = self.sink.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            warn!(%attempt, timeout_ms = timeout.as_millis() as u64, "Playback stalled");
            let message = format!("stalled for {} ms", timeout.as_millis());
            let _ = sink.send((attempt, MediaEvent::error(MediaErrorKind::Network, message)));
        });

        let mut tasks = self.tasks.lock().await;
        if let Some(previous) = tasks.watchdog.replace(handle) {
            previous.abort();
        }
    }

    async fn disarm_watchdog(&self) {
        if let Some(handle) = self.tasks.lock().await.watchdog.take() {
            handle.abort();
        }
    }

    async fn replace_timer(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().await;
        if let Some(previous) = tasks.timer.replace(handle) {
            previous.abort();
        }
    }

    /// Warm the cache with the first candidate of the next item
    async fn spawn_preload(&self) {
        let sequencer = Arc::clone(&self.sequencer);
        let resolver = Arc::clone(&self.resolver);
        let probe = Arc::clone(&self.probe);
        let cache = Arc::clone(&self.cache);

        let handle = tokio::spawn(async move {
            let Some(next) = sequencer.peek_next().await else {
                return;
            };
            let caps = probe.probe().clone();
            match resolver.resolve(&next, &caps).await {
                Ok(chain) => {
                    if let Some(first) = chain.get(0) {
                        debug!(item_id = %next.id, url = %first.url, "Preloading next item");
                        cache.preload(&first.url, FetchPriority::Low).await;
                    }
                }
                Err(e) => debug!(item_id = %next.id, error = %e, "Preload resolution failed"),
            }
        });

        let mut tasks = self.tasks.lock().await;
        if let Some(previous) = tasks.preload.replace(handle) {
            previous.abort();
        }
    }

    /// Validate and apply a phase change; returns whether it happened
    async fn set_phase(&self, state: &mut ControllerState, to: Phase) -> bool {
        let Some(session) = state.session.as_mut() else {
            return false;
        };
        let from = session.phase;
        if from == to {
            return false;
        }
        if !from.can_transition_to(to) {
            debug!(from = %from, to = %to, "Ignoring invalid transition");
            return false;
        }

        session.phase = to;
        let position = session.current_time;
        let session_id = session.id;
        self.phase_tx.send_replace(PhaseUpdate {
            generation: state.attempt.generation,
            phase: to,
        });

        self.telemetry
            .emit(Some(session_id), PlaybackEvent::StateChange { from, to, position })
            .await;
        info!(from = %from, to = %to, "State transition");
        true
    }

    fn phase_error(operation: &'static str, phase: Phase) -> Error {
        Error::InvalidPhase {
            operation,
            phase: phase.to_string(),
        }
    }
}

#[async_trait]
impl Controls for PlaybackController {
    /// Before Ready the intent is only recorded and applied once the candidate can play
    async fn play(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.intent = PlayIntent::Play;
        match state.phase() {
            Phase::Ready | Phase::Paused | Phase::Buffering | Phase::Playing if state.ready => {
                self.element.play().await
            }
            Phase::Idle => Err(Self::phase_error("play", Phase::Idle)),
            phase => {
                debug!(phase = %phase, "Play deferred until ready");
                Ok(())
            }
        }
    }

    async fn pause(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.intent = PlayIntent::Pause;
        match state.phase() {
            Phase::Ready | Phase::Paused | Phase::Buffering | Phase::Playing if state.ready => {
                self.element.pause().await
            }
            Phase::Idle => Err(Self::phase_error("pause", Phase::Idle)),
            phase => {
                debug!(phase = %phase, "Pause recorded until ready");
                Ok(())
            }
        }
    }

    #[instrument(skip(self))]
    async fn seek(&self, seconds: f64) -> Result<()> {
        let mut state = self.state.lock().await;
        let phase = state.phase();
        if !phase.is_seekable() || !state.ready {
            return Err(Self::phase_error("seek", phase));
        }

        let Some(session) = state.session.as_mut() else {
            return Err(Self::phase_error("seek", phase));
        };
        let requested = if seconds.is_finite() { seconds } else { 0.0 };
        let target = match session.duration {
            Some(duration) => requested.clamp(0.0, duration),
            None => requested.max(0.0),
        };

        self.element.seek(target).await?;
        session.current_time = target;
        debug!(requested = seconds, target, "Seeked");
        Ok(())
    }

    async fn apply_state(&self, update: StateUpdate) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(muted) = update.muted {
            state.muted = muted;
        }
        if let Some(volume) = update.volume {
            state.volume = volume.clamp(0.0, 1.0);
        }
        let (muted, volume) = (state.muted, state.volume);

        let Some(session) = state.session.as_mut() else {
            debug!(muted, volume, "Recorded state while idle");
            return Ok(());
        };
        session.is_muted = muted;
        session.volume = volume;

        if update.muted.is_some() {
            self.element.set_muted(muted).await;
        }
        if update.volume.is_some() {
            self.element.set_volume(volume).await;
        }
        Ok(())
    }

    async fn position(&self) -> f64 {
        self.state
            .lock()
            .await
            .session
            .as_ref()
            .map_or(0.0, |s| s.current_time)
    }

    fn watch_phase(&self) -> watch::Receiver<PhaseUpdate> {
        self.subscribe_phase()
    }
}
