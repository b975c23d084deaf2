//! Control surface
//!
//! The only entry point external UI uses: play, pause, seek and
//! mute/volume. Calls are relayed to whichever [`Controls`] implementation is
//! registered. The last desired state is remembered and re-applied on every
//! registration, so swapping the backing element is invisible to callers.

use crate::{Error, Phase, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Partial mute/volume update
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub muted: Option<bool>,
    /// 0.0-1.0
    pub volume: Option<f64>,
}

impl StateUpdate {
    pub fn muted(muted: bool) -> Self {
        Self {
            muted: Some(muted),
            volume: None,
        }
    }

    pub fn volume(volume: f64) -> Self {
        Self {
            muted: None,
            volume: Some(volume),
        }
    }
}

/// Phase of the backing session, tagged with the load that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseUpdate {
    /// Bumped on every item load
    pub generation: u64,
    pub phase: Phase,
}

/// Transport primitives backed by a concrete player
#[async_trait]
pub trait Controls: Send + Sync {
    async fn play(&self) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    /// Seek to `seconds`; rejected until the session is seekable
    async fn seek(&self, seconds: f64) -> Result<()>;

    async fn apply_state(&self, update: StateUpdate) -> Result<()>;

    /// Playback position in seconds
    async fn position(&self) -> f64;

    /// Phase updates of the backing session
    fn watch_phase(&self) -> watch::Receiver<PhaseUpdate>;
}

/// Whether the user wants playback running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayIntent {
    #[default]
    Play,
    Pause,
}

/// State re-applied on registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredState {
    pub muted: bool,
    pub volume: f64,
    pub intent: PlayIntent,
    /// Seek to issue once the session becomes seekable
    pub resume_position: Option<f64>,
}

impl Default for DesiredState {
    fn default() -> Self {
        Self {
            muted: false,
            volume: 1.0,
            intent: PlayIntent::Play,
            resume_position: None,
        }
    }
}

/// Viewer profile as reported by the authentication collaborator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileStatus {
    pub authenticated: bool,
    /// Relationship of the viewer to the content owner
    pub relationship: Option<String>,
}

/// Authenticated-profile check supplied by the host application
#[async_trait]
pub trait ProfileGate: Send + Sync {
    async fn check(&self) -> Result<ProfileStatus>;
}

/// Gate with a fixed answer
pub struct StaticProfileGate(pub ProfileStatus);

#[async_trait]
impl ProfileGate for StaticProfileGate {
    async fn check(&self) -> Result<ProfileStatus> {
        Ok(self.0.clone())
    }
}

/// Swappable registration point for transport controls
pub struct ControlSurface {
    controls: RwLock<Option<Arc<dyn Controls>>>,
    desired: Arc<Mutex<DesiredState>>,
    pending_seek: Mutex<Option<JoinHandle<()>>>,
}

impl ControlSurface {
    pub fn new(initial: DesiredState) -> Self {
        Self {
            controls: RwLock::new(None),
            desired: Arc::new(Mutex::new(initial)),
            pending_seek: Mutex::new(None),
        }
    }

    /// Back the surface with `controls` and re-apply the desired state
    pub async fn register(&self, controls: Arc<dyn Controls>) {
        self.cancel_pending_seek().await;
        *self.controls.write().await = Some(Arc::clone(&controls));

        let desired = self.desired.lock().await.clone();
        info!(
            muted = desired.muted,
            volume = desired.volume,
            intent = ?desired.intent,
            resume = ?desired.resume_position,
            "Controls registered"
        );

        let update = StateUpdate {
            muted: Some(desired.muted),
            volume: Some(desired.volume),
        };
        if let Err(e) = controls.apply_state(update).await {
            warn!(error = %e, "Failed to re-apply mute/volume");
        }

        let result = match desired.intent {
            PlayIntent::Play => controls.play().await,
            PlayIntent::Pause => controls.pause().await,
        };
        if let Err(e) = result {
            debug!(error = %e, "Play intent deferred to the controller");
        }

        if let Some(position) = desired.resume_position {
            self.seek_when_ready(controls, position).await;
        }
    }

    /// Detach the current controls, remembering their position
    pub async fn unregister(&self) -> Option<Arc<dyn Controls>> {
        self.cancel_pending_seek().await;
        let controls = self.controls.write().await.take()?;

        let position = controls.position().await;
        if position > 0.0 {
            self.desired.lock().await.resume_position = Some(position);
        }
        debug!(position, "Controls unregistered");
        Some(controls)
    }

    pub async fn is_registered(&self) -> bool {
        self.controls.read().await.is_some()
    }

    pub async fn desired_state(&self) -> DesiredState {
        self.desired.lock().await.clone()
    }

    pub async fn play(&self) -> Result<()> {
        self.desired.lock().await.intent = PlayIntent::Play;
        match self.current().await {
            Some(controls) => controls.play().await,
            None => Ok(()),
        }
    }

    pub async fn pause(&self) -> Result<()> {
        self.desired.lock().await.intent = PlayIntent::Pause;
        match self.current().await {
            Some(controls) => controls.pause().await,
            None => Ok(()),
        }
    }

    /// Seek now, or as soon as the session becomes seekable
    pub async fn seek(&self, seconds: f64) -> Result<()> {
        let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        self.desired.lock().await.resume_position = Some(seconds);

        let Some(controls) = self.current().await else {
            return Ok(());
        };
        self.seek_when_ready(controls, seconds).await;
        Ok(())
    }

    pub async fn apply_state(&self, update: StateUpdate) -> Result<()> {
        {
            let mut desired = self.desired.lock().await;
            if let Some(muted) = update.muted {
                desired.muted = muted;
            }
            if let Some(volume) = update.volume {
                desired.volume = volume.clamp(0.0, 1.0);
            }
        }
        match self.current().await {
            Some(controls) => controls.apply_state(update).await,
            None => Ok(()),
        }
    }

    /// Whether transport controls should be shown to this viewer
    pub async fn controls_enabled(&self, gate: &dyn ProfileGate) -> bool {
        match gate.check().await {
            Ok(status) => status.authenticated,
            Err(e) => {
                warn!(error = %e, "Profile check failed, hiding controls");
                false
            }
        }
    }

    async fn current(&self) -> Option<Arc<dyn Controls>> {
        self.controls.read().await.clone()
    }

    /// A deferred seek belongs to the item loaded when it was issued and is
    /// dropped once another item loads
    async fn seek_when_ready(&self, controls: Arc<dyn Controls>, seconds: f64) {
        self.cancel_pending_seek().await;

        let mut updates = controls.watch_phase();
        let issued = *updates.borrow_and_update();

        match controls.seek(seconds).await {
            Ok(()) => {
                clear_resume(&self.desired, seconds).await;
                return;
            }
            Err(Error::InvalidPhase { phase, .. }) => {
                debug!(seconds, phase = %phase, "Seek pending until seekable");
            }
            Err(e) => {
                warn!(seconds, error = %e, "Seek failed");
                return;
            }
        }

        let desired = Arc::clone(&self.desired);
        // Issued while idle: bind to the next item that loads
        let mut bound = (issued.phase != Phase::Idle).then_some(issued.generation);
        let handle = tokio::spawn(async move {
            loop {
                let update = *updates.borrow_and_update();
                match bound {
                    Some(generation) if generation != update.generation => {
                        debug!(seconds, generation, current = update.generation, "Item changed, pending seek dropped");
                        clear_resume(&desired, seconds).await;
                        return;
                    }
                    None if update.phase != Phase::Idle => bound = Some(update.generation),
                    _ => {}
                }

                if update.phase.is_seekable() {
                    match controls.seek(seconds).await {
                        Ok(()) => {
                            clear_resume(&desired, seconds).await;
                            debug!(seconds, "Pending seek applied");
                            return;
                        }
                        Err(Error::InvalidPhase { .. }) => {}
                        Err(e) => {
                            debug!(seconds, error = %e, "Pending seek failed");
                            return;
                        }
                    }
                }

                if updates.changed().await.is_err() {
                    return;
                }
            }
        });
        *self.pending_seek.lock().await = Some(handle);
    }

    async fn cancel_pending_seek(&self) {
        if let Some(handle) = self.pending_seek.lock().await.take() {
            handle.abort();
        }
    }
}

async fn clear_resume(desired: &Mutex<DesiredState>, seconds: f64) {
    let mut desired = desired.lock().await;
    if desired.resume_position == Some(seconds) {
        desired.resume_position = None;
    }
}

impl Default for ControlSurface {
    fn default() -> Self {
        Self::new(DesiredState::default())
    }
}
