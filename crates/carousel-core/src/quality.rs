//! Quality controller
//!
//! Scores live performance samples and recommends rendition changes to the
//! active adaptive session:
//!
//! - Score = 100 minus weighted penalties, clamped to 0-100
//! - Below `low_threshold`: step down one level
//! - Above `high_threshold` with bandwidth headroom: step up one level
//! - Otherwise hold (never dispatched)
//!
//! At most one directive per session is issued within the cooldown window.

use crate::{
    config::QualityConfig,
    media::{AdaptiveSession, PerformanceSource},
    PerformanceSample, QualityAction, QualityDirective, SessionId,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace};

/// Observer of dispatched directives
pub type RecommendationCallback = Box<dyn Fn(SessionId, &QualityDirective) + Send + Sync>;

/// EWMA bandwidth estimator (alpha = 0.2)
#[derive(Debug, Clone, Copy, Default)]
pub struct BandwidthEstimator {
    estimate: u64,
}

impl BandwidthEstimator {
    const ALPHA: f64 = 0.2;

    /// Fold a new measurement in; unknown (0) measurements are ignored
    pub fn update(&mut self, sample_bps: u64) -> u64 {
        if sample_bps == 0 {
            return self.estimate;
        }
        self.estimate = if self.estimate == 0 {
            sample_bps
        } else {
            (self.estimate as f64 * (1.0 - Self::ALPHA) + sample_bps as f64 * Self::ALPHA) as u64
        };
        self.estimate
    }

    pub fn estimate(&self) -> u64 {
        self.estimate
    }
}

/// Bounded performance score of one sample
pub fn score(sample: &PerformanceSample, bandwidth_bps: u64, config: &QualityConfig) -> f64 {
    let w = &config.weights;

    let fps_shortfall = ((config.target_fps - sample.fps) / config.target_fps).clamp(0.0, 1.0);
    let dropped = sample.dropped_frame_ratio.clamp(0.0, 1.0);
    let buffering = (sample.buffering_ms.max(0.0) / 1000.0 * w.buffering_per_second).min(w.buffering_cap);
    let low_bandwidth = if bandwidth_bps > 0 && bandwidth_bps < config.min_bandwidth_bps {
        w.low_bandwidth
    } else {
        0.0
    };

    let penalty = fps_shortfall * w.frame_rate
        + dropped * w.dropped_frames
        + buffering
        + low_bandwidth
        + sample.memory_pressure.clamp(0.0, 1.0) * w.memory
        + sample.cpu_pressure.clamp(0.0, 1.0) * w.cpu;

    (100.0 - penalty).clamp(0.0, 100.0)
}

/// Direction suggested by a score
pub fn decide(score: f64, has_headroom: bool, config: &QualityConfig) -> QualityAction {
    if score < config.low_threshold {
        QualityAction::Decrease
    } else if score > config.high_threshold && has_headroom {
        QualityAction::Increase
    } else {
        QualityAction::Hold
    }
}

struct Attachment {
    session_id: SessionId,
    source: Arc<dyn PerformanceSource>,
    adaptive: Option<Arc<dyn AdaptiveSession>>,
    /// Highest level allowed by a compatibility hint
    max_level: Option<usize>,
    estimator: BandwidthEstimator,
}

/// Rate-limited rendition steering for the active session
pub struct QualityController {
    config: QualityConfig,
    attachment: Mutex<Option<Attachment>>,
    last_directive: Mutex<HashMap<SessionId, Instant>>,
    callbacks: RwLock<Vec<RecommendationCallback>>,
    sampler: Mutex<Option<JoinHandle<()>>>,
}

impl QualityController {
    pub fn new(config: QualityConfig) -> Self {
        Self {
            config,
            attachment: Mutex::new(None),
            last_directive: Mutex::new(HashMap::new()),
            callbacks: RwLock::new(Vec::new()),
            sampler: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Observe `source` and steer `adaptive` for `session_id`
    #[instrument(skip(self, source, adaptive))]
    pub async fn attach(
        &self,
        session_id: SessionId,
        source: Arc<dyn PerformanceSource>,
        adaptive: Option<Arc<dyn AdaptiveSession>>,
        max_level: Option<usize>,
    ) {
        info!(
            levels = adaptive.as_ref().map(|a| a.level_count()).unwrap_or(0),
            ?max_level,
            "Quality controller attached"
        );
        if let (Some(adaptive), Some(cap)) = (adaptive.as_ref(), max_level) {
            let current = adaptive.current_level();
            if current > cap {
                info!(current, cap, "Starting level above item cap, clamping");
                adaptive.set_level(cap);
            }
        }
        *self.attachment.lock().await = Some(Attachment {
            session_id,
            source,
            adaptive,
            max_level,
            estimator: BandwidthEstimator::default(),
        });
    }

    /// Stop observing the current element
    pub async fn detach(&self) {
        if self.attachment.lock().await.take().is_some() {
            debug!("Quality controller detached");
        }
    }

    pub async fn is_attached(&self) -> bool {
        self.attachment.lock().await.is_some()
    }

    /// Register an observer of dispatched directives
    pub async fn on_recommendation(&self, callback: RecommendationCallback) {
        self.callbacks.write().await.push(callback);
    }

    /// Current sample of the attached element
    pub async fn sample(&self) -> Option<PerformanceSample> {
        self.attachment.lock().await.as_ref().map(|a| a.source.sample())
    }

    /// Score `sample` and dispatch a directive if one is due
    pub async fn evaluate(&self, sample: &PerformanceSample) -> Option<QualityDirective> {
        let now = Instant::now();
        let mut attachment = self.attachment.lock().await;
        let attachment = attachment.as_mut()?;

        let bandwidth = attachment.estimator.update(sample.bandwidth_estimate);
        let score = score(sample, bandwidth, &self.config);

        let adaptive = attachment.adaptive.as_ref()?;
        let count = adaptive.level_count();
        if count == 0 {
            return None;
        }
        let current = adaptive.current_level();
        let ceiling = attachment
            .max_level
            .map_or(count - 1, |cap| cap.min(count - 1));

        let headroom = current < ceiling
            && bandwidth > 0
            && adaptive
                .level_bitrate(current + 1)
                .is_some_and(|next| bandwidth as f64 >= next as f64 * self.config.bandwidth_margin);

        let directive = match decide(score, headroom, &self.config) {
            QualityAction::Decrease if current > 0 => QualityDirective {
                action: QualityAction::Decrease,
                level: (current - 1).min(ceiling),
            },
            QualityAction::Increase => QualityDirective {
                action: QualityAction::Increase,
                level: current + 1,
            },
            _ => {
                trace!(score, current, "Holding quality");
                return None;
            }
        };

        let session_id = attachment.session_id;
        {
            let mut last = self.last_directive.lock().await;
            if let Some(at) = last.get(&session_id) {
                if now.duration_since(*at) < self.config.cooldown() {
                    debug!(score, action = ?directive.action, "Directive suppressed by cooldown");
                    return None;
                }
            }
            last.insert(session_id, now);
        }

        adaptive.set_level(directive.level);

        info!(
            score,
            bandwidth_mbps = bandwidth as f64 / 1_000_000.0,
            action = ?directive.action,
            from = current,
            to = directive.level,
            "Quality directive issued"
        );

        for callback in self.callbacks.read().await.iter() {
            callback(session_id, &directive);
        }

        Some(directive)
    }

    /// Sample and evaluate on the configured cadence
    pub async fn start(self: &Arc<Self>) {
        let controller = Arc::downgrade(self);
        let interval = self.config.sample_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(controller) = controller.upgrade() else { break };
                if let Some(sample) = controller.sample().await {
                    controller.evaluate(&sample).await;
                }
            }
        });

        if let Some(old) = self.sampler.lock().await.replace(handle) {
            old.abort();
        }
    }

    /// Stop sampling and forget every session
    pub async fn stop(&self) {
        if let Some(handle) = self.sampler.lock().await.take() {
            handle.abort();
        }
        self.detach().await;
        self.last_directive.lock().await.clear();
    }

    /// Forget the cooldown state of a finished session
    pub async fn forget_session(&self, session_id: SessionId) {
        self.last_directive.lock().await.remove(&session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Ladder {
        bitrates: Vec<u64>,
        level: AtomicUsize,
    }

    impl Ladder {
        fn new(level: usize) -> Arc<Self> {
            Arc::new(Self {
                bitrates: vec![800_000, 2_500_000, 5_000_000],
                level: AtomicUsize::new(level),
            })
        }
    }

    impl AdaptiveSession for Ladder {
        fn level_count(&self) -> usize {
            self.bitrates.len()
        }

        fn current_level(&self) -> usize {
            self.level.load(Ordering::SeqCst)
        }

        fn set_level(&self, level: usize) {
            self.level.store(level.min(self.bitrates.len() - 1), Ordering::SeqCst);
        }

        fn level_bitrate(&self, level: usize) -> Option<u64> {
            self.bitrates.get(level).copied()
        }
    }

    struct Fixed(PerformanceSample);

    impl PerformanceSource for Fixed {
        fn sample(&self) -> PerformanceSample {
            self.0.clone()
        }
    }

    fn healthy(bandwidth: u64) -> PerformanceSample {
        PerformanceSample {
            fps: 30.0,
            bandwidth_estimate: bandwidth,
            ..Default::default()
        }
    }

    fn struggling() -> PerformanceSample {
        PerformanceSample {
            fps: 12.0,
            dropped_frame_ratio: 0.3,
            buffering_ms: 2_000.0,
            bandwidth_estimate: 600_000,
            ..Default::default()
        }
    }

    fn controller() -> QualityController {
        QualityController::new(QualityConfig::default())
    }

    #[test]
    fn test_score_bounds() {
        let config = QualityConfig::default();
        assert_eq!(score(&healthy(10_000_000), 10_000_000, &config), 100.0);

        let terrible = PerformanceSample {
            fps: 0.0,
            dropped_frame_ratio: 1.0,
            buffering_ms: 60_000.0,
            memory_pressure: 1.0,
            cpu_pressure: 1.0,
            ..Default::default()
        };
        assert_eq!(score(&terrible, 100_000, &config), 0.0);

        // 60% fps shortfall = 18, 30% dropped = 30, 2s buffering = 20, low bandwidth = 15
        let s = score(&struggling(), 600_000, &config);
        assert!((s - 17.0).abs() < 1e-9, "score {}", s);
    }

    #[test]
    fn test_decide() {
        let config = QualityConfig::default();
        assert_eq!(decide(30.0, true, &config), QualityAction::Decrease);
        assert_eq!(decide(90.0, true, &config), QualityAction::Increase);
        assert_eq!(decide(90.0, false, &config), QualityAction::Hold);
        assert_eq!(decide(60.0, true, &config), QualityAction::Hold);
    }

    #[test]
    fn test_bandwidth_estimator_ewma() {
        let mut estimator = BandwidthEstimator::default();
        assert_eq!(estimator.update(1_000_000), 1_000_000);
        assert_eq!(estimator.update(0), 1_000_000);
        assert_eq!(estimator.update(2_000_000), 1_200_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decrease_then_cooldown() {
        let controller = controller();
        let ladder = Ladder::new(2);
        controller
            .attach(SessionId::new(), Arc::new(Fixed(struggling())), Some(ladder.clone()), None)
            .await;

        let first = controller.evaluate(&struggling()).await.unwrap();
        assert_eq!(first.action, QualityAction::Decrease);
        assert_eq!(first.level, 1);
        assert_eq!(ladder.current_level(), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(controller.evaluate(&struggling()).await.is_none());
        assert_eq!(ladder.current_level(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        let third = controller.evaluate(&struggling()).await.unwrap();
        assert_eq!(third.level, 0);
    }

    #[tokio::test]
    async fn test_increase_requires_bandwidth_margin() {
        let controller = controller();
        let ladder = Ladder::new(0);
        controller
            .attach(SessionId::new(), Arc::new(Fixed(healthy(0))), Some(ladder.clone()), None)
            .await;

        // 2.5 Mbps * 1.25 = 3.125 Mbps needed for level 1
        assert!(controller.evaluate(&healthy(3_000_000)).await.is_none());

        let controller = QualityController::new(QualityConfig::default());
        controller
            .attach(SessionId::new(), Arc::new(Fixed(healthy(0))), Some(ladder.clone()), None)
            .await;
        let directive = controller.evaluate(&healthy(4_000_000)).await.unwrap();
        assert_eq!(directive.action, QualityAction::Increase);
        assert_eq!(directive.level, 1);
    }

    #[tokio::test]
    async fn test_hint_caps_level() {
        let controller = controller();
        let ladder = Ladder::new(1);
        controller
            .attach(SessionId::new(), Arc::new(Fixed(healthy(0))), Some(ladder.clone()), Some(1))
            .await;

        assert!(controller.evaluate(&healthy(50_000_000)).await.is_none());
        assert_eq!(ladder.current_level(), 1);
    }

    #[tokio::test]
    async fn test_attach_clamps_level_above_cap() {
        let controller = controller();
        let ladder = Ladder::new(2);
        controller
            .attach(SessionId::new(), Arc::new(Fixed(healthy(0))), Some(ladder.clone()), Some(0))
            .await;

        assert_eq!(ladder.current_level(), 0);
        assert!(controller.evaluate(&healthy(50_000_000)).await.is_none());
        assert_eq!(ladder.current_level(), 0);
    }

    #[tokio::test]
    async fn test_bottom_level_holds_without_consuming_cooldown() {
        let controller = controller();
        let ladder = Ladder::new(0);
        controller
            .attach(SessionId::new(), Arc::new(Fixed(healthy(0))), Some(ladder.clone()), None)
            .await;

        let mut starved = struggling();
        starved.bandwidth_estimate = 0;
        assert!(controller.evaluate(&starved).await.is_none());

        // The held decrease does not start a cooldown
        let directive = controller.evaluate(&healthy(4_000_000)).await.unwrap();
        assert_eq!(directive.action, QualityAction::Increase);
        assert_eq!(ladder.current_level(), 1);
    }

    #[tokio::test]
    async fn test_callbacks_receive_directives() {
        let controller = controller();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        controller
            .on_recommendation(Box::new(move |_, directive| {
                assert_eq!(directive.action, QualityAction::Decrease);
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .await;
        controller
            .attach(SessionId::new(), Arc::new(Fixed(healthy(0))), Some(Ladder::new(2)), None)
            .await;

        controller.evaluate(&struggling()).await;
        controller.evaluate(&struggling()).await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_without_adaptive_session_nothing_is_issued() {
        let controller = controller();
        controller
            .attach(SessionId::new(), Arc::new(Fixed(struggling())), None, None)
            .await;

        assert!(controller.sample().await.is_some());
        assert!(controller.evaluate(&struggling()).await.is_none());

        controller.detach().await;
        assert!(controller.sample().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampling_loop_dispatches() {
        let controller = Arc::new(controller());
        let ladder = Ladder::new(2);
        controller
            .attach(SessionId::new(), Arc::new(Fixed(struggling())), Some(ladder.clone()), None)
            .await;

        controller.start().await;
        tokio::time::sleep(Duration::from_millis(1_200)).await;
        assert_eq!(ladder.current_level(), 1);

        controller.stop().await;
        assert!(!controller.is_attached().await);
    }
}
