//! Integration tests for Carousel Core

use async_trait::async_trait;
use bytes::Bytes;
use carousel_core::{
    cache::ResponseMeta,
    controller::ControllerParts,
    media::{AdaptiveSession, EventSink, PerformanceSource},
    storage::{MemoryBlobStore, MemoryKeyValueStore},
    telemetry::AdvanceReason,
    AttemptId, CacheConfig, CapabilityProbe, CodecProfile, Error, FetchPriority, Fetcher, HintTable,
    MediaElement, MediaErrorKind, MediaEvent, MediaLayout, PerformanceSample, Phase, PlatformProfile,
    PlaybackConfig, PlaybackController, PlaybackEvent, PlaylistItem, PlaylistSequencer, QualityConfig,
    QualityController, Result, SegmentCache, SessionId, SourceCandidate, SourceFormat, SourceResolver,
    TelemetryBus,
};
use carousel_core::fetch::FetchResponse;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

const MB: usize = 1024 * 1024;

fn catalog(n: usize) -> Vec<PlaylistItem> {
    (0..n)
        .map(|i| PlaylistItem::new(format!("item-{}", i), format!("Item {}", i), format!("item-{}", i)))
        .collect()
}

// =============================================================================
// Fakes
// =============================================================================

/// Origin that can be switched off
struct Origin {
    body_len: usize,
    offline: AtomicBool,
    requests: AtomicUsize,
}

impl Origin {
    fn new(body_len: usize) -> Arc<Self> {
        Arc::new(Self {
            body_len,
            offline: AtomicBool::new(false),
            requests: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Fetcher for Origin {
    async fn fetch(&self, url: &Url, _etag: Option<&str>, _: FetchPriority) -> Result<FetchResponse> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Request {
                url: url.to_string(),
                message: "network unreachable".into(),
            });
        }
        Ok(FetchResponse::Fresh {
            body: Bytes::from(vec![1u8; self.body_len]),
            etag: None,
            content_type: Some("video/mp4".into()),
            max_age: None,
        })
    }

    async fn exists(&self, _url: &Url) -> Result<bool> {
        Ok(!self.offline.load(Ordering::SeqCst))
    }
}

struct NoSamples;

impl PerformanceSource for NoSamples {
    fn sample(&self) -> PerformanceSample {
        PerformanceSample::default()
    }
}

/// Element that fails the formats it is told to fail and plays everything else
struct FakeElement {
    failing: Mutex<Vec<(SourceFormat, MediaErrorKind)>>,
    attached: Mutex<Vec<SourceFormat>>,
}

impl FakeElement {
    fn new(failing: Vec<(SourceFormat, MediaErrorKind)>) -> Arc<Self> {
        Arc::new(Self {
            failing: Mutex::new(failing),
            attached: Mutex::new(Vec::new()),
        })
    }

    fn attached(&self) -> Vec<SourceFormat> {
        self.attached.lock().unwrap().clone()
    }

    /// Stop failing anything
    fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }
}

#[async_trait]
impl MediaElement for FakeElement {
    async fn attach(&self, attempt: AttemptId, candidate: &SourceCandidate, sink: EventSink) -> Result<()> {
        self.attached.lock().unwrap().push(candidate.format);
        let failure = self
            .failing
            .lock()
            .unwrap()
            .iter()
            .find(|(format, _)| *format == candidate.format)
            .map(|(_, kind)| *kind);

        let event = match failure {
            Some(kind) => MediaEvent::error(kind, "simulated failure"),
            None => MediaEvent::CanPlay,
        };
        let _ = sink.send((attempt, event));
        Ok(())
    }

    async fn detach(&self) {}

    async fn play(&self) -> Result<()> {
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        Ok(())
    }

    async fn seek(&self, _seconds: f64) -> Result<()> {
        Ok(())
    }

    async fn set_muted(&self, _muted: bool) {}

    async fn set_volume(&self, _volume: f64) {}

    async fn current_time(&self) -> f64 {
        0.0
    }

    fn adaptive_session(&self) -> Option<Arc<dyn AdaptiveSession>> {
        None
    }

    fn performance(&self) -> Arc<dyn PerformanceSource> {
        Arc::new(NoSamples)
    }
}

/// H.264/AAC client with a demuxing library: chains are `[adaptive, progressive]`
fn h264_platform() -> PlatformProfile {
    PlatformProfile {
        codecs: vec![CodecProfile::H264Main, CodecProfile::Aac],
        native_adaptive: false,
        media_source: true,
        ..PlatformProfile::default()
    }
}

struct Harness {
    controller: Arc<PlaybackController>,
    sequencer: Arc<PlaylistSequencer>,
    telemetry: Arc<TelemetryBus>,
}

fn layout() -> MediaLayout {
    MediaLayout::with_origin(Url::parse("https://media.example.com/").unwrap())
}

async fn harness(element: Arc<FakeElement>, items: usize) -> Harness {
    harness_with(element, items, SourceResolver::new(layout(), HintTable::new())).await
}

async fn harness_with(element: Arc<FakeElement>, items: usize, resolver: SourceResolver) -> Harness {
    let sequencer = Arc::new(PlaylistSequencer::with_seed(
        catalog(items),
        Arc::new(MemoryKeyValueStore::new()),
        5,
    ));
    sequencer.init().await;
    let telemetry = Arc::new(TelemetryBus::default());
    let cache = Arc::new(SegmentCache::new(
        CacheConfig::default(),
        Arc::new(MemoryKeyValueStore::new()),
        Arc::new(MemoryBlobStore::new()),
        Origin::new(16),
    ));

    let controller = PlaybackController::new(
        PlaybackConfig {
            autoplay: false,
            preload_next: false,
            ..PlaybackConfig::default()
        },
        ControllerParts {
            element,
            probe: Arc::new(CapabilityProbe::new(Arc::new(h264_platform()))),
            resolver: Arc::new(resolver),
            sequencer: Arc::clone(&sequencer),
            cache,
            quality: Arc::new(QualityController::new(QualityConfig::default())),
            telemetry: Arc::clone(&telemetry),
        },
    );
    controller.start().await;

    Harness {
        controller,
        sequencer,
        telemetry,
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

// =============================================================================
// Sequencer
// =============================================================================

#[tokio::test]
async fn test_every_item_once_per_cycle() {
    for seed in 0..10 {
        let seq = PlaylistSequencer::with_seed(catalog(7), Arc::new(MemoryKeyValueStore::new()), seed);
        seq.init().await;

        for _cycle in 0..3 {
            let mut seen = HashSet::new();
            let start = seq.current().await.unwrap().id;
            seen.insert(start);
            for _ in 0..6 {
                assert!(seen.insert(seq.next().await.unwrap().id), "repeat within a cycle");
            }
            assert_eq!(seen.len(), 7);
            seq.next().await.unwrap();
        }
    }
}

#[tokio::test]
async fn test_scenario_a_set_index_then_reshuffle() {
    let seq = PlaylistSequencer::with_seed(catalog(5), Arc::new(MemoryKeyValueStore::new()), 42);
    seq.init().await;

    seq.set_index(2).await.unwrap();
    assert_eq!(seq.current().await.unwrap().id, "item-2");

    let mut seen = HashSet::from(["item-2".to_string()]);
    let mut last = String::new();
    for _ in 0..4 {
        last = seq.next().await.unwrap().id;
        assert!(seen.insert(last.clone()));
    }
    assert_eq!(seen.len(), 5);

    let reshuffled = seq.next().await.unwrap();
    assert_ne!(reshuffled.id, last);
    assert!(seq.play_order().await.is_valid_for(5));
}

// =============================================================================
// Resolver
// =============================================================================

#[tokio::test]
async fn test_resolve_is_deterministic() {
    let layout = MediaLayout::with_origin(Url::parse("https://media.example.com/").unwrap());
    let caps = CapabilityProbe::new(Arc::new(PlatformProfile::default())).probe().clone();
    let item = catalog(1).remove(0);

    let first = SourceResolver::new(layout.clone(), HintTable::new());
    let second = SourceResolver::new(layout, HintTable::new());

    let a = first.resolve(&item, &caps).await.unwrap();
    let b = first.resolve(&item, &caps).await.unwrap();
    let c = second.resolve(&item, &caps).await.unwrap();

    assert_eq!(a, b);
    assert_eq!(a, c);
    let formats: Vec<SourceFormat> = a.iter().map(|c| c.format).collect();
    assert_eq!(
        formats,
        vec![SourceFormat::Adaptive, SourceFormat::Progressive, SourceFormat::AlternativeCodec]
    );
}

// =============================================================================
// Segment cache
// =============================================================================

fn segment(name: &str) -> Url {
    Url::parse(&format!("https://media.example.com/video/{}.mp4", name)).unwrap()
}

fn cache(config: CacheConfig, origin: Arc<Origin>) -> Arc<SegmentCache> {
    Arc::new(SegmentCache::new(
        config,
        Arc::new(MemoryKeyValueStore::new()),
        Arc::new(MemoryBlobStore::new()),
        origin,
    ))
}

#[tokio::test]
async fn test_cache_never_exceeds_limits() {
    let config = CacheConfig::default()
        .with_max_size(10 * MB as u64)
        .with_max_entries(4);
    let cache = cache(config, Origin::new(0));

    for (i, size) in [3, 1, 4, 1, 5, 2, 6, 2, 3].iter().enumerate() {
        cache
            .put(&segment(&format!("seg{}", i)), Bytes::from(vec![0u8; size * MB]), ResponseMeta::default())
            .await
            .unwrap();
        cache.evict().await;

        let stats = cache.stats().await;
        assert!(stats.total_bytes <= 10 * MB as u64, "size {}", stats.total_bytes);
        assert!(stats.entries <= 4, "entries {}", stats.entries);
    }
}

#[tokio::test]
async fn test_scenario_c_put_evicts_oldest_first() {
    let config = CacheConfig::default().with_max_size(15 * MB as u64);
    let cache = cache(config, Origin::new(0));

    for i in 0..4 {
        cache
            .put(&segment(&format!("old{}", i)), Bytes::from(vec![0u8; 2 * MB]), ResponseMeta::default())
            .await
            .unwrap();
    }
    assert_eq!(cache.stats().await.total_bytes, 8 * MB as u64);

    cache
        .put(&segment("big"), Bytes::from(vec![0u8; 10 * MB]), ResponseMeta::default())
        .await
        .unwrap();

    let stats = cache.stats().await;
    assert!(stats.total_bytes <= 15 * MB as u64);
    assert!(!cache.is_cached(&segment("old0")).await, "oldest entry evicted first");
    assert!(cache.is_cached(&segment("old3")).await);
    assert!(cache.is_cached(&segment("big")).await);
}

#[tokio::test]
async fn test_scenario_d_network_failure_serves_expired_entry() {
    let origin = Origin::new(1024);
    let config = CacheConfig::default()
        .with_default_ttl(Duration::from_millis(1))
        .with_revalidation(false);
    let cache = cache(config, origin.clone());
    let url = segment("offline");

    let original = tokio_test::assert_ok!(cache.fetch_through_cache(&url).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!cache.is_cached(&url).await, "entry should be expired");

    origin.offline.store(true, Ordering::SeqCst);
    let served = cache.fetch_through_cache(&url).await.unwrap();

    assert_eq!(served, original);
    assert_eq!(origin.requests.load(Ordering::SeqCst), 2);
    assert_eq!(cache.stats().await.stale_served, 1);
}

#[tokio::test]
async fn test_network_failure_without_entry_errors() {
    let origin = Origin::new(1024);
    origin.offline.store(true, Ordering::SeqCst);
    let cache = cache(CacheConfig::default(), origin);

    tokio_test::assert_err!(cache.fetch_through_cache(&segment("never")).await);
}

// =============================================================================
// Playback controller
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_scenario_b_format_error_falls_back_within_item() {
    let element = FakeElement::new(vec![(SourceFormat::Adaptive, MediaErrorKind::Decode)]);
    let h = harness(element.clone(), 3).await;
    let item = h.sequencer.current().await.unwrap();

    h.controller.load(item.clone()).await.unwrap();
    settle().await;

    assert_eq!(element.attached(), vec![SourceFormat::Adaptive, SourceFormat::Progressive]);
    assert_eq!(h.controller.phase().await, Phase::Ready);
    assert_eq!(h.controller.current_item().await.unwrap().id, item.id);
    assert_eq!(h.sequencer.current().await.unwrap().id, item.id);
    assert_eq!(h.controller.advance_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_chain_fails_once_and_advances_once() {
    let element = FakeElement::new(vec![
        (SourceFormat::Adaptive, MediaErrorKind::SourceNotSupported),
        (SourceFormat::Progressive, MediaErrorKind::Decode),
    ]);
    let h = harness(element.clone(), 3).await;
    let first = h.sequencer.current().await.unwrap();

    h.controller.load(first.clone()).await.unwrap();
    let first_session = h.controller.session().await.unwrap().id;
    settle().await;
    assert_eq!(h.controller.phase().await, Phase::TrackFailed);
    assert_eq!(h.controller.advance_requests(), 0);

    // the next item plays, so every TrackFailed below belongs to the first
    element.heal();

    // advance happens after the configured delay
    tokio::time::sleep(Duration::from_millis(3_100)).await;
    assert_eq!(h.controller.advance_requests(), 1);
    assert_ne!(h.controller.current_item().await.unwrap().id, first.id);

    let events = h.telemetry.recent().await;
    let track_failures = |session: Option<SessionId>| {
        events
            .iter()
            .filter(|r| session.is_none() || r.session_id == session)
            .filter(|r| {
                matches!(
                    r.event,
                    PlaybackEvent::StateChange {
                        to: Phase::TrackFailed,
                        ..
                    }
                )
            })
            .count()
    };
    let errors: Vec<_> = events
        .iter()
        .filter_map(|r| match &r.event {
            PlaybackEvent::Error { code, item_id, .. } if *item_id == first.id => Some(code.clone()),
            _ => None,
        })
        .collect();
    let advances = events
        .iter()
        .filter(|r| {
            matches!(
                r.event,
                PlaybackEvent::Advanced {
                    reason: AdvanceReason::TrackFailed,
                    ..
                }
            )
        })
        .count();

    assert_eq!(track_failures(Some(first_session)), 1);
    assert_eq!(track_failures(None), 1);
    assert_eq!(h.controller.phase().await, Phase::Ready);
    assert_eq!(errors, vec!["CHAIN_EXHAUSTED".to_string()]);
    assert_eq!(advances, 1);
}

#[tokio::test(start_paused = true)]
async fn test_user_skip_cancels_pending_advance() {
    let element = FakeElement::new(vec![
        (SourceFormat::Adaptive, MediaErrorKind::Decode),
        (SourceFormat::Progressive, MediaErrorKind::Decode),
    ]);
    let h = harness(element.clone(), 4).await;

    h.controller.load(h.sequencer.current().await.unwrap()).await.unwrap();
    settle().await;
    assert_eq!(h.controller.phase().await, Phase::TrackFailed);

    element.heal();
    h.controller.jump_to(3).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(h.controller.advance_requests(), 0);
    assert_eq!(h.controller.phase().await, Phase::Ready);
    assert_eq!(h.sequencer.current().await.unwrap().id, "item-3");
}

/// Existence checks for one item block until released
struct GatedOrigin {
    gated: String,
    open: tokio::sync::watch::Sender<bool>,
}

#[async_trait]
impl Fetcher for GatedOrigin {
    async fn fetch(&self, url: &Url, _etag: Option<&str>, _: FetchPriority) -> Result<FetchResponse> {
        Err(Error::Request {
            url: url.to_string(),
            message: "not served".into(),
        })
    }

    async fn exists(&self, url: &Url) -> Result<bool> {
        if url.path().contains(&self.gated) {
            let mut open = self.open.subscribe();
            let _ = open.wait_for(|open| *open).await;
        }
        Ok(true)
    }
}

#[tokio::test(start_paused = true)]
async fn test_set_index_during_resolution_discards_stale_chain() {
    let element = FakeElement::new(Vec::new());
    let (open, _) = tokio::sync::watch::channel(false);
    let origin = Arc::new(GatedOrigin {
        gated: "item-0".into(),
        open,
    });
    let resolver = SourceResolver::new(layout(), HintTable::new()).with_fetcher(origin.clone());
    let h = harness_with(element.clone(), 4, resolver).await;

    let controller = Arc::clone(&h.controller);
    let stale = tokio::spawn(async move { controller.load(catalog(1).remove(0)).await });
    settle().await;
    assert_eq!(h.controller.phase().await, Phase::Resolving);

    h.controller.jump_to(2).await.unwrap();
    settle().await;
    assert_eq!(h.controller.phase().await, Phase::Ready);

    origin.open.send_replace(true);
    stale.await.unwrap().unwrap();
    settle().await;

    assert_eq!(h.controller.current_item().await.unwrap().id, "item-2");
    assert_eq!(h.controller.candidate_chain().await.unwrap().item_id, "item-2");
    assert_eq!(h.controller.phase().await, Phase::Ready);
    assert_eq!(element.attached(), vec![SourceFormat::Adaptive]);

    let loaded: Vec<String> = h
        .telemetry
        .recent()
        .await
        .into_iter()
        .filter_map(|r| match r.event {
            PlaybackEvent::Loading { item_id, .. } => Some(item_id),
            _ => None,
        })
        .collect();
    assert_eq!(loaded, vec!["item-2".to_string()]);
}

// =============================================================================
// Quality controller
// =============================================================================

struct Ladder {
    level: AtomicUsize,
}

impl AdaptiveSession for Ladder {
    fn level_count(&self) -> usize {
        4
    }

    fn current_level(&self) -> usize {
        self.level.load(Ordering::SeqCst)
    }

    fn set_level(&self, level: usize) {
        self.level.store(level.min(3), Ordering::SeqCst);
    }

    fn level_bitrate(&self, level: usize) -> Option<u64> {
        [400_000, 1_000_000, 2_500_000, 5_000_000].get(level).copied()
    }
}

#[tokio::test(start_paused = true)]
async fn test_no_two_directives_within_cooldown() {
    let controller = QualityController::new(QualityConfig::default());
    let cooldown = controller.config().cooldown();
    let ladder = Arc::new(Ladder {
        level: AtomicUsize::new(2),
    });
    controller
        .attach(SessionId::new(), Arc::new(NoSamples), Some(ladder), None)
        .await;

    let samples = [
        PerformanceSample {
            fps: 5.0,
            dropped_frame_ratio: 0.5,
            buffering_ms: 4_000.0,
            ..Default::default()
        },
        PerformanceSample {
            fps: 30.0,
            bandwidth_estimate: 50_000_000,
            ..Default::default()
        },
    ];

    let mut issued = Vec::new();
    for step in 0..120u32 {
        let sample = &samples[(step % 3 == 0) as usize];
        if controller.evaluate(sample).await.is_some() {
            issued.push(tokio::time::Instant::now());
        }
        tokio::time::advance(Duration::from_millis(700)).await;
    }

    assert!(issued.len() >= 2);
    for pair in issued.windows(2) {
        assert!(pair[1].duration_since(pair[0]) >= cooldown);
    }
}
