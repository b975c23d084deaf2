//! Engine root
//!
//! Builds and owns every long-lived component: the capability probe, the
//! resolver, the process-wide segment cache, the sequencer, the quality
//! controller, the playback controller and the control surface. Exactly one
//! engine exists per process; nothing else constructs these.

use crate::cache::SegmentCache;
use crate::capability::CapabilityProbe;
use crate::config::EngineConfig;
use crate::control::{ControlSurface, Controls, DesiredState, PlayIntent};
use crate::controller::{ControllerParts, PlaybackController};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::headless::HeadlessElement;
use crate::media::MediaElement;
use crate::quality::QualityController;
use crate::resolver::SourceResolver;
use crate::sequencer::{load_catalog, PlaylistSequencer};
use crate::storage::{BlobStore, FsBlobStore, FsKeyValueStore, KeyValueStore, MemoryBlobStore, MemoryKeyValueStore};
use crate::telemetry::{PlaybackEvent, TelemetryBus};
use crate::{Error, PlaylistItem, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Request timeout of the default HTTP fetcher
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Persistent stores under `state_dir`, or in-memory ones without it
pub async fn open_stores(config: &EngineConfig) -> Result<(Arc<dyn KeyValueStore>, Arc<dyn BlobStore>)> {
    match &config.state_dir {
        Some(dir) => Ok((
            Arc::new(FsKeyValueStore::open(dir.join("state")).await?),
            Arc::new(FsBlobStore::open(dir.join("blobs")).await?),
        )),
        None => Ok((Arc::new(MemoryKeyValueStore::new()), Arc::new(MemoryBlobStore::new()))),
    }
}

type ElementFactory = Box<dyn FnOnce(Arc<SegmentCache>) -> Arc<dyn MediaElement> + Send>;

/// Builder for [`Engine`]
pub struct EngineBuilder {
    config: EngineConfig,
    items: Option<Vec<PlaylistItem>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    element: Option<ElementFactory>,
    seed: Option<u64>,
}

impl EngineBuilder {
    /// Use these items instead of the configured catalog
    pub fn items(mut self, items: Vec<PlaylistItem>) -> Self {
        self.items = Some(items);
        self
    }

    /// Fetch through `fetcher` instead of HTTP
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Drive a custom element; it receives the engine's cache
    pub fn element<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(Arc<SegmentCache>) -> Arc<dyn MediaElement> + Send + 'static,
    {
        self.element = Some(Box::new(factory));
        self
    }

    /// Deterministic shuffles
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub async fn build(self) -> Result<Engine> {
        let config = self.config;
        config.validate()?;

        let items = match self.items {
            Some(items) => items,
            None => match &config.catalog_path {
                Some(path) => load_catalog(path)?,
                None => return Err(Error::InvalidConfig("catalog_path is not set".to_string())),
            },
        };

        let (store, blobs) = open_stores(&config).await?;

        let fetcher: Arc<dyn Fetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::new(FETCH_TIMEOUT)?),
        };

        let probe = Arc::new(CapabilityProbe::new(Arc::new(config.platform.clone())));
        let resolver = Arc::new(
            SourceResolver::new(config.layout.clone(), config.hints.clone()).with_fetcher(Arc::clone(&fetcher)),
        );
        let cache = Arc::new(SegmentCache::new(config.cache.clone(), Arc::clone(&store), blobs, fetcher));
        let sequencer = Arc::new(match self.seed {
            Some(seed) => PlaylistSequencer::with_seed(items, store, seed),
            None => PlaylistSequencer::new(items, store),
        });
        let quality = Arc::new(QualityController::new(config.quality.clone()));
        let telemetry = Arc::new(TelemetryBus::default());

        let element = match self.element {
            Some(factory) => factory(Arc::clone(&cache)),
            None => Arc::new(HeadlessElement::new(Arc::clone(&cache))),
        };

        let controller = PlaybackController::new(
            config.playback.clone(),
            ControllerParts {
                element,
                probe: Arc::clone(&probe),
                resolver: Arc::clone(&resolver),
                sequencer: Arc::clone(&sequencer),
                cache: Arc::clone(&cache),
                quality: Arc::clone(&quality),
                telemetry: Arc::clone(&telemetry),
            },
        );

        let surface = Arc::new(ControlSurface::new(DesiredState {
            muted: config.playback.initial_muted,
            volume: config.playback.initial_volume,
            intent: if config.playback.autoplay {
                PlayIntent::Play
            } else {
                PlayIntent::Pause
            },
            resume_position: None,
        }));

        Ok(Engine {
            config,
            probe,
            resolver,
            cache,
            sequencer,
            quality,
            telemetry,
            controller,
            surface,
        })
    }
}

/// Application root
pub struct Engine {
    config: EngineConfig,
    probe: Arc<CapabilityProbe>,
    resolver: Arc<SourceResolver>,
    cache: Arc<SegmentCache>,
    sequencer: Arc<PlaylistSequencer>,
    quality: Arc<QualityController>,
    telemetry: Arc<TelemetryBus>,
    controller: Arc<PlaybackController>,
    surface: Arc<ControlSurface>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            items: None,
            fetcher: None,
            element: None,
            seed: None,
        }
    }

    /// Restore persisted state and start background work
    pub async fn init(&self) {
        self.cache.init().await;
        self.cache.start_sweeper().await;
        self.sequencer.init().await;

        let telemetry = Arc::clone(&self.telemetry);
        self.quality
            .on_recommendation(Box::new(move |session_id, directive| {
                let telemetry = Arc::clone(&telemetry);
                let event = PlaybackEvent::QualityChanged {
                    action: directive.action,
                    level: directive.level,
                };
                tokio::spawn(async move { telemetry.emit(Some(session_id), event).await });
            }))
            .await;
        self.quality.start().await;

        self.controller.start().await;
        let controls: Arc<dyn Controls> = self.controller.clone();
        self.surface.register(controls).await;

        info!(
            items = self.sequencer.len(),
            adaptive = %self.probe.probe().adaptive,
            "Engine initialized"
        );
    }

    /// Load the current item of the play order, resuming where it stopped
    pub async fn start(&self) -> Result<()> {
        let item = self.sequencer.current().await?;
        let resume = self.sequencer.resume_position().await;
        self.controller.load(item).await?;
        if resume > 0.0 {
            self.surface.seek(resume).await?;
        }
        Ok(())
    }

    /// Persist the resume position and stop everything
    pub async fn dispose(&self) {
        let position = self.controller.position().await;
        self.sequencer.save_resume_position(position).await;

        if self.surface.unregister().await.is_none() {
            warn!("Engine disposed before init");
        }
        self.controller.dispose().await;
        self.quality.stop().await;
        self.cache.cancel_preloads().await;
        self.cache.dispose().await;
        info!(position, "Engine disposed");
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn probe(&self) -> &Arc<CapabilityProbe> {
        &self.probe
    }

    pub fn resolver(&self) -> &Arc<SourceResolver> {
        &self.resolver
    }

    pub fn cache(&self) -> &Arc<SegmentCache> {
        &self.cache
    }

    pub fn sequencer(&self) -> &Arc<PlaylistSequencer> {
        &self.sequencer
    }

    pub fn quality(&self) -> &Arc<QualityController> {
        &self.quality
    }

    pub fn telemetry(&self) -> &Arc<TelemetryBus> {
        &self.telemetry
    }

    pub fn controller(&self) -> &Arc<PlaybackController> {
        &self.controller
    }

    /// The entry point for UI controls
    pub fn controls(&self) -> &Arc<ControlSurface> {
        &self.surface
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchPriority, FetchResponse};
    use crate::Phase;
    use async_trait::async_trait;
    use bytes::Bytes;
    use url::Url;

    /// Serves a two-level master playlist for every manifest URL
    struct Origin;

    #[async_trait]
    impl Fetcher for Origin {
        async fn fetch(&self, url: &Url, _etag: Option<&str>, _: FetchPriority) -> Result<FetchResponse> {
            let body = if url.path().ends_with(".m3u8") {
                "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360\nlow.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=2500000,RESOLUTION=1280x720\nhigh.m3u8\n"
                    .as_bytes()
                    .to_vec()
            } else {
                vec![0u8; 1024]
            };
            Ok(FetchResponse::Fresh {
                body: Bytes::from(body),
                etag: None,
                content_type: None,
                max_age: None,
            })
        }

        async fn exists(&self, _url: &Url) -> Result<bool> {
            Ok(true)
        }
    }

    fn items() -> Vec<PlaylistItem> {
        ["dawn", "noon", "dusk"]
            .iter()
            .map(|id| PlaylistItem::new(*id, id.to_uppercase(), *id))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_plays_current_item() {
        let engine = Engine::builder(EngineConfig::default())
            .items(items())
            .fetcher(Arc::new(Origin))
            .seed(3)
            .build()
            .await
            .unwrap();
        engine.init().await;
        engine.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let current = engine.sequencer().current().await.unwrap();
        assert_eq!(engine.controller().current_item().await.unwrap().id, current.id);
        assert_eq!(engine.controller().phase().await, Phase::Playing);
        assert!(engine.cache().stats().await.entries >= 1);

        engine.dispose().await;
        assert_eq!(engine.controller().phase().await, Phase::Idle);
    }

    #[tokio::test]
    async fn test_missing_catalog_is_a_config_error() {
        let result = Engine::builder(EngineConfig::default()).fetcher(Arc::new(Origin)).build().await;
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
