//! Source resolver
//!
//! Builds the ordered candidate chain for a playlist item:
//!
//! 1. the adaptive manifest, when the runtime can play it;
//! 2. the progressive file in the native container;
//! 3. the alternative codec container, when its codecs decode;
//! 4. the default progressive file, always last unless already present.
//!
//! Fallback URLs come from rewriting the adaptive URL, so the chain for a
//! fixed item and capability signature is always the same.

use crate::{
    capability::Capabilities,
    fetch::Fetcher,
    hints::HintTable,
    layout::MediaLayout,
    CandidateChain, PlaylistItem, Result, SourceCandidate, SourceFormat,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use url::Url;

const ADAPTIVE_MIME: &str = "application/vnd.apple.mpegurl";

/// Resolver with memoized chains and existence probes
pub struct SourceResolver {
    layout: MediaLayout,
    hints: HintTable,
    /// Existence probes are skipped without a fetcher
    fetcher: Option<Arc<dyn Fetcher>>,
    /// `None` records a probe that failed
    existence: RwLock<HashMap<Url, Option<bool>>>,
    chains: RwLock<HashMap<(String, String), CandidateChain>>,
}

impl SourceResolver {
    pub fn new(layout: MediaLayout, hints: HintTable) -> Self {
        Self {
            layout,
            hints,
            fetcher: None,
            existence: RwLock::new(HashMap::new()),
            chains: RwLock::new(HashMap::new()),
        }
    }

    /// Enable existence probes through `fetcher`
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn layout(&self) -> &MediaLayout {
        &self.layout
    }

    pub fn hints(&self) -> &HintTable {
        &self.hints
    }

    /// Candidate chain for `item` under `caps`
    #[instrument(skip(self, item, caps), fields(item_id = %item.id))]
    pub async fn resolve(&self, item: &PlaylistItem, caps: &Capabilities) -> Result<CandidateChain> {
        let key = (item.id.clone(), caps.signature());
        if let Some(chain) = self.chains.read().await.get(&key) {
            return Ok(chain.clone());
        }

        let chain = self.build(item, caps).await?;

        info!(
            candidates = chain.len(),
            first = %chain.get(0).map(|c| c.format.to_string()).unwrap_or_default(),
            "Candidate chain resolved"
        );

        self.chains.write().await.insert(key, chain.clone());
        Ok(chain)
    }

    /// Drop memoized chains and probes for an item
    pub async fn forget(&self, item: &PlaylistItem) {
        self.chains.write().await.retain(|(id, _), _| id != &item.id);
        let urls: Vec<Url> = [
            self.layout.adaptive_url(item).ok(),
            self.layout.file_url(item, SourceFormat::Progressive).ok(),
            self.layout.file_url(item, SourceFormat::AlternativeCodec).ok(),
        ]
        .into_iter()
        .flatten()
        .collect();
        let mut existence = self.existence.write().await;
        for url in urls {
            existence.remove(&url);
        }
    }

    async fn build(&self, item: &PlaylistItem, caps: &Capabilities) -> Result<CandidateChain> {
        let hint = self.hints.get(&item.id).cloned().unwrap_or_default();
        let adaptive_url = self.layout.adaptive_url(item)?;
        let mut candidates: Vec<SourceCandidate> = Vec::new();

        if !caps.adaptive_playback() {
            debug!("Adaptive playback unsupported, skipping manifest");
        } else if hint.skip_adaptive {
            debug!("Adaptive manifest disabled by compatibility hint");
        } else if self.confirm(&adaptive_url).await == Some(false) {
            warn!(url = %adaptive_url, "Adaptive manifest not found, using progressive fallbacks");
        } else {
            push(&mut candidates, SourceFormat::Adaptive, adaptive_url.clone(), ADAPTIVE_MIME);
        }

        let progressive_url = self.fallback_url(item, &adaptive_url, SourceFormat::Progressive)?;

        if caps.progressive_native() {
            if self.confirm(&progressive_url).await == Some(false) {
                warn!(url = %progressive_url, "Progressive file not found");
            } else {
                push(&mut candidates, SourceFormat::Progressive, progressive_url.clone(), "video/mp4");
            }
        }

        if caps.alternative_codec() && !hint.skip_alternative_codec {
            let alternative_url =
                self.fallback_url(item, &adaptive_url, SourceFormat::AlternativeCodec)?;
            if self.confirm(&alternative_url).await == Some(false) {
                warn!(url = %alternative_url, "Alternative codec file not found");
            } else {
                push(&mut candidates, SourceFormat::AlternativeCodec, alternative_url, "video/webm");
            }
        }

        // The default progressive file is never gated by capability or existence
        if !candidates.iter().any(|c| c.url == progressive_url) {
            push(&mut candidates, SourceFormat::Progressive, progressive_url, "video/mp4");
        }

        Ok(CandidateChain {
            item_id: item.id.clone(),
            candidates,
        })
    }

    fn fallback_url(&self, item: &PlaylistItem, adaptive: &Url, format: SourceFormat) -> Result<Url> {
        match self.layout.rewrite_to_file(adaptive, format) {
            Some(url) => Ok(url),
            None => self.layout.file_url(item, format),
        }
    }

    /// Memoized existence probe; `None` when unknown
    async fn confirm(&self, url: &Url) -> Option<bool> {
        let fetcher = self.fetcher.as_ref()?;

        if let Some(known) = self.existence.read().await.get(url) {
            return *known;
        }

        let result = match fetcher.exists(url).await {
            Ok(exists) => Some(exists),
            Err(e) => {
                debug!(url = %url, error = %e, "Existence probe failed, keeping candidate");
                None
            }
        };

        self.existence.write().await.insert(url.clone(), result);
        result
    }
}

fn push(candidates: &mut Vec<SourceCandidate>, format: SourceFormat, url: Url, mime: &str) {
    let priority = candidates.len() as u32;
    candidates.push(SourceCandidate {
        format,
        url,
        priority,
        mime_type: mime.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        capability::detect,
        fetch::{FetchPriority, FetchResponse},
        hints::CompatibilityHint,
        CodecProfile, Error, PlatformProfile,
    };
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Origin {
        missing: HashSet<String>,
        failing: bool,
        probes: AtomicUsize,
    }

    impl Origin {
        fn new(missing: &[&str]) -> Self {
            Self {
                missing: missing.iter().map(|s| s.to_string()).collect(),
                failing: false,
                probes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Fetcher for Origin {
        async fn fetch(&self, url: &Url, _: Option<&str>, _: FetchPriority) -> Result<FetchResponse> {
            Err(Error::HttpStatus { url: url.to_string(), status: 500 })
        }

        async fn exists(&self, url: &Url) -> Result<bool> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.failing {
                return Err(Error::Timeout { url: url.to_string() });
            }
            Ok(!self.missing.iter().any(|m| url.path().ends_with(m.as_str())))
        }
    }

    fn layout() -> MediaLayout {
        MediaLayout::with_origin(Url::parse("https://media.example.com/").unwrap())
    }

    fn item() -> PlaylistItem {
        PlaylistItem::new("sunset", "Sunset", "sunset%20drive")
    }

    fn formats(chain: &CandidateChain) -> Vec<SourceFormat> {
        chain.iter().map(|c| c.format).collect()
    }

    #[tokio::test]
    async fn test_full_chain_order() {
        let resolver = SourceResolver::new(layout(), HintTable::new());
        let caps = detect(&PlatformProfile::default());

        let chain = resolver.resolve(&item(), &caps).await.unwrap();

        assert_eq!(
            formats(&chain),
            vec![SourceFormat::Adaptive, SourceFormat::Progressive, SourceFormat::AlternativeCodec]
        );
        assert_eq!(
            chain.get(1).unwrap().url.as_str(),
            "https://media.example.com/video/sunset%20drive.mp4"
        );
        let priorities: Vec<u32> = chain.iter().map(|c| c.priority).collect();
        assert_eq!(priorities, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_total_detection_failure_still_yields_default() {
        let resolver = SourceResolver::new(layout(), HintTable::new());
        let caps = Capabilities::conservative();

        let chain = resolver.resolve(&item(), &caps).await.unwrap();

        assert_eq!(formats(&chain), vec![SourceFormat::Progressive]);
    }

    #[tokio::test]
    async fn test_alternative_codec_needs_support() {
        let resolver = SourceResolver::new(layout(), HintTable::new());
        let profile = PlatformProfile {
            codecs: vec![CodecProfile::H264Main, CodecProfile::Aac],
            media_source: false,
            ..Default::default()
        };

        let chain = resolver.resolve(&item(), &detect(&profile)).await.unwrap();

        assert_eq!(formats(&chain), vec![SourceFormat::Progressive]);
    }

    #[tokio::test]
    async fn test_missing_manifest_skips_to_progressive() {
        let origin = Arc::new(Origin::new(&["master.m3u8"]));
        let resolver = SourceResolver::new(layout(), HintTable::new()).with_fetcher(origin);
        let caps = detect(&PlatformProfile::default());

        let chain = resolver.resolve(&item(), &caps).await.unwrap();

        assert_eq!(
            formats(&chain),
            vec![SourceFormat::Progressive, SourceFormat::AlternativeCodec]
        );
    }

    #[tokio::test]
    async fn test_missing_progressive_still_appended_last() {
        let origin = Arc::new(Origin::new(&[".mp4"]));
        let resolver = SourceResolver::new(layout(), HintTable::new()).with_fetcher(origin);
        let caps = detect(&PlatformProfile::default());

        let chain = resolver.resolve(&item(), &caps).await.unwrap();

        assert_eq!(
            formats(&chain),
            vec![SourceFormat::Adaptive, SourceFormat::AlternativeCodec, SourceFormat::Progressive]
        );
    }

    #[tokio::test]
    async fn test_failed_probes_keep_candidates() {
        let origin = Arc::new(Origin {
            failing: true,
            ..Origin::new(&[])
        });
        let resolver = SourceResolver::new(layout(), HintTable::new()).with_fetcher(origin);
        let caps = detect(&PlatformProfile::default());

        let chain = resolver.resolve(&item(), &caps).await.unwrap();

        assert_eq!(chain.len(), 3);
    }

    #[tokio::test]
    async fn test_hints_exclude_formats() {
        let hints = HintTable::new().with_hint(
            "sunset",
            CompatibilityHint {
                skip_adaptive: true,
                skip_alternative_codec: true,
                ..Default::default()
            },
        );
        let resolver = SourceResolver::new(layout(), hints);
        let caps = detect(&PlatformProfile::default());

        let chain = resolver.resolve(&item(), &caps).await.unwrap();

        assert_eq!(formats(&chain), vec![SourceFormat::Progressive]);
    }

    #[tokio::test]
    async fn test_resolution_is_deterministic_and_memoized() {
        let origin = Arc::new(Origin::new(&[]));
        let resolver =
            SourceResolver::new(layout(), HintTable::new()).with_fetcher(origin.clone());
        let caps = detect(&PlatformProfile::default());

        let first = resolver.resolve(&item(), &caps).await.unwrap();
        let probes = origin.probes.load(Ordering::SeqCst);
        let second = resolver.resolve(&item(), &caps).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(origin.probes.load(Ordering::SeqCst), probes);

        resolver.forget(&item()).await;
        let third = resolver.resolve(&item(), &caps).await.unwrap();
        assert_eq!(first, third);
        assert_eq!(origin.probes.load(Ordering::SeqCst), probes * 2);
    }
}
