//! Benchmark tests for carousel-core operations
//!
//! Run with: cargo bench -p carousel-core

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use url::Url;

use carousel_core::cache::{EvictionStrategy, LargestFirst, LeastRecentlyUsed, ResponseMeta};
use carousel_core::fetch::FetchResponse;
use carousel_core::ladder::RenditionLadder;
use carousel_core::quality::score;
use carousel_core::storage::{MemoryBlobStore, MemoryKeyValueStore};
use carousel_core::*;

// ============================================================================
// Helpers
// ============================================================================

struct Unreachable;

#[async_trait]
impl Fetcher for Unreachable {
    async fn fetch(&self, url: &Url, _etag: Option<&str>, _: FetchPriority) -> Result<FetchResponse> {
        Err(Error::Request {
            url: url.to_string(),
            message: "offline".into(),
        })
    }

    async fn exists(&self, _url: &Url) -> Result<bool> {
        Ok(true)
    }
}

fn create_entries(count: usize) -> Vec<CacheEntry> {
    let now = Utc::now();
    (0..count)
        .map(|i| CacheEntry {
            key: format!("https://media.example.com/video/seg{}.mp4", i),
            size_bytes: ((i * 7919) % 4096 + 1) as u64 * 1024,
            last_accessed: now - ChronoDuration::seconds(((i * 104_729) % 10_000) as i64),
            stored_at: now - ChronoDuration::seconds(i as i64),
            expires_at: now + ChronoDuration::hours(1),
            etag: None,
            content_type: None,
            access_seq: i as u64,
        })
        .collect()
}

fn create_catalog(count: usize) -> Vec<PlaylistItem> {
    (0..count)
        .map(|i| PlaylistItem::new(format!("item-{}", i), format!("Item {}", i), format!("item-{}", i)))
        .collect()
}

// ============================================================================
// Cache
// ============================================================================

fn bench_eviction_ranking(c: &mut Criterion) {
    let mut group = c.benchmark_group("eviction_ranking");

    for count in [100, 1_000, 10_000] {
        let entries = create_entries(count);

        group.bench_with_input(BenchmarkId::new("lru", count), &entries, |b, entries| {
            b.iter(|| {
                let mut ranked: Vec<&CacheEntry> = entries.iter().collect();
                LeastRecentlyUsed.rank(&mut ranked);
                black_box(ranked.first().map(|e| e.size_bytes))
            })
        });

        group.bench_with_input(BenchmarkId::new("largest", count), &entries, |b, entries| {
            b.iter(|| {
                let mut ranked: Vec<&CacheEntry> = entries.iter().collect();
                LargestFirst.rank(&mut ranked);
                black_box(ranked.first().map(|e| e.size_bytes))
            })
        });
    }

    group.finish();
}

fn bench_cache_put_under_pressure(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("cache_put");

    for max_entries in [64, 512] {
        group.bench_with_input(
            BenchmarkId::new("max_entries", max_entries),
            &max_entries,
            |b, &max_entries| {
                let cache = SegmentCache::new(
                    CacheConfig::default().with_max_entries(max_entries),
                    Arc::new(MemoryKeyValueStore::new()),
                    Arc::new(MemoryBlobStore::new()),
                    Arc::new(Unreachable),
                );
                let payload = Bytes::from(vec![0u8; 16 * 1024]);
                let mut i = 0u64;

                b.iter(|| {
                    i += 1;
                    let url = Url::parse(&format!("https://media.example.com/video/seg{}.mp4", i)).unwrap();
                    rt.block_on(async {
                        cache
                            .put(&url, payload.clone(), ResponseMeta::default())
                            .await
                            .unwrap();
                    })
                })
            },
        );
    }

    group.finish();
}

// ============================================================================
// Quality
// ============================================================================

fn bench_quality_score(c: &mut Criterion) {
    let config = QualityConfig::default();
    let samples = [
        PerformanceSample {
            fps: 30.0,
            bandwidth_estimate: 8_000_000,
            ..Default::default()
        },
        PerformanceSample {
            fps: 12.0,
            dropped_frame_ratio: 0.3,
            buffering_ms: 2_000.0,
            bandwidth_estimate: 600_000,
            memory_pressure: 0.4,
            ..Default::default()
        },
    ];

    c.bench_function("quality_score", |b| {
        b.iter(|| {
            for sample in &samples {
                black_box(score(black_box(sample), sample.bandwidth_estimate, &config));
            }
        })
    });
}

fn bench_ladder_parse(c: &mut Criterion) {
    let mut master = String::from("#EXTM3U\n#EXT-X-VERSION:6\n");
    for (bandwidth, height) in [(400_000, 240), (800_000, 360), (1_400_000, 480), (2_800_000, 720), (5_000_000, 1080)] {
        master.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{},CODECS=\"avc1.640028,mp4a.40.2\"\n{}p/index.m3u8\n",
            bandwidth,
            height * 16 / 9,
            height,
            height
        ));
    }
    let base = Url::parse("https://media.example.com/hls/sunset/master.m3u8").unwrap();

    c.bench_function("ladder_parse", |b| {
        b.iter(|| black_box(RenditionLadder::parse(master.as_bytes(), &base).unwrap().len()))
    });
}

// ============================================================================
// Sequencer & resolver
// ============================================================================

fn bench_sequencer_cycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("sequencer_cycle");

    for size in [10, 100, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let seq = PlaylistSequencer::with_seed(create_catalog(size), Arc::new(MemoryKeyValueStore::new()), 1);
            rt.block_on(seq.init());
            b.iter(|| {
                rt.block_on(async {
                    for _ in 0..size {
                        black_box(seq.next().await.unwrap());
                    }
                })
            })
        });
    }

    group.finish();
}

fn bench_resolve_memoized(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let resolver = SourceResolver::new(
        MediaLayout::with_origin(Url::parse("https://media.example.com/").unwrap()),
        HintTable::new(),
    );
    let caps = CapabilityProbe::new(Arc::new(PlatformProfile::default())).probe().clone();
    let item = create_catalog(1).remove(0);

    c.bench_function("resolve_memoized", |b| {
        b.iter(|| rt.block_on(async { black_box(resolver.resolve(&item, &caps).await.unwrap().len()) }))
    });
}

criterion_group!(
    benches,
    bench_eviction_ranking,
    bench_cache_put_under_pressure,
    bench_quality_score,
    bench_ladder_parse,
    bench_sequencer_cycle,
    bench_resolve_memoized,
);
criterion_main!(benches);
