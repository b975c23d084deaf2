//! CLI command implementations

use crate::output::{bytes, print_record, print_rows, to_json, OutputFormat};
use anyhow::Context;
use carousel_core::engine::open_stores;
use carousel_core::sequencer::load_catalog;
use carousel_core::{
    CapabilityProbe, Engine, EngineConfig, FetchPriority, HttpFetcher, PlaylistItem, SegmentCache,
    SourceResolver,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tabled::Tabled;
use tokio::sync::broadcast::error::RecvError;
use url::Url;

/// Load the configuration file, or defaults without one
pub fn load_config(path: Option<&Path>, catalog: Option<PathBuf>) -> anyhow::Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if catalog.is_some() {
        config.catalog_path = catalog;
    }
    Ok(config)
}

fn catalog(config: &EngineConfig) -> anyhow::Result<Vec<PlaylistItem>> {
    let path = config
        .catalog_path
        .as_ref()
        .context("no catalog configured; pass --catalog")?;
    Ok(load_catalog(path)?)
}

async fn open_cache(config: &EngineConfig) -> anyhow::Result<Arc<SegmentCache>> {
    let (store, blobs) = open_stores(config).await?;
    let fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(30))?);
    let cache = Arc::new(SegmentCache::new(config.cache.clone(), store, blobs, fetcher));
    cache.init().await;
    Ok(cache)
}

/// Show detected capabilities
pub fn probe(config: &EngineConfig, format: &str) -> anyhow::Result<()> {
    let probe = CapabilityProbe::new(Arc::new(config.platform.clone()));
    let caps = probe.probe();

    if OutputFormat::from(format) == OutputFormat::Json {
        println!("{}", to_json(caps));
        return Ok(());
    }

    println!("Client capabilities:");
    println!("  Adaptive: {}", caps.adaptive);
    println!("  Device: {:?}", caps.device);
    println!(
        "  Network: {:?} ({:.1} Mbps, save-data {})",
        caps.network.effective_type, caps.network.downlink_mbps, caps.network.save_data
    );
    println!("  Progressive (native container): {}", caps.progressive_native());
    println!("  Alternative codec container: {}", caps.alternative_codec());
    println!("\nCodecs:");
    for codec in &caps.codecs {
        println!("  - {} ({})", codec, codec.mime_type());
    }
    Ok(())
}

#[derive(Serialize, Tabled)]
struct CandidateRow {
    #[tabled(rename = "#")]
    priority: u32,
    format: String,
    mime: String,
    url: String,
}

/// Build and print the candidate chain of an item
pub async fn resolve(config: EngineConfig, item_id: &str, check: bool, format: &str) -> anyhow::Result<()> {
    let items = catalog(&config)?;
    let item = items
        .iter()
        .find(|i| i.id == item_id)
        .with_context(|| format!("item {} is not in the catalog", item_id))?;

    let caps = CapabilityProbe::new(Arc::new(config.platform.clone())).probe().clone();
    let mut resolver = SourceResolver::new(config.layout.clone(), config.hints.clone());
    if check {
        resolver = resolver.with_fetcher(Arc::new(HttpFetcher::new(Duration::from_secs(10))?));
    }

    let chain = resolver.resolve(item, &caps).await?;
    let rows: Vec<CandidateRow> = chain
        .candidates
        .iter()
        .map(|c| CandidateRow {
            priority: c.priority,
            format: c.format.to_string(),
            mime: c.mime_type.clone(),
            url: c.url.to_string(),
        })
        .collect();

    if OutputFormat::from(format) != OutputFormat::Json {
        println!("Candidates for {} ({}):", item.id, item.display_name);
    }
    print_rows(&rows, format);
    Ok(())
}

/// Play headlessly and stream telemetry until `seconds` elapse or Ctrl-C
pub async fn play(config: EngineConfig, index: Option<usize>, seconds: u64, format: &str) -> anyhow::Result<()> {
    let engine = Engine::builder(config).build().await?;
    engine.init().await;
    let mut events = engine.telemetry().subscribe();

    match index {
        Some(index) => engine.controller().jump_to(index).await?,
        None => engine.start().await?,
    }

    let json = OutputFormat::from(format) == OutputFormat::Json;
    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupted");
                break;
            }
            received = events.recv() => match received {
                Ok(record) if json => println!("{}", serde_json::to_string(&record)?),
                Ok(record) => {
                    let event = serde_json::to_value(&record.event)?;
                    println!(
                        "[{}] #{} {}",
                        record.timestamp.format("%H:%M:%S%.3f"),
                        record.sequence,
                        event
                    );
                }
                Err(RecvError::Lagged(skipped)) => eprintln!("  ({} events skipped)", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    }

    engine.dispose().await;
    let stats = engine.cache().stats().await;
    if !json {
        println!(
            "\nCache: {} entries, {}, hit ratio {:.0}%",
            stats.entries,
            bytes(stats.total_bytes),
            stats.hit_ratio() * 100.0
        );
    }
    Ok(())
}

#[derive(Serialize, Tabled)]
struct OrderRow {
    position: usize,
    id: String,
    name: String,
    current: String,
}

/// Print the persisted play order
pub async fn order(config: EngineConfig, format: &str) -> anyhow::Result<()> {
    let engine = Engine::builder(config).build().await?;
    let sequencer = engine.sequencer();
    sequencer.init().await;

    let order = sequencer.play_order().await;
    let items = sequencer.items();
    let rows: Vec<OrderRow> = order
        .order
        .iter()
        .enumerate()
        .filter_map(|(position, &index)| {
            items.get(index).map(|item| OrderRow {
                position,
                id: item.id.clone(),
                name: item.display_name.clone(),
                current: if position == order.position { "▶".to_string() } else { String::new() },
            })
        })
        .collect();

    print_rows(&rows, format);
    if OutputFormat::from(format) != OutputFormat::Json && order.resume_position > 0.0 {
        println!("Resume at {:.1}s", order.resume_position);
    }
    Ok(())
}

/// Cache statistics
pub async fn cache_stats(config: EngineConfig, format: &str) -> anyhow::Result<()> {
    let cache = open_cache(&config).await?;
    let stats = cache.stats().await;

    if OutputFormat::from(format) == OutputFormat::Json {
        println!("{}", to_json(&stats));
        return Ok(());
    }

    println!("Segment cache ({}):", cache.config().eviction_policy.description());
    println!("  Entries: {} / {}", stats.entries, stats.max_entries);
    println!("  Size: {} / {}", bytes(stats.total_bytes), bytes(stats.max_bytes));
    print_record(&stats, format);
    Ok(())
}

#[derive(Serialize, Tabled)]
struct EntryRow {
    url: String,
    size: String,
    last_accessed: String,
    expires: String,
}

/// List cached entries, most recently used first
pub async fn cache_list(config: EngineConfig, format: &str) -> anyhow::Result<()> {
    let cache = open_cache(&config).await?;
    let mut entries = cache.entries().await;
    entries.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));

    let rows: Vec<EntryRow> = entries
        .into_iter()
        .map(|e| EntryRow {
            url: e.key,
            size: bytes(e.size_bytes),
            last_accessed: e.last_accessed.to_rfc3339(),
            expires: e.expires_at.to_rfc3339(),
        })
        .collect();
    print_rows(&rows, format);
    Ok(())
}

/// Remove expired entries
pub async fn cache_sweep(config: EngineConfig) -> anyhow::Result<()> {
    let cache = open_cache(&config).await?;
    let removed = cache.sweep_expired().await;
    println!("Removed {} expired entries", removed);
    Ok(())
}

/// Remove every entry
pub async fn cache_clear(config: EngineConfig) -> anyhow::Result<()> {
    let cache = open_cache(&config).await?;
    let before = cache.stats().await;
    cache.clear().await;
    println!("Cleared {} entries ({})", before.entries, bytes(before.total_bytes));
    Ok(())
}

/// Fetch a URL through the cache
pub async fn fetch(config: EngineConfig, url: &str, output: Option<PathBuf>) -> anyhow::Result<()> {
    let url = Url::parse(url)?;
    let cache = open_cache(&config).await?;
    let was_cached = cache.is_cached(&url).await;

    let body = cache.fetch_with_priority(&url, FetchPriority::High).await?;
    println!(
        "{} ({}, {})",
        url,
        bytes(body.len() as u64),
        if was_cached { "cache hit" } else { "network" }
    );

    if let Some(path) = output {
        tokio::fs::write(&path, &body)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Saved to {}", path.display());
    }

    cache.dispose().await;
    Ok(())
}
