//! Rendition ladder
//!
//! Reads the variant list of an adaptive master playlist. Segment loading
//! and media playlists are left to the stream library; only the ladder is
//! needed to steer quality.

use crate::{Error, Result};
use m3u8_rs::MasterPlaylist;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

/// One rendition of an adaptive stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rendition {
    /// Bandwidth in bits per second
    pub bandwidth: u64,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub frame_rate: Option<f64>,
    pub codecs: Option<String>,
    /// Variant playlist
    pub uri: Url,
}

impl Rendition {
    /// Short label such as `720p @ 2.5 Mbps`
    pub fn label(&self) -> String {
        let mbps = self.bandwidth as f64 / 1_000_000.0;
        match self.height {
            Some(h) => format!("{}p @ {:.1} Mbps", h, mbps),
            None => format!("{:.1} Mbps", mbps),
        }
    }
}

/// Renditions sorted by ascending bandwidth
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenditionLadder {
    pub renditions: Vec<Rendition>,
}

impl RenditionLadder {
    /// Parse a master playlist body fetched from `base_url`
    pub fn parse(content: &[u8], base_url: &Url) -> Result<Self> {
        let master = m3u8_rs::parse_master_playlist_res(content)
            .map_err(|e| Error::ManifestParse(format!("Failed to parse master playlist: {:?}", e)))?;
        Self::from_master(&master, base_url)
    }

    fn from_master(master: &MasterPlaylist, base_url: &Url) -> Result<Self> {
        let mut renditions = Vec::with_capacity(master.variants.len());

        for variant in master.variants.iter().filter(|v| !v.is_i_frame) {
            let uri = base_url
                .join(&variant.uri)
                .map_err(|e| Error::ManifestParse(format!("Invalid variant URI {}: {}", variant.uri, e)))?;

            renditions.push(Rendition {
                bandwidth: variant.bandwidth,
                width: variant.resolution.map(|r| r.width),
                height: variant.resolution.map(|r| r.height),
                frame_rate: variant.frame_rate,
                codecs: variant.codecs.clone(),
                uri,
            });
        }

        if renditions.is_empty() {
            return Err(Error::ManifestParse("Master playlist has no variants".to_string()));
        }

        renditions.sort_by_key(|r| r.bandwidth);
        debug!(levels = renditions.len(), "Rendition ladder parsed");

        Ok(Self { renditions })
    }

    pub fn len(&self) -> usize {
        self.renditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renditions.is_empty()
    }

    pub fn get(&self, level: usize) -> Option<&Rendition> {
        self.renditions.get(level)
    }

    /// Highest level whose bandwidth fits `bps`, or 0
    pub fn level_for_bandwidth(&self, bps: u64) -> usize {
        self.renditions
            .iter()
            .rposition(|r| r.bandwidth <= bps)
            .unwrap_or(0)
    }
}
