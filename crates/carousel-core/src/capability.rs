//! Capability probe
//!
//! Detects once per process which codec profiles and media features the
//! runtime offers. Detection never fails: every query that errors degrades
//! to the conservative answer, because capability detection must never
//! block playback.

use crate::{
    platform::Platform,
    CodecProfile, DeviceClass, NetworkHint,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// How adaptive manifests can be played
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptiveSupport {
    /// The media element plays manifests directly
    Native,
    /// A streaming library demuxes into media source buffers
    Library,
    Unsupported,
}

impl std::fmt::Display for AdaptiveSupport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdaptiveSupport::Native => write!(f, "native"),
            AdaptiveSupport::Library => write!(f, "library"),
            AdaptiveSupport::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Typed result of capability detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub codecs: BTreeSet<CodecProfile>,
    pub adaptive: AdaptiveSupport,
    pub device: DeviceClass,
    pub network: NetworkHint,
}

impl Capabilities {
    /// What is assumed when nothing could be detected
    pub fn conservative() -> Self {
        Self {
            codecs: BTreeSet::new(),
            adaptive: AdaptiveSupport::Unsupported,
            device: DeviceClass::Mobile,
            network: NetworkHint::default(),
        }
    }

    pub fn supports(&self, codec: CodecProfile) -> bool {
        self.codecs.contains(&codec)
    }

    /// Any H.264 profile plus an audio codec for the native container
    pub fn progressive_native(&self) -> bool {
        self.h264() && self.supports(CodecProfile::Aac)
    }

    /// VP9 or AV1 video plus Opus audio for the alternative container
    pub fn alternative_codec(&self) -> bool {
        (self.supports(CodecProfile::Vp9) || self.supports(CodecProfile::Av1))
            && self.supports(CodecProfile::Opus)
    }

    pub fn adaptive_playback(&self) -> bool {
        self.adaptive != AdaptiveSupport::Unsupported
    }

    fn h264(&self) -> bool {
        self.supports(CodecProfile::H264Baseline)
            || self.supports(CodecProfile::H264Main)
            || self.supports(CodecProfile::H264High)
    }

    /// Stable key of everything that influences source resolution
    pub fn signature(&self) -> String {
        let codecs: Vec<String> = self
            .codecs
            .iter()
            .map(|c| format!("{:?}", c).to_lowercase())
            .collect();
        format!("adaptive={};codecs={}", self.adaptive, codecs.join(","))
    }
}

/// Detect capabilities from a platform. Pure apart from the platform calls.
pub fn detect(platform: &dyn Platform) -> Capabilities {
    let mut caps = Capabilities::conservative();

    for codec in CodecProfile::ALL {
        match platform.supports_codec(codec) {
            Ok(true) => {
                caps.codecs.insert(codec);
            }
            Ok(false) => {}
            Err(e) => warn!(codec = %codec, error = %e, "Codec query failed, assuming unsupported"),
        }
    }

    let native = platform.native_adaptive_playback().unwrap_or_else(|e| {
        warn!(error = %e, "Native adaptive query failed");
        false
    });
    let media_source = platform.media_source_extensions().unwrap_or_else(|e| {
        warn!(error = %e, "Media source query failed");
        false
    });

    caps.adaptive = if native {
        AdaptiveSupport::Native
    } else if media_source && caps.h264() {
        AdaptiveSupport::Library
    } else {
        AdaptiveSupport::Unsupported
    };

    caps.device = platform.device_class().unwrap_or_else(|e| {
        warn!(error = %e, "Device class query failed");
        DeviceClass::Mobile
    });
    caps.network = platform.network_hint().unwrap_or_else(|e| {
        debug!(error = %e, "Network hint unavailable");
        NetworkHint::default()
    });

    caps
}

/// Memoizing probe over a platform
pub struct CapabilityProbe {
    platform: Arc<dyn Platform>,
    cached: OnceLock<Capabilities>,
}

impl CapabilityProbe {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            platform,
            cached: OnceLock::new(),
        }
    }

    /// Capabilities of this runtime; detected on first call only
    pub fn probe(&self) -> &Capabilities {
        self.cached.get_or_init(|| {
            let caps = detect(self.platform.as_ref());
            info!(
                adaptive = %caps.adaptive,
                codecs = caps.codecs.len(),
                device = ?caps.device,
                "Capabilities detected"
            );
            caps
        })
    }
}
