//! Platform query interface
//!
//! The capability probe never inspects runtime strings itself. It asks a
//! [`Platform`] typed questions, so a browser binding, a native shell and a
//! test fake all plug in the same way.

use crate::{CodecProfile, DeviceClass, NetworkHint, Result};
use serde::{Deserialize, Serialize};

/// Queries answered by the host runtime. Any of them may fail.
pub trait Platform: Send + Sync {
    /// Whether the media element can decode this codec profile
    fn supports_codec(&self, codec: CodecProfile) -> Result<bool>;

    /// Whether the element plays adaptive manifests without a library
    fn native_adaptive_playback(&self) -> Result<bool>;

    /// Whether in-runtime demuxing (media source buffers) is available
    fn media_source_extensions(&self) -> Result<bool>;

    fn device_class(&self) -> Result<DeviceClass>;

    fn network_hint(&self) -> Result<NetworkHint>;
}

/// A fixed platform description, loaded from configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformProfile {
    pub codecs: Vec<CodecProfile>,
    pub native_adaptive: bool,
    pub media_source: bool,
    pub device: DeviceClass,
    pub network: NetworkHint,
}

impl Default for PlatformProfile {
    fn default() -> Self {
        Self {
            codecs: vec![
                CodecProfile::H264Baseline,
                CodecProfile::H264Main,
                CodecProfile::H264High,
                CodecProfile::Vp9,
                CodecProfile::Aac,
                CodecProfile::Opus,
            ],
            native_adaptive: false,
            media_source: true,
            device: DeviceClass::Desktop,
            network: NetworkHint::default(),
        }
    }
}

impl Platform for PlatformProfile {
    fn supports_codec(&self, codec: CodecProfile) -> Result<bool> {
        Ok(self.codecs.contains(&codec))
    }

    fn native_adaptive_playback(&self) -> Result<bool> {
        Ok(self.native_adaptive)
    }

    fn media_source_extensions(&self) -> Result<bool> {
        Ok(self.media_source)
    }

    fn device_class(&self) -> Result<DeviceClass> {
        Ok(self.device)
    }

    fn network_hint(&self) -> Result<NetworkHint> {
        Ok(self.network)
    }
}
