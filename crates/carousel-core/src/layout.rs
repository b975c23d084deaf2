//! Media source layout on the content origin
//!
//! Every item has an adaptive manifest at
//! `{origin}{adaptive_dir}/{canonical_path}/{manifest_name}` and progressive
//! files at `{origin}{progressive_dir}/{canonical_path}.{ext}`. The rewrite
//! between the two keeps the percent-encoding of `canonical_path` untouched,
//! so it can be inverted exactly.

use crate::{Error, PlaylistItem, Result, SourceFormat};
use serde::{Deserialize, Serialize};
use url::Url;

/// Origin directory layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaLayout {
    /// Base URL of the content origin, must end with `/`
    pub origin: Url,
    pub adaptive_dir: String,
    pub manifest_name: String,
    pub progressive_dir: String,
    pub progressive_ext: String,
    pub alternative_dir: String,
    pub alternative_ext: String,
}

impl Default for MediaLayout {
    fn default() -> Self {
        Self {
            origin: Url::parse("http://localhost:8080/media/").expect("static origin URL is valid"),
            adaptive_dir: "hls".to_string(),
            manifest_name: "master.m3u8".to_string(),
            progressive_dir: "video".to_string(),
            progressive_ext: "mp4".to_string(),
            alternative_dir: "webm".to_string(),
            alternative_ext: "webm".to_string(),
        }
    }
}

impl MediaLayout {
    pub fn with_origin(origin: Url) -> Self {
        Self {
            origin,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.origin.path().ends_with('/') {
            return Err(Error::InvalidConfig(format!(
                "layout.origin must end with '/': {}",
                self.origin
            )));
        }
        if self.origin.cannot_be_a_base() {
            return Err(Error::InvalidConfig(format!(
                "layout.origin cannot be a base URL: {}",
                self.origin
            )));
        }
        for (name, value) in [
            ("adaptive_dir", &self.adaptive_dir),
            ("manifest_name", &self.manifest_name),
            ("progressive_dir", &self.progressive_dir),
            ("progressive_ext", &self.progressive_ext),
            ("alternative_dir", &self.alternative_dir),
            ("alternative_ext", &self.alternative_ext),
        ] {
            if value.is_empty() || value.contains('/') {
                return Err(Error::InvalidConfig(format!(
                    "layout.{} must be a single non-empty path segment",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Adaptive manifest URL for an item
    pub fn adaptive_url(&self, item: &PlaylistItem) -> Result<Url> {
        let relative = format!(
            "{}/{}/{}",
            self.adaptive_dir, item.canonical_path, self.manifest_name
        );
        Ok(self.origin.join(&relative)?)
    }

    /// Progressive file URL for an item in the given format
    pub fn file_url(&self, item: &PlaylistItem, format: SourceFormat) -> Result<Url> {
        let (dir, ext) = match format {
            SourceFormat::Adaptive => return self.adaptive_url(item),
            SourceFormat::Progressive => (&self.progressive_dir, &self.progressive_ext),
            SourceFormat::AlternativeCodec => (&self.alternative_dir, &self.alternative_ext),
        };
        let relative = format!("{}/{}.{}", dir, item.canonical_path, ext);
        Ok(self.origin.join(&relative)?)
    }

    /// Rewrite an adaptive manifest URL into the file URL of the same item
    pub fn rewrite_to_file(&self, adaptive: &Url, format: SourceFormat) -> Option<Url> {
        let name = self.adaptive_name(adaptive)?;
        let (dir, ext) = match format {
            SourceFormat::Adaptive => return Some(adaptive.clone()),
            SourceFormat::Progressive => (&self.progressive_dir, &self.progressive_ext),
            SourceFormat::AlternativeCodec => (&self.alternative_dir, &self.alternative_ext),
        };
        self.origin.join(&format!("{}/{}.{}", dir, name, ext)).ok()
    }

    /// Rewrite a progressive or alternative file URL back into its adaptive manifest URL
    pub fn rewrite_to_adaptive(&self, file: &Url) -> Option<Url> {
        let name = self
            .file_name(file, &self.progressive_dir, &self.progressive_ext)
            .or_else(|| self.file_name(file, &self.alternative_dir, &self.alternative_ext))?;
        self.origin
            .join(&format!("{}/{}/{}", self.adaptive_dir, name, self.manifest_name))
            .ok()
    }

    /// Format of a URL under this layout, if it belongs to it
    pub fn classify(&self, url: &Url) -> Option<SourceFormat> {
        if self.adaptive_name(url).is_some() {
            Some(SourceFormat::Adaptive)
        } else if self.file_name(url, &self.progressive_dir, &self.progressive_ext).is_some() {
            Some(SourceFormat::Progressive)
        } else if self.file_name(url, &self.alternative_dir, &self.alternative_ext).is_some() {
            Some(SourceFormat::AlternativeCodec)
        } else {
            None
        }
    }

    fn relative_path<'a>(&self, url: &'a Url) -> Option<&'a str> {
        if url.scheme() != self.origin.scheme() || url.host_str() != self.origin.host_str() {
            return None;
        }
        if url.port_or_known_default() != self.origin.port_or_known_default() {
            return None;
        }
        url.path().strip_prefix(self.origin.path())
    }

    fn adaptive_name<'a>(&self, url: &'a Url) -> Option<&'a str> {
        let rest = self.relative_path(url)?;
        let rest = rest.strip_prefix(self.adaptive_dir.as_str())?.strip_prefix('/')?;
        let name = rest
            .strip_suffix(self.manifest_name.as_str())?
            .strip_suffix('/')?;
        (!name.is_empty()).then_some(name)
    }

    fn file_name<'a>(&self, url: &'a Url, dir: &str, ext: &str) -> Option<&'a str> {
        let rest = self.relative_path(url)?;
        let rest = rest.strip_prefix(dir)?.strip_prefix('/')?;
        let name = rest.strip_suffix(ext)?.strip_suffix('.')?;
        (!name.is_empty()).then_some(name)
    }
}
