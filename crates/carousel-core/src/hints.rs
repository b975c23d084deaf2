//! Per-item compatibility hints
//!
//! Known quirks of individual catalog items live here as data keyed by item
//! id. The resolver and the quality controller consult the table; nothing
//! matches on titles.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Known compatibility quirks of one item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompatibilityHint {
    /// Never offer the adaptive manifest
    pub skip_adaptive: bool,
    /// Never offer the alternative codec container
    pub skip_alternative_codec: bool,
    /// Highest rendition index the quality controller may recommend
    pub max_quality_level: Option<usize>,
    /// Free-form explanation for operators
    pub note: Option<String>,
}

/// Hint table keyed by item id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HintTable(HashMap<String, CompatibilityHint>);

impl HintTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hint(mut self, item_id: impl Into<String>, hint: CompatibilityHint) -> Self {
        self.0.insert(item_id.into(), hint);
        self
    }

    pub fn get(&self, item_id: &str) -> Option<&CompatibilityHint> {
        self.0.get(item_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
