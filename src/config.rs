//! Runtime configuration

use serde::{Deserialize, Serialize};

use crate::error::JsError;
use crate::gc::DEFAULT_GC_THRESHOLD;

/// Tunables for a [`crate::Runtime`]. Missing fields take their defaults, so a
/// partial JSON document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Net allocations between collections; 0 disables automatic collection
    pub gc_threshold: usize,
    /// Initial capacity of the microtask queue
    pub queue_capacity: usize,
    /// Record promises rejected while nothing is listening
    pub track_unhandled_rejections: bool,
    /// Entries kept in each diagnostics list (unhandled rejections and
    /// reported errors) between host polls. Past it the oldest entry is
    /// dropped. 0 keeps everything.
    pub diagnostics_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            gc_threshold: DEFAULT_GC_THRESHOLD,
            queue_capacity: 64,
            track_unhandled_rejections: true,
            diagnostics_capacity: 1024,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json(source: &str) -> Result<Self, JsError> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn to_json(&self) -> Result<String, JsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
