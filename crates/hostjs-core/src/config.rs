//! Runtime configuration
//!
//! [`RuntimeConfig`] holds the serializable settings of a runtime so that
//! embedders can keep them in a JSON file. Settings that are code (the
//! interrupt handler, sandbox data) go through
//! [`ContextBuilder`](crate::ContextBuilder) instead.

use serde::{Deserialize, Serialize};

use crate::error::HostResult;

/// Default memory ceiling: 4 MiB.
pub const DEFAULT_MEMORY_LIMIT: usize = 4 * 1024 * 1024;

/// Settings applied when a root [`Context`](crate::Context) creates its runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Memory ceiling in bytes. `None` disables the ceiling.
    /// Default: 4 MiB
    pub memory_limit: Option<usize>,

    /// Omit debug information (the filename) from dumped compiled units.
    /// Default: false
    pub strip_debug: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            memory_limit: Some(DEFAULT_MEMORY_LIMIT),
            strip_debug: false,
        }
    }
}

impl RuntimeConfig {
    /// Create a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Config without a memory ceiling.
    pub fn unbounded() -> Self {
        Self {
            memory_limit: None,
            ..Default::default()
        }
    }

    pub fn with_memory_limit(mut self, limit: Option<usize>) -> Self {
        self.memory_limit = limit;
        self
    }

    pub fn with_strip_debug(mut self, strip: bool) -> Self {
        self.strip_debug = strip;
        self
    }

    /// Load a config from JSON; missing fields take their defaults.
    pub fn from_json(text: &str) -> HostResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
