//! Runner configuration types
//!
//! The runner needs very little configuration: the iteration ceiling that
//! bounds every run, and whether to trace individual invocations.

use serde::{Deserialize, Serialize};

/// Ceiling applied when none is configured
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Configuration for the callback runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Maximum number of invocations before a run is aborted (default: 100)
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Log every invocation at trace level
    #[serde(default)]
    pub trace_callbacks: bool,
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            trace_callbacks: false,
        }
    }
}

impl RunnerConfig {
    /// Create a runner configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the iteration ceiling
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Builder method: enable or disable per-invocation tracing
    pub fn with_callback_tracing(mut self, enabled: bool) -> Self {
        self.trace_callbacks = enabled;
        self
    }
}
