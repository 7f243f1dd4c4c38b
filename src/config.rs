//! Configuration types for prom-bridge.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::metrics::summary::{DEFAULT_AGE_BUCKETS, DEFAULT_BUF_CAP, DEFAULT_MAX_AGE};
use prometheus::Registry;

/// Configuration for a bridge.
///
/// This struct can be deserialized from TOML, YAML, JSON, or environment variables
/// using figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    /// Prefix for exposition thread names (default: "prom-bridge")
    #[serde(default = "default_thread_prefix")]
    pub thread_prefix: String,

    /// Number of tokio worker threads serving exposition (default: 1)
    #[serde(default = "default_exposition_threads")]
    pub exposition_threads: usize,

    /// Path used when a caller starts exposition without one (default: "/metrics")
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,

    /// Namespace prepended to every instrument name created through the bridge
    #[serde(default)]
    pub namespace: Option<String>,

    /// Filter directive for the log subscriber installed by `prom_bridge_init`.
    /// Falls back to `RUST_LOG` when unset.
    #[serde(default)]
    pub log_filter: Option<String>,

    /// Register the bridge's own `prom_bridge_*` metrics (default: false)
    #[serde(default)]
    pub self_metrics: bool,

    /// Defaults applied to summaries created with zero max age or buckets
    #[serde(default)]
    pub summary: SummaryDefaults,

    /// Prometheus registry instruments are registered with.
    /// A fresh registry is created when None.
    /// Not serializable - must be set programmatically.
    #[serde(skip)]
    pub registry: Option<Registry>,
}

/// Summary parameters used when a caller passes zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct SummaryDefaults {
    /// Reporting window in seconds (default: 600)
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// Number of rotating streams (default: 5)
    #[serde(default = "default_age_buckets")]
    pub age_buckets: u32,

    /// Observations buffered per stream before a merge (default: 500)
    #[serde(default = "default_buf_cap")]
    pub buf_cap: usize,
}

impl SummaryDefaults {
    /// Resolve the max age a caller asked for, in seconds.
    pub fn max_age(&self, requested_secs: u32) -> Duration {
        if requested_secs > 0 {
            Duration::from_secs(requested_secs.into())
        } else if self.max_age_secs > 0 {
            Duration::from_secs(self.max_age_secs)
        } else {
            DEFAULT_MAX_AGE
        }
    }

    /// Resolve the age bucket count a caller asked for.
    pub fn age_buckets(&self, requested: u32) -> u32 {
        if requested > 0 {
            requested
        } else if self.age_buckets > 0 {
            self.age_buckets
        } else {
            DEFAULT_AGE_BUCKETS
        }
    }
}

impl Default for SummaryDefaults {
    fn default() -> Self {
        Self {
            max_age_secs: default_max_age_secs(),
            age_buckets: default_age_buckets(),
            buf_cap: default_buf_cap(),
        }
    }
}

fn default_thread_prefix() -> String {
    "prom-bridge".to_string()
}

fn default_exposition_threads() -> usize {
    1
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_max_age_secs() -> u64 {
    DEFAULT_MAX_AGE.as_secs()
}

fn default_age_buckets() -> u32 {
    DEFAULT_AGE_BUCKETS
}

fn default_buf_cap() -> usize {
    DEFAULT_BUF_CAP
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            thread_prefix: default_thread_prefix(),
            exposition_threads: default_exposition_threads(),
            metrics_path: default_metrics_path(),
            namespace: None,
            log_filter: None,
            self_metrics: false,
            summary: SummaryDefaults::default(),
            registry: None,
        }
    }
}

impl BridgeConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the effective number of exposition threads.
    ///
    /// Zero is treated as 1.
    pub fn effective_exposition_threads(&self) -> usize {
        self.exposition_threads.max(1)
    }
}
