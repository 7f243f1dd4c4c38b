//! Prometheus metrics describing the bridge itself.
//!
//! The counters are always updated (plain atomic ops). They only become
//! visible once [`BridgeMetrics::register`] puts them on a registry, which the
//! bridge does when `self_metrics` is enabled in its configuration.

use prometheus::{IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

use crate::handle::InstrumentKind;

/// Prometheus metrics for a bridge.
#[derive(Clone)]
pub struct BridgeMetrics {
    /// Live handles per table kind
    pub live_handles: IntGaugeVec,

    /// Lookups that found no live object
    pub handle_misses: IntCounterVec,

    /// Create and derive calls that returned the invalid handle
    pub rejected_calls: IntCounter,

    /// Exposition listeners started
    pub exposition_listeners: IntGauge,
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeMetrics {
    /// Create metrics with prefix "prom_bridge".
    pub fn new() -> Self {
        Self::with_prefix("prom_bridge")
    }

    /// Create metrics named `{prefix}_live_handles`, `{prefix}_handle_misses_total`, etc.
    ///
    /// Characters outside `[a-zA-Z0-9_:]` are replaced with underscores, and a
    /// leading digit is replaced as well.
    pub fn with_prefix(prefix: &str) -> Self {
        let prefix: String = prefix
            .chars()
            .enumerate()
            .map(|(i, c)| {
                let valid = c.is_ascii_alphabetic()
                    || c == '_'
                    || c == ':'
                    || (i > 0 && c.is_ascii_digit());
                if valid {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        Self {
            live_handles: IntGaugeVec::new(
                Opts::new(
                    format!("{prefix}_live_handles"),
                    "Handles currently registered per table",
                ),
                &["kind"],
            )
            .expect("metric creation should not fail"),

            handle_misses: IntCounterVec::new(
                Opts::new(
                    format!("{prefix}_handle_misses_total"),
                    "Lookups of unknown or stale handles",
                ),
                &["kind"],
            )
            .expect("metric creation should not fail"),

            rejected_calls: IntCounter::with_opts(Opts::new(
                format!("{prefix}_rejected_calls_total"),
                "Create and derive calls answered with the invalid handle",
            ))
            .expect("metric creation should not fail"),

            exposition_listeners: IntGauge::with_opts(Opts::new(
                format!("{prefix}_exposition_listeners"),
                "Exposition listeners started",
            ))
            .expect("metric creation should not fail"),
        }
    }

    /// Register all metrics with a Registry for exposition.
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register (e.g., duplicate names).
    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.live_handles.clone()))?;
        registry.register(Box::new(self.handle_misses.clone()))?;
        registry.register(Box::new(self.rejected_calls.clone()))?;
        registry.register(Box::new(self.exposition_listeners.clone()))?;
        Ok(())
    }

    /// Update the live handle gauge of one table.
    #[inline]
    pub fn set_live_handles(&self, kind: InstrumentKind, count: usize) {
        self.live_handles
            .with_label_values(&[kind.as_str()])
            .set(count as i64);
    }

    /// Record a lookup miss.
    #[inline]
    pub fn record_miss(&self, kind: InstrumentKind) {
        self.handle_misses.with_label_values(&[kind.as_str()]).inc();
    }

    /// Record a call answered with the invalid handle.
    #[inline]
    pub fn record_rejected(&self) {
        self.rejected_calls.inc();
    }

    /// Record a started exposition listener.
    #[inline]
    pub fn record_listener(&self) {
        self.exposition_listeners.inc();
    }
}

impl std::fmt::Debug for BridgeMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeMetrics")
            .field("rejected_calls", &self.rejected_calls.get())
            .field("exposition_listeners", &self.exposition_listeners.get())
            .finish()
    }
}
