//! Metric instruments reachable through the bridge.
//!
//! Gauges and counters come straight from the `prometheus` crate. Summaries
//! are provided by [`summary`], built on the targeted-quantile stream in
//! [`quantile`], because the crate has no summary type of its own.
//!
//! [`LabeledFamily`] is the seam the handle façade is written against: every
//! vector kind can hand out a child for a label-value tuple and delete it
//! again, and every child is a cheap clone sharing its series.
//!
//! # Bridge metrics
//!
//! [`BridgeMetrics`] instruments the bridge itself. With `self_metrics`
//! enabled it is registered on the bridge's registry under the `prom_bridge_`
//! prefix:
//!
//! - `prom_bridge_live_handles{kind}` - handles currently registered per table
//! - `prom_bridge_handle_misses_total{kind}` - lookups of unknown or stale handles
//! - `prom_bridge_rejected_calls_total` - create/derive calls answered with handle 0
//! - `prom_bridge_exposition_listeners` - listeners started on this bridge

mod prometheus;
pub mod quantile;
pub mod summary;

pub use self::prometheus::BridgeMetrics;
pub use summary::{Objectives, Summary, SummaryOpts, SummaryVec};

use ::prometheus::core::Collector;
use ::prometheus::{Counter, CounterVec, Gauge, GaugeVec};

/// A vector of instruments keyed by label values.
pub trait LabeledFamily: Collector + Clone + 'static {
    /// The per-tuple instrument. Clones share the underlying series.
    type Child: Clone + Send + Sync + 'static;

    /// Return the child for `vals`, creating it on first use. Fails when the
    /// number of values does not match the label names.
    fn child(&self, vals: &[&str]) -> ::prometheus::Result<Self::Child>;

    /// Delete the child for `vals`. Fails when no such child exists.
    fn delete(&self, vals: &[&str]) -> ::prometheus::Result<()>;
}

impl LabeledFamily for GaugeVec {
    type Child = Gauge;

    fn child(&self, vals: &[&str]) -> ::prometheus::Result<Gauge> {
        self.get_metric_with_label_values(vals)
    }

    fn delete(&self, vals: &[&str]) -> ::prometheus::Result<()> {
        self.remove_label_values(vals)
    }
}

impl LabeledFamily for CounterVec {
    type Child = Counter;

    fn child(&self, vals: &[&str]) -> ::prometheus::Result<Counter> {
        self.get_metric_with_label_values(vals)
    }

    fn delete(&self, vals: &[&str]) -> ::prometheus::Result<()> {
        self.remove_label_values(vals)
    }
}

impl LabeledFamily for SummaryVec {
    type Child = Summary;

    fn child(&self, vals: &[&str]) -> ::prometheus::Result<Summary> {
        self.get_metric_with_label_values(vals)
    }

    fn delete(&self, vals: &[&str]) -> ::prometheus::Result<()> {
        self.remove_label_values(vals)
    }
}
