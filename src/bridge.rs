//! The instrument façade.
//!
//! A [`Bridge`] owns everything a foreign caller can reach: one handle table
//! per instrument kind and vector kind, the Prometheus registry the
//! instruments are registered on, and the exposition listeners serving it.
//! Bridges are independent of each other; the C ABI reaches a single
//! process-wide one through [`crate::context`].
//!
//! Every operation takes and returns plain handles. Metric semantics stay with
//! the metrics library; the bridge only validates arguments, registers the
//! result and keeps the tables in sync with the vectors.
//!
//! # Example
//!
//! ```ignore
//! use prom_bridge::BridgeBuilder;
//!
//! let bridge = BridgeBuilder::new().namespace("app").build()?;
//! let requests = bridge.new_counter_vec("requests_total", "Requests", vec!["code".into()])?;
//! let ok = bridge.counter_with_label_values(requests, &["200".into()])?;
//! bridge.counter_add(ok, 1.0)?;
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};

use prometheus::{Counter, CounterVec, Gauge, GaugeVec, Opts, Registry};
use tracing::{debug, info, warn};

use crate::builder::BridgeBuilder;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::exposition::Exposition;
use crate::family::Family;
use crate::handle::{Handle, InstrumentKind};
use crate::metrics::{BridgeMetrics, LabeledFamily, Objectives, Summary, SummaryOpts, SummaryVec};

/// Generation stamped into the handles of the next bridge. Wraps at 256.
static NEXT_GENERATION: AtomicU8 = AtomicU8::new(1);

/// Handle tables, registry and exposition for one set of instruments.
pub struct Bridge {
    config: BridgeConfig,
    registry: Registry,
    generation: u8,
    gauges: Family<GaugeVec>,
    counters: Family<CounterVec>,
    summaries: Family<SummaryVec>,
    metrics: BridgeMetrics,
    exposition: Exposition,
}

impl Bridge {
    /// Build a bridge with default configuration.
    pub fn new() -> Result<Self> {
        BridgeBuilder::new().build()
    }

    pub(crate) fn from_config(config: BridgeConfig) -> Result<Self> {
        let registry = config.registry.clone().unwrap_or_default();
        let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);

        let metrics = BridgeMetrics::new();
        if config.self_metrics {
            metrics.register(&registry)?;
        }

        let exposition = Exposition::new(
            &config.thread_prefix,
            config.effective_exposition_threads(),
        );

        info!(
            generation,
            namespace = config.namespace.as_deref().unwrap_or(""),
            self_metrics = config.self_metrics,
            "prom-bridge initialized"
        );

        Ok(Self {
            gauges: Family::new(InstrumentKind::Gauge, InstrumentKind::GaugeVec, generation),
            counters: Family::new(
                InstrumentKind::Counter,
                InstrumentKind::CounterVec,
                generation,
            ),
            summaries: Family::new(
                InstrumentKind::Summary,
                InstrumentKind::SummaryVec,
                generation,
            ),
            config,
            registry,
            generation,
            metrics,
            exposition,
        })
    }

    /// Get the configuration this bridge was built with.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The registry every instrument is registered on.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Generation stamped into this bridge's handles.
    pub fn generation(&self) -> u8 {
        self.generation
    }

    /// Metrics describing the bridge itself.
    pub fn metrics(&self) -> &BridgeMetrics {
        &self.metrics
    }

    /// Number of live handles of `kind`.
    pub fn live_handles(&self, kind: InstrumentKind) -> usize {
        match kind {
            InstrumentKind::Gauge => self.gauges.live().0,
            InstrumentKind::GaugeVec => self.gauges.live().1,
            InstrumentKind::Counter => self.counters.live().0,
            InstrumentKind::CounterVec => self.counters.live().1,
            InstrumentKind::Summary => self.summaries.live().0,
            InstrumentKind::SummaryVec => self.summaries.live().1,
        }
    }

    // Gauges

    pub fn new_gauge(&self, name: &str, help: &str) -> Result<Handle> {
        let result = Gauge::with_opts(self.opts(name, help))
            .map_err(BridgeError::from)
            .and_then(|gauge| {
                self.register_collector(gauge.clone())?;
                self.gauges.register_scalar(gauge)
            });
        self.created(&self.gauges, InstrumentKind::Gauge, name, result)
    }

    pub fn new_gauge_vec(&self, name: &str, help: &str, labels: Vec<String>) -> Result<Handle> {
        let result = GaugeVec::new(self.opts(name, help), &str_refs(&labels))
            .map_err(BridgeError::from)
            .and_then(|vec| {
                self.register_collector(vec.clone())?;
                self.gauges.register_vector(vec)
            });
        self.created(&self.gauges, InstrumentKind::GaugeVec, name, result)
    }

    /// Return the gauge of `vector` for `values`, creating it on first use.
    pub fn gauge_with_label_values(&self, vector: Handle, values: &[String]) -> Result<Handle> {
        self.derive(&self.gauges, vector, values)
    }

    /// Delete the gauge of `vector` for `values`. Returns whether it existed.
    pub fn gauge_delete_label_values(&self, vector: Handle, values: &[String]) -> Result<bool> {
        self.delete(&self.gauges, vector, values)
    }

    pub fn gauge_set(&self, handle: Handle, value: f64) -> Result<()> {
        self.gauge(handle)?.set(value);
        Ok(())
    }

    pub fn gauge_add(&self, handle: Handle, value: f64) -> Result<()> {
        self.gauge(handle)?.add(value);
        Ok(())
    }

    pub fn gauge_sub(&self, handle: Handle, value: f64) -> Result<()> {
        self.gauge(handle)?.sub(value);
        Ok(())
    }

    /// Resolve a gauge handle, plain or derived.
    pub fn gauge(&self, handle: Handle) -> Result<Gauge> {
        self.resolve_scalar(&self.gauges, handle)
    }

    // Counters

    pub fn new_counter(&self, name: &str, help: &str) -> Result<Handle> {
        let result = Counter::with_opts(self.opts(name, help))
            .map_err(BridgeError::from)
            .and_then(|counter| {
                self.register_collector(counter.clone())?;
                self.counters.register_scalar(counter)
            });
        self.created(&self.counters, InstrumentKind::Counter, name, result)
    }

    pub fn new_counter_vec(&self, name: &str, help: &str, labels: Vec<String>) -> Result<Handle> {
        let result = CounterVec::new(self.opts(name, help), &str_refs(&labels))
            .map_err(BridgeError::from)
            .and_then(|vec| {
                self.register_collector(vec.clone())?;
                self.counters.register_vector(vec)
            });
        self.created(&self.counters, InstrumentKind::CounterVec, name, result)
    }

    /// Return the counter of `vector` for `values`, creating it on first use.
    pub fn counter_with_label_values(&self, vector: Handle, values: &[String]) -> Result<Handle> {
        self.derive(&self.counters, vector, values)
    }

    /// Delete the counter of `vector` for `values`. Returns whether it existed.
    pub fn counter_delete_label_values(&self, vector: Handle, values: &[String]) -> Result<bool> {
        self.delete(&self.counters, vector, values)
    }

    /// Add `value` to a counter.
    ///
    /// Counters only go up: a negative or NaN value is rejected and the
    /// counter is left untouched.
    pub fn counter_add(&self, handle: Handle, value: f64) -> Result<()> {
        let counter = self.counter(handle)?;
        if value.is_nan() || value < 0.0 {
            return Err(BridgeError::InvalidArgument(format!(
                "counter {handle} cannot add {value}"
            )));
        }
        counter.inc_by(value);
        Ok(())
    }

    /// Resolve a counter handle, plain or derived.
    pub fn counter(&self, handle: Handle) -> Result<Counter> {
        self.resolve_scalar(&self.counters, handle)
    }

    // Summaries

    /// Create a summary.
    ///
    /// `quantiles` and `errors` pair up into objectives and must be non-empty
    /// and of equal length. Zero `max_age_secs` or `age_buckets` select the
    /// configured defaults.
    pub fn new_summary(
        &self,
        name: &str,
        help: &str,
        quantiles: &[f64],
        errors: &[f64],
        max_age_secs: u32,
        age_buckets: u32,
    ) -> Result<Handle> {
        let result = self
            .summary_opts(name, help, quantiles, errors, max_age_secs, age_buckets)
            .and_then(Summary::with_opts)
            .and_then(|summary| {
                self.register_collector(summary.clone())?;
                self.summaries.register_scalar(summary)
            });
        self.created(&self.summaries, InstrumentKind::Summary, name, result)
    }

    /// Create a summary vector. See [`new_summary`](Self::new_summary).
    #[allow(clippy::too_many_arguments)]
    pub fn new_summary_vec(
        &self,
        name: &str,
        help: &str,
        quantiles: &[f64],
        errors: &[f64],
        max_age_secs: u32,
        age_buckets: u32,
        labels: Vec<String>,
    ) -> Result<Handle> {
        let result = self
            .summary_opts(name, help, quantiles, errors, max_age_secs, age_buckets)
            .and_then(|opts| SummaryVec::new(opts, &str_refs(&labels)))
            .and_then(|vec| {
                self.register_collector(vec.clone())?;
                self.summaries.register_vector(vec)
            });
        self.created(&self.summaries, InstrumentKind::SummaryVec, name, result)
    }

    /// Return the summary of `vector` for `values`, creating it on first use.
    pub fn summary_with_label_values(&self, vector: Handle, values: &[String]) -> Result<Handle> {
        self.derive(&self.summaries, vector, values)
    }

    /// Delete the summary of `vector` for `values`. Returns whether it existed.
    pub fn summary_delete_label_values(&self, vector: Handle, values: &[String]) -> Result<bool> {
        self.delete(&self.summaries, vector, values)
    }

    pub fn summary_observe(&self, handle: Handle, value: f64) -> Result<()> {
        self.summary(handle)?.observe(value);
        Ok(())
    }

    /// Resolve a summary handle, plain or derived.
    pub fn summary(&self, handle: Handle) -> Result<Summary> {
        self.resolve_scalar(&self.summaries, handle)
    }

    // Exposition

    /// Serve the registry at `path` on `addr` in the background.
    ///
    /// An empty `path` uses the configured `metrics_path`. Returns the bound
    /// address; bind failures are returned rather than only logged.
    pub fn start_exposition(&self, addr: &str, path: &str) -> Result<SocketAddr> {
        let path = if path.trim().is_empty() {
            self.config.metrics_path.as_str()
        } else {
            path
        };
        let bound = self.exposition.serve(addr, path, self.registry.clone())?;
        self.metrics.record_listener();
        Ok(bound)
    }

    /// Addresses of the exposition listeners started on this bridge.
    pub fn exposition_listeners(&self) -> Vec<SocketAddr> {
        self.exposition.listeners()
    }

    fn opts(&self, name: &str, help: &str) -> Opts {
        let opts = Opts::new(name, help);
        match self.config.namespace {
            Some(ref namespace) => opts.namespace(namespace.as_str()),
            None => opts,
        }
    }

    fn summary_opts(
        &self,
        name: &str,
        help: &str,
        quantiles: &[f64],
        errors: &[f64],
        max_age_secs: u32,
        age_buckets: u32,
    ) -> Result<SummaryOpts> {
        let objectives = Objectives::new(quantiles, errors)?;
        let defaults = &self.config.summary;
        let opts = SummaryOpts::new(name, help, objectives)
            .max_age(defaults.max_age(max_age_secs))
            .age_buckets(defaults.age_buckets(age_buckets))
            .buf_cap(defaults.buf_cap);
        Ok(match self.config.namespace {
            Some(ref namespace) => opts.namespace(namespace.as_str()),
            None => opts,
        })
    }

    fn register_collector<C>(&self, collector: C) -> Result<()>
    where
        C: prometheus::core::Collector + 'static,
    {
        self.registry.register(Box::new(collector))?;
        Ok(())
    }

    fn created<V: LabeledFamily>(
        &self,
        family: &Family<V>,
        kind: InstrumentKind,
        name: &str,
        result: Result<Handle>,
    ) -> Result<Handle> {
        match result {
            Ok(handle) => {
                debug!(%kind, name, %handle, "created");
                self.refresh_live(family);
                Ok(handle)
            }
            Err(e) => {
                warn!(%kind, name, %e, "create failed");
                self.metrics.record_rejected();
                Err(e)
            }
        }
    }

    fn derive<V: LabeledFamily>(
        &self,
        family: &Family<V>,
        vector: Handle,
        values: &[String],
    ) -> Result<Handle> {
        match family.derive(vector, values.to_vec()) {
            Ok(handle) => {
                debug!(kind = %family.scalar_kind(), %vector, ?values, %handle, "derived");
                self.refresh_live(family);
                Ok(handle)
            }
            Err(e) => {
                if let BridgeError::UnknownHandle { .. } = e {
                    self.metrics.record_miss(family.vector_kind());
                }
                warn!(kind = %family.vector_kind(), %vector, ?values, %e, "derive failed");
                self.metrics.record_rejected();
                Err(e)
            }
        }
    }

    fn delete<V: LabeledFamily>(
        &self,
        family: &Family<V>,
        vector: Handle,
        values: &[String],
    ) -> Result<bool> {
        match family.delete(vector, values.to_vec()) {
            Ok(existed) => {
                debug!(kind = %family.vector_kind(), %vector, ?values, existed, "deleted");
                self.refresh_live(family);
                Ok(existed)
            }
            Err(e) => {
                self.metrics.record_miss(family.vector_kind());
                Err(e)
            }
        }
    }

    fn resolve_scalar<V: LabeledFamily>(
        &self,
        family: &Family<V>,
        handle: Handle,
    ) -> Result<V::Child> {
        family.scalar(handle).ok_or_else(|| {
            self.metrics.record_miss(family.scalar_kind());
            BridgeError::UnknownHandle {
                kind: family.scalar_kind(),
                handle: handle.raw(),
            }
        })
    }

    fn refresh_live<V: LabeledFamily>(&self, family: &Family<V>) {
        let (scalars, vectors) = family.live();
        self.metrics.set_live_handles(family.scalar_kind(), scalars);
        self.metrics.set_live_handles(family.vector_kind(), vectors);
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("generation", &self.generation)
            .field("gauges", &self.gauges)
            .field("counters", &self.counters)
            .field("summaries", &self.summaries)
            .field("exposition", &self.exposition)
            .finish_non_exhaustive()
    }
}

fn str_refs(values: &[String]) -> Vec<&str> {
    values.iter().map(String::as_str).collect()
}
