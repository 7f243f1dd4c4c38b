//! Summary and SummaryVec collectors.
//!
//! The `prometheus` crate has no summary type, so this module provides one that
//! plugs into a [`Registry`](prometheus::Registry) through
//! [`Collector`]. Each series keeps `age_buckets` quantile streams; every
//! observation goes into all of them and the head stream, the oldest one, is
//! reset and rotated to the back every `max_age / age_buckets`. Quantiles are
//! reported from the head stream, so they cover at most the last `max_age` of
//! observations. Count and sum are cumulative.
//!
//! Clones of a [`Summary`] share the same series, like the crate's gauges and
//! counters.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use prometheus::core::{Collector, Desc};
use prometheus::proto::{
    LabelPair, Metric, MetricFamily, MetricType, Quantile, Summary as SummaryProto,
};
use prometheus::Opts;

use super::quantile::{QuantileStream, Target};
use crate::error::{BridgeError, Result};

/// Window reported by a summary when no max age is given.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(600);

/// Number of rotating streams when no count is given.
pub const DEFAULT_AGE_BUCKETS: u32 = 5;

/// Observations buffered per stream before a merge.
pub const DEFAULT_BUF_CAP: usize = 500;

/// Largest accepted number of rotating streams per series.
pub const MAX_AGE_BUCKETS: u32 = 1024;

/// Label the exposition format reserves for quantile values.
const QUANTILE_LABEL: &str = "quantile";

/// Quantile to allowed-rank-error mapping of a summary.
#[derive(Debug, Clone, PartialEq)]
pub struct Objectives(Vec<Target>);

impl Objectives {
    /// Pair `quantiles[i]` with `errors[i]`.
    ///
    /// Fails when the lists are empty or of different lengths, or when any
    /// value lies outside `[0, 1]`. A repeated quantile keeps the last error.
    pub fn new(quantiles: &[f64], errors: &[f64]) -> Result<Self> {
        if quantiles.is_empty() {
            return Err(BridgeError::InvalidObjectives(
                "quantile list is empty".to_string(),
            ));
        }
        if quantiles.len() != errors.len() {
            return Err(BridgeError::InvalidObjectives(format!(
                "{} quantiles but {} errors",
                quantiles.len(),
                errors.len()
            )));
        }

        let mut targets = Vec::with_capacity(quantiles.len());
        for (&quantile, &epsilon) in quantiles.iter().zip(errors) {
            if !(0.0..=1.0).contains(&quantile) {
                return Err(BridgeError::InvalidObjectives(format!(
                    "quantile {quantile} outside [0, 1]"
                )));
            }
            if !(0.0..=1.0).contains(&epsilon) {
                return Err(BridgeError::InvalidObjectives(format!(
                    "rank error {epsilon} for quantile {quantile} outside [0, 1]"
                )));
            }
            targets.push(Target { quantile, epsilon });
        }

        // Stable sort keeps input order among equal quantiles
        targets.sort_by(|a, b| a.quantile.total_cmp(&b.quantile));
        targets.dedup_by(|later, kept| {
            if later.quantile == kept.quantile {
                kept.epsilon = later.epsilon;
                true
            } else {
                false
            }
        });
        Ok(Self(targets))
    }

    /// Targets sorted by quantile.
    pub fn targets(&self) -> &[Target] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Options for creating a [`Summary`] or [`SummaryVec`].
#[derive(Debug, Clone)]
pub struct SummaryOpts {
    /// Name, help, namespace and const labels.
    pub common: Opts,
    pub objectives: Objectives,
    pub max_age: Duration,
    pub age_buckets: u32,
    pub buf_cap: usize,
}

impl SummaryOpts {
    pub fn new<S1: Into<String>, S2: Into<String>>(
        name: S1,
        help: S2,
        objectives: Objectives,
    ) -> Self {
        Self {
            common: Opts::new(name, help),
            objectives,
            max_age: DEFAULT_MAX_AGE,
            age_buckets: DEFAULT_AGE_BUCKETS,
            buf_cap: DEFAULT_BUF_CAP,
        }
    }

    pub fn namespace<S: Into<String>>(mut self, namespace: S) -> Self {
        self.common = self.common.namespace(namespace);
        self
    }

    /// Set the reporting window. Zero keeps the default.
    pub fn max_age(mut self, max_age: Duration) -> Self {
        if !max_age.is_zero() {
            self.max_age = max_age;
        }
        self
    }

    /// Set the number of rotating streams. Zero keeps the default; more than
    /// [`MAX_AGE_BUCKETS`] is rejected when the summary is built.
    pub fn age_buckets(mut self, age_buckets: u32) -> Self {
        if age_buckets > 0 {
            self.age_buckets = age_buckets;
        }
        self
    }

    pub fn buf_cap(mut self, buf_cap: usize) -> Self {
        if buf_cap > 0 {
            self.buf_cap = buf_cap;
        }
        self
    }

    fn describe(&self, label_names: &[&str]) -> Result<Desc> {
        if self.age_buckets > MAX_AGE_BUCKETS {
            return Err(BridgeError::InvalidArgument(format!(
                "age_buckets {} exceeds {MAX_AGE_BUCKETS}",
                self.age_buckets
            )));
        }
        let reserved = label_names
            .iter()
            .copied()
            .chain(self.common.const_labels.keys().map(String::as_str))
            .any(|name| name == QUANTILE_LABEL);
        if reserved {
            return Err(BridgeError::InvalidArgument(format!(
                "label name {QUANTILE_LABEL:?} is reserved for summaries"
            )));
        }
        Ok(Desc::new(
            self.common.fq_name(),
            self.common.help.clone(),
            label_names.iter().map(|s| s.to_string()).collect(),
            self.common.const_labels.clone(),
        )?)
    }
}

struct SummaryState {
    streams: Vec<QuantileStream>,
    head: usize,
    head_expires: Instant,
    stream_duration: Duration,
    max_age: Duration,
    count: u64,
    sum: f64,
}

impl SummaryState {
    fn new(opts: &SummaryOpts, now: Instant) -> Self {
        let buckets = opts.age_buckets.max(1);
        let stream_duration = (opts.max_age / buckets).max(Duration::from_nanos(1));
        let targets = opts.objectives.targets().to_vec();
        Self {
            streams: (0..buckets)
                .map(|_| QuantileStream::new(targets.clone(), opts.buf_cap))
                .collect(),
            head: 0,
            head_expires: now + stream_duration,
            stream_duration,
            max_age: opts.max_age,
            count: 0,
            sum: 0.0,
        }
    }

    fn rotate(&mut self, now: Instant) {
        if now < self.head_expires {
            return;
        }
        if now.duration_since(self.head_expires) >= self.max_age {
            // Idle for a whole window: everything is stale
            for stream in &mut self.streams {
                stream.reset();
            }
            self.head = 0;
            self.head_expires = now + self.stream_duration;
            return;
        }
        while now >= self.head_expires {
            self.streams[self.head].reset();
            self.head = (self.head + 1) % self.streams.len();
            self.head_expires += self.stream_duration;
        }
    }

    fn observe(&mut self, value: f64, now: Instant) {
        self.rotate(now);
        for stream in &mut self.streams {
            stream.insert(value);
        }
        self.count += 1;
        self.sum += value;
    }
}

struct SummaryCore {
    desc: Arc<Desc>,
    objectives: Objectives,
    label_pairs: Vec<LabelPair>,
    state: Mutex<SummaryState>,
}

impl SummaryCore {
    fn metric(&self, now: Instant) -> Metric {
        let mut proto = SummaryProto::default();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.rotate(now);
            proto.set_sample_count(state.count);
            proto.set_sample_sum(state.sum);

            let head = &mut state.streams[state.head];
            for target in self.objectives.targets() {
                let value = if head.count() == 0 {
                    f64::NAN
                } else {
                    head.query(target.quantile)
                };
                let mut quantile = Quantile::default();
                quantile.set_quantile(target.quantile);
                quantile.set_value(value);
                proto.mut_quantile().push(quantile);
            }
        }

        let mut metric = Metric::default();
        metric.set_label(self.label_pairs.clone().into());
        metric.set_summary(proto);
        metric
    }

    fn family(&self) -> MetricFamily {
        let mut family = MetricFamily::default();
        family.set_name(self.desc.fq_name.clone());
        family.set_help(self.desc.help.clone());
        family.set_field_type(MetricType::SUMMARY);
        family
    }
}

/// One summary series.
#[derive(Clone)]
pub struct Summary {
    core: Arc<SummaryCore>,
}

impl Summary {
    /// Create an unlabeled summary.
    pub fn with_opts(opts: SummaryOpts) -> Result<Self> {
        let desc = Arc::new(opts.describe(&[])?);
        let label_pairs = const_label_pairs(&desc);
        Ok(Self::from_parts(desc, &opts, label_pairs))
    }

    fn from_parts(desc: Arc<Desc>, opts: &SummaryOpts, mut label_pairs: Vec<LabelPair>) -> Self {
        label_pairs.sort_by(|a, b| a.get_name().cmp(b.get_name()));
        Self {
            core: Arc::new(SummaryCore {
                desc,
                objectives: opts.objectives.clone(),
                label_pairs,
                state: Mutex::new(SummaryState::new(opts, Instant::now())),
            }),
        }
    }

    /// Record one observation.
    pub fn observe(&self, value: f64) {
        self.observe_at(value, Instant::now());
    }

    fn observe_at(&self, value: f64, now: Instant) {
        self.core.state.lock().observe(value, now);
    }

    /// Total number of observations.
    pub fn get_sample_count(&self) -> u64 {
        self.core.state.lock().count
    }

    /// Sum of all observations.
    pub fn get_sample_sum(&self) -> f64 {
        self.core.state.lock().sum
    }

    /// Whether `self` and `other` are the same series.
    pub fn same_series(&self, other: &Summary) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    fn collect_at(&self, now: Instant) -> MetricFamily {
        let mut family = self.core.family();
        family.mut_metric().push(self.core.metric(now));
        family
    }
}

impl Collector for Summary {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.core.desc]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        vec![self.collect_at(Instant::now())]
    }
}

impl fmt::Debug for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Summary")
            .field("name", &self.core.desc.fq_name)
            .field("count", &self.get_sample_count())
            .field("sum", &self.get_sample_sum())
            .finish()
    }
}

struct SummaryVecInner {
    desc: Arc<Desc>,
    opts: SummaryOpts,
    children: RwLock<HashMap<Vec<String>, Summary>>,
}

/// A family of summaries partitioned by label values.
#[derive(Clone)]
pub struct SummaryVec {
    inner: Arc<SummaryVecInner>,
}

impl SummaryVec {
    /// Create a vector with the given label names.
    pub fn new(opts: SummaryOpts, label_names: &[&str]) -> Result<Self> {
        let desc = Arc::new(opts.describe(label_names)?);
        Ok(Self {
            inner: Arc::new(SummaryVecInner {
                desc,
                opts,
                children: RwLock::new(HashMap::new()),
            }),
        })
    }

    fn check_cardinality(&self, vals: &[&str]) -> prometheus::Result<()> {
        let expect = self.inner.desc.variable_labels.len();
        if vals.len() != expect {
            return Err(prometheus::Error::InconsistentCardinality {
                expect,
                got: vals.len(),
            });
        }
        Ok(())
    }

    /// Return the child for `vals`, creating it on first use.
    pub fn get_metric_with_label_values(&self, vals: &[&str]) -> prometheus::Result<Summary> {
        self.check_cardinality(vals)?;
        let key: Vec<String> = vals.iter().map(|s| s.to_string()).collect();

        // Fast path: read lock
        if let Some(child) = self.inner.children.read().get(&key) {
            return Ok(child.clone());
        }

        let mut children = self.inner.children.write();
        let child = children.entry(key).or_insert_with_key(|key| {
            let mut label_pairs = const_label_pairs(&self.inner.desc);
            for (name, value) in self.inner.desc.variable_labels.iter().zip(key) {
                let mut pair = LabelPair::default();
                pair.set_name(name.clone());
                pair.set_value(value.clone());
                label_pairs.push(pair);
            }
            Summary::from_parts(self.inner.desc.clone(), &self.inner.opts, label_pairs)
        });
        Ok(child.clone())
    }

    /// Delete the child for `vals`.
    pub fn remove_label_values(&self, vals: &[&str]) -> prometheus::Result<()> {
        self.check_cardinality(vals)?;
        let key: Vec<String> = vals.iter().map(|s| s.to_string()).collect();
        match self.inner.children.write().remove(&key) {
            Some(_) => Ok(()),
            None => Err(prometheus::Error::Msg(format!(
                "missing label values {vals:?}"
            ))),
        }
    }

    fn collect_at(&self, now: Instant) -> MetricFamily {
        let mut family = MetricFamily::default();
        family.set_name(self.inner.desc.fq_name.clone());
        family.set_help(self.inner.desc.help.clone());
        family.set_field_type(MetricType::SUMMARY);
        for child in self.inner.children.read().values() {
            family.mut_metric().push(child.core.metric(now));
        }
        family
    }
}

impl Collector for SummaryVec {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.inner.desc]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        vec![self.collect_at(Instant::now())]
    }
}

impl fmt::Debug for SummaryVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SummaryVec")
            .field("name", &self.inner.desc.fq_name)
            .field("labels", &self.inner.desc.variable_labels)
            .field("children", &self.inner.children.read().len())
            .finish()
    }
}

fn const_label_pairs(desc: &Desc) -> Vec<LabelPair> {
    desc.const_label_pairs.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Registry;

    fn objectives() -> Objectives {
        Objectives::new(&[0.5, 0.9, 0.99], &[0.05, 0.01, 0.001]).unwrap()
    }

    #[test]
    fn test_objectives_validation() {
        assert!(matches!(
            Objectives::new(&[], &[]),
            Err(BridgeError::InvalidObjectives(_))
        ));
        assert!(matches!(
            Objectives::new(&[0.5, 0.9], &[0.05]),
            Err(BridgeError::InvalidObjectives(_))
        ));
        assert!(Objectives::new(&[1.5], &[0.01]).is_err());
        assert!(Objectives::new(&[f64::NAN], &[0.01]).is_err());
        assert!(Objectives::new(&[0.5], &[-0.1]).is_err());
    }

    #[test]
    fn test_objectives_sorted_and_deduplicated() {
        let obj = Objectives::new(&[0.9, 0.5, 0.9], &[0.01, 0.05, 0.02]).unwrap();
        assert_eq!(obj.len(), 2);
        assert_eq!(obj.targets()[0].quantile, 0.5);
        assert_eq!(obj.targets()[1].quantile, 0.9);
        assert_eq!(obj.targets()[1].epsilon, 0.02);
    }

    #[test]
    fn test_opts_zero_keeps_defaults() {
        let opts = SummaryOpts::new("s", "help", objectives())
            .max_age(Duration::ZERO)
            .age_buckets(0)
            .buf_cap(0);
        assert_eq!(opts.max_age, DEFAULT_MAX_AGE);
        assert_eq!(opts.age_buckets, DEFAULT_AGE_BUCKETS);
        assert_eq!(opts.buf_cap, DEFAULT_BUF_CAP);
    }

    #[test]
    fn test_summary_observe_and_collect() {
        let summary = Summary::with_opts(SummaryOpts::new(
            "request_seconds",
            "Request latency",
            objectives(),
        ))
        .unwrap();

        for v in 1..=100 {
            summary.observe(v as f64);
        }
        assert_eq!(summary.get_sample_count(), 100);
        assert_eq!(summary.get_sample_sum(), 5050.0);

        let families = summary.collect();
        assert_eq!(families.len(), 1);
        let family = &families[0];
        assert_eq!(family.get_name(), "request_seconds");
        assert_eq!(family.get_field_type(), MetricType::SUMMARY);

        let proto = family.get_metric()[0].get_summary();
        assert_eq!(proto.get_sample_count(), 100);
        let quantiles = proto.get_quantile();
        assert_eq!(quantiles.len(), 3);
        assert_eq!(quantiles[0].get_quantile(), 0.5);
        assert_eq!(quantiles[0].get_value(), 50.0);
    }

    #[test]
    fn test_empty_summary_reports_nan() {
        let summary = Summary::with_opts(SummaryOpts::new("idle", "Idle", objectives())).unwrap();
        let families = summary.collect();
        let proto = families[0].get_metric()[0].get_summary();
        assert!(proto.get_quantile()[0].get_value().is_nan());
        assert_eq!(proto.get_sample_count(), 0);
    }

    #[test]
    fn test_quantiles_expire_after_max_age() {
        let opts = SummaryOpts::new("aging", "Aging", objectives())
            .max_age(Duration::from_secs(10))
            .age_buckets(5);
        let summary = Summary::with_opts(opts).unwrap();
        let start = Instant::now();

        summary.observe_at(1.0, start);
        let fresh = summary.collect_at(start + Duration::from_secs(1));
        let value = fresh.get_metric()[0].get_summary().get_quantile()[0].get_value();
        assert_eq!(value, 1.0);

        // After a full window the head stream has been reset
        let stale = summary.collect_at(start + Duration::from_secs(11));
        let proto = stale.get_metric()[0].get_summary();
        assert!(proto.get_quantile()[0].get_value().is_nan());
        // Count and sum stay cumulative
        assert_eq!(proto.get_sample_count(), 1);
    }

    #[test]
    fn test_rotation_keeps_recent_observations() {
        let opts = SummaryOpts::new("rotating", "Rotating", objectives())
            .max_age(Duration::from_secs(10))
            .age_buckets(5);
        let summary = Summary::with_opts(opts).unwrap();
        let start = Instant::now();

        summary.observe_at(100.0, start);
        summary.observe_at(1.0, start + Duration::from_secs(7));

        // At t=9 the head is the one stream never reset, holding both values
        let family = summary.collect_at(start + Duration::from_secs(9));
        let median = family.get_metric()[0].get_summary().get_quantile()[0].get_value();
        assert_eq!(median, 1.0);
    }

    #[test]
    fn test_summary_vec_children() {
        let vec = SummaryVec::new(
            SummaryOpts::new("rpc_seconds", "RPC latency", objectives()),
            &["method", "code"],
        )
        .unwrap();

        let a = vec.get_metric_with_label_values(&["get", "200"]).unwrap();
        let b = vec.get_metric_with_label_values(&["get", "200"]).unwrap();
        let c = vec.get_metric_with_label_values(&["put", "500"]).unwrap();
        assert!(a.same_series(&b));
        assert!(!a.same_series(&c));

        a.observe(1.0);
        b.observe(2.0);
        assert_eq!(a.get_sample_count(), 2);
        assert_eq!(c.get_sample_count(), 0);

        let families = vec.collect();
        assert_eq!(families[0].get_metric().len(), 2);
    }

    #[test]
    fn test_summary_vec_cardinality() {
        let vec = SummaryVec::new(
            SummaryOpts::new("card", "Cardinality", objectives()),
            &["a", "b"],
        )
        .unwrap();

        assert!(matches!(
            vec.get_metric_with_label_values(&["only-one"]),
            Err(prometheus::Error::InconsistentCardinality { expect: 2, got: 1 })
        ));
        assert!(vec.get_metric_with_label_values(&["1", "2", "3"]).is_err());
    }

    #[test]
    fn test_summary_vec_remove() {
        let vec = SummaryVec::new(
            SummaryOpts::new("removal", "Removal", objectives()),
            &["k"],
        )
        .unwrap();

        let old = vec.get_metric_with_label_values(&["v"]).unwrap();
        old.observe(5.0);
        vec.remove_label_values(&["v"]).unwrap();
        assert!(vec.remove_label_values(&["v"]).is_err());

        let new = vec.get_metric_with_label_values(&["v"]).unwrap();
        assert!(!old.same_series(&new));
        assert_eq!(new.get_sample_count(), 0);
    }

    #[test]
    fn test_age_buckets_are_capped() {
        let opts = SummaryOpts::new("capped", "Capped", objectives());
        let opts = opts.age_buckets(u32::MAX);
        assert!(matches!(
            Summary::with_opts(opts.clone()),
            Err(BridgeError::InvalidArgument(_))
        ));
        assert!(matches!(
            SummaryVec::new(opts, &["route"]),
            Err(BridgeError::InvalidArgument(_))
        ));

        let opts = SummaryOpts::new("capped", "Capped", objectives());
        assert!(Summary::with_opts(opts.age_buckets(MAX_AGE_BUCKETS)).is_ok());
    }

    #[test]
    fn test_quantile_label_is_reserved() {
        let result = SummaryVec::new(
            SummaryOpts::new("reserved", "Reserved", objectives()),
            &["quantile"],
        );
        assert!(matches!(result, Err(BridgeError::InvalidArgument(_))));
    }

    #[test]
    fn test_registry_exposition() {
        let registry = Registry::new();
        let vec = SummaryVec::new(
            SummaryOpts::new("exposed_seconds", "Exposed", objectives()).namespace("app"),
            &["route"],
        )
        .unwrap();
        registry.register(Box::new(vec.clone())).unwrap();

        vec.get_metric_with_label_values(&["/home"])
            .unwrap()
            .observe(0.25);

        let families = registry.gather();
        let family = families
            .iter()
            .find(|f| f.get_name() == "app_exposed_seconds")
            .expect("summary family should be gathered");
        let labels = family.get_metric()[0].get_label();
        assert_eq!(labels[0].get_name(), "route");
        assert_eq!(labels[0].get_value(), "/home");
    }
}
