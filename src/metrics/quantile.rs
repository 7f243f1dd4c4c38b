//! Targeted-quantile stream.
//!
//! Implements the biased-quantile algorithm of Cormode, Korn, Muthukrishnan and
//! Srivastava ("Effective Computation of Biased Quantiles over Data Streams")
//! restricted to a fixed set of targets. The stream keeps a compressed list of
//! samples whose size is bounded by the requested rank errors, not by the
//! number of observations.
//!
//! Observations are buffered and merged in sorted batches of `buf_cap`. Until
//! the first merge, queries answer from the sorted buffer directly, which is
//! exact for small data sets.

/// A quantile to track and the rank error allowed when reporting it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Target {
    pub quantile: f64,
    pub epsilon: f64,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    value: f64,
    width: f64,
    delta: f64,
}

/// Compressed stream answering quantile queries for a fixed set of targets.
#[derive(Debug, Clone)]
pub struct QuantileStream {
    targets: Vec<Target>,
    samples: Vec<Sample>,
    buffer: Vec<f64>,
    buf_cap: usize,
    n: f64,
    sorted: bool,
}

impl QuantileStream {
    pub fn new(targets: Vec<Target>, buf_cap: usize) -> Self {
        let buf_cap = buf_cap.max(1);
        Self {
            targets,
            samples: Vec::new(),
            buffer: Vec::new(),
            buf_cap,
            n: 0.0,
            sorted: true,
        }
    }

    /// Add one observation.
    pub fn insert(&mut self, value: f64) {
        self.buffer.push(value);
        self.sorted = false;
        if self.buffer.len() >= self.buf_cap {
            self.flush();
        }
    }

    /// Number of observations seen since creation or the last reset.
    pub fn count(&self) -> u64 {
        self.n as u64 + self.buffer.len() as u64
    }

    /// Estimate the value at quantile `q`. Returns `0.0` on an empty stream.
    pub fn query(&mut self, q: f64) -> f64 {
        if self.samples.is_empty() {
            // Not merged yet: answer exactly from the buffer
            let len = self.buffer.len();
            if len == 0 {
                return 0.0;
            }
            let mut i = (len as f64 * q).ceil() as usize;
            i = i.saturating_sub(1).min(len - 1);
            self.sort_buffer();
            return self.buffer[i];
        }

        self.flush();
        let mut t = (q * self.n).ceil();
        t += (self.invariant(t) / 2.0).ceil();

        let mut prev = self.samples[0];
        let mut rank = 0.0;
        for cur in &self.samples[1..] {
            rank += prev.width;
            if rank + cur.width + cur.delta > t {
                return prev.value;
            }
            prev = *cur;
        }
        prev.value
    }

    /// Drop every observation.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.buffer.clear();
        self.n = 0.0;
        self.sorted = true;
    }

    fn sort_buffer(&mut self) {
        if !self.sorted {
            self.buffer.sort_by(|a, b| a.total_cmp(b));
            self.sorted = true;
        }
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        self.sort_buffer();
        let batch = std::mem::take(&mut self.buffer);
        self.merge(&batch);
        self.buffer = batch;
        self.buffer.clear();
    }

    /// Allowed `width + delta` at rank `r` for the tightest target.
    fn invariant(&self, r: f64) -> f64 {
        let mut m = f64::MAX;
        for t in &self.targets {
            let f = if t.quantile * self.n <= r {
                (2.0 * t.epsilon * r) / t.quantile
            } else {
                (2.0 * t.epsilon * (self.n - r)) / (1.0 - t.quantile)
            };
            if f < m {
                m = f;
            }
        }
        m
    }

    fn merge(&mut self, sorted: &[f64]) {
        let mut rank = 0.0;
        let mut i = 0;
        for &value in sorted {
            let mut inserted = false;
            while i < self.samples.len() {
                let cur = self.samples[i];
                if cur.value > value {
                    let delta = (self.invariant(rank).floor() - 1.0).max(0.0);
                    self.samples.insert(
                        i,
                        Sample {
                            value,
                            width: 1.0,
                            delta,
                        },
                    );
                    i += 1;
                    inserted = true;
                    break;
                }
                rank += cur.width;
                i += 1;
            }
            if !inserted {
                self.samples.push(Sample {
                    value,
                    width: 1.0,
                    delta: 0.0,
                });
                i += 1;
            }
            self.n += 1.0;
            rank += 1.0;
        }
        self.compress();
    }

    fn compress(&mut self) {
        if self.samples.len() < 2 {
            return;
        }
        let mut xi = self.samples.len() - 1;
        let mut x = self.samples[xi];
        let mut rank = self.n - 1.0 - x.width;

        let mut i = xi;
        while i > 0 {
            i -= 1;
            let cur = self.samples[i];
            if cur.width + x.width + x.delta <= self.invariant(rank) {
                x.width += cur.width;
                self.samples[xi] = x;
                self.samples.remove(i);
                xi -= 1;
            } else {
                x = cur;
                xi = i;
            }
            rank -= cur.width;
        }
    }
}
