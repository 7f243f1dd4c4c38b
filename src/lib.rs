//! # prom-bridge
//!
//! **Prometheus instruments behind opaque handles**
//!
//! A C ABI over the `prometheus` crate. Native callers create gauges, counters
//! and summaries (and their labeled vectors), mutate them and serve them over
//! HTTP, holding nothing but `uint64_t` handles.
//!
//! ## Features
//!
//! - **Handle Tables**: One table per instrument kind; handles come from a
//!   table-owned counter and carry their kind and bridge generation
//! - **Canonical Children**: Deriving the same label values twice returns the
//!   same handle while the child is live; deleting it invalidates the handle
//! - **Soft Failures**: Unknown handles are no-ops, bad arguments yield handle
//!   `0`, and no panic crosses the boundary
//! - **Summaries**: Targeted quantiles over a sliding time window
//! - **Exposition**: Background HTTP listeners serving the text format, with
//!   bind failures reported to the caller
//! - **Flexible Configuration**: Configure via files (TOML/YAML/JSON), environment variables, or code
//! - **CLI Integration**: Built-in clap support for command-line overrides
//!
//! ## Quick Start (C)
//!
//! ```c
//! #include "prom_bridge.h"
//!
//! prom_bridge_init(NULL);
//! prom_start_exposition(":9100", "/metrics");
//!
//! const char *labels[] = {"code"};
//! uint64_t requests = prom_counter_vec_new("requests_total", "Requests", labels, 1);
//!
//! const char *ok[] = {"200"};
//! uint64_t requests_ok = prom_counter_with_label_values(requests, ok, 1);
//! prom_counter_add(requests_ok, 1.0);
//! ```
//!
//! ## Quick Start (Rust)
//!
//! ```ignore
//! use prom_bridge::BridgeBuilder;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bridge = BridgeBuilder::new().namespace("myapp").build()?;
//!     bridge.start_exposition("127.0.0.1:9100", "/metrics")?;
//!
//!     let latency = bridge.new_summary("latency_seconds", "Latency", &[0.5, 0.99], &[0.05, 0.001], 0, 0)?;
//!     bridge.summary_observe(latency, 0.042)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! Configuration sources are merged in order (later sources override earlier):
//!
//! 1. Default values
//! 2. Config files (via `.file()`)
//! 3. Environment variables (via `.env_prefix()`)
//! 4. Programmatic overrides
//! 5. CLI arguments (via `.with_cli_args()`)
//!
//! The process-wide bridge behind the C ABI reads `PROM_BRIDGE_*` variables,
//! plus the file passed to `prom_bridge_init`.
//!
//! ### Config File Example (TOML)
//!
//! ```toml
//! thread_prefix = "myapp"
//! exposition_threads = 1
//! metrics_path = "/metrics"
//! namespace = "myapp"
//! log_filter = "prom_bridge=debug"
//! self_metrics = true
//!
//! [summary]
//! max_age_secs = 600
//! age_buckets = 5
//! ```
//!
//! ### Environment Variables
//!
//! - `PROM_BRIDGE_NAMESPACE=myapp`
//! - `PROM_BRIDGE_METRICS_PATH=/prom`
//! - `PROM_BRIDGE_SELF_METRICS=true`
//! - `PROM_BRIDGE_SUMMARY__MAX_AGE_SECS=60`
//!
//! ## Thread Naming
//!
//! Exposition threads are named `{thread_prefix}-expo-0000`, `-0001`, ...

pub mod bridge;
pub mod builder;
pub mod config;
pub mod context;
pub mod error;
pub(crate) mod exposition;
pub(crate) mod family;
pub mod ffi;
pub mod handle;
pub mod metrics;
pub mod sanitize;

pub use bridge::Bridge;
pub use builder::{BridgeArgs, BridgeBuilder};
pub use config::{BridgeConfig, SummaryDefaults};
pub use context::current_bridge;
pub use error::{BridgeError, Result};
pub use handle::{Handle, InstrumentKind, INVALID_HANDLE};
pub use metrics::{BridgeMetrics, Objectives, Summary, SummaryOpts, SummaryVec};
