//! Builder pattern for constructing bridges.
//!
//! The builder supports multiple configuration sources using figment:
//! - Default values
//! - Config files (TOML, YAML, JSON)
//! - Environment variables
//! - Programmatic overrides
//! - CLI arguments via clap

use crate::bridge::Bridge;
use crate::config::{BridgeConfig, SummaryDefaults};
use crate::error::Result;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use prometheus::Registry;
use std::path::Path;

/// Builder for constructing a [`Bridge`].
///
/// Configuration sources are merged in the following order (later sources override earlier):
/// 1. Default values
/// 2. Config files (in order added)
/// 3. Environment variables
/// 4. Programmatic overrides
///
/// # Examples
///
/// ```ignore
/// use prom_bridge::BridgeBuilder;
///
/// let bridge = BridgeBuilder::new()
///     .file("prom-bridge.toml")
///     .env_prefix("PROM_BRIDGE")
///     .namespace("myapp")
///     .build()?;
/// ```
pub struct BridgeBuilder {
    figment: Figment,
    registry: Option<Registry>,
}

impl Default for BridgeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BridgeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeBuilder")
            .field("figment", &self.figment)
            .field("registry", &self.registry.as_ref().map(|_| "<Registry>"))
            .finish()
    }
}

impl BridgeBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            figment: Figment::from(Serialized::defaults(BridgeConfig::default())),
            registry: None,
        }
    }

    /// Add a configuration file.
    ///
    /// Supports TOML, YAML, and JSON formats (detected by extension).
    /// Files are merged in the order they are added. A missing file is skipped.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        self.figment = match extension.to_lowercase().as_str() {
            "toml" => self.figment.merge(Toml::file(path)),
            "yaml" | "yml" => self.figment.merge(Yaml::file(path)),
            "json" => self.figment.merge(Json::file(path)),
            _ => {
                // Default to TOML
                self.figment.merge(Toml::file(path))
            }
        };
        self
    }

    /// Add environment variables with a prefix.
    ///
    /// Environment variables are expected in the format `{PREFIX}_{KEY}`,
    /// e.g., `PROM_BRIDGE_NAMESPACE`, `PROM_BRIDGE_METRICS_PATH`. Nested
    /// summary defaults use a double underscore:
    /// `PROM_BRIDGE_SUMMARY__MAX_AGE_SECS`.
    pub fn env_prefix(mut self, prefix: &str) -> Self {
        let prefix = format!("{}_", prefix.trim_end_matches('_'));
        self.figment = self.figment.merge(Env::prefixed(&prefix).split("__"));
        self
    }

    /// Set the exposition thread name prefix.
    ///
    /// Thread names will be formatted as `{prefix}-expo-{NNNN}`.
    pub fn thread_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("thread_prefix", prefix.into()));
        self
    }

    /// Set the number of exposition worker threads.
    pub fn exposition_threads(mut self, n: usize) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("exposition_threads", n));
        self
    }

    /// Set the path used when exposition is started without one.
    pub fn metrics_path(mut self, path: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("metrics_path", path.into()));
        self
    }

    /// Prepend `namespace_` to every instrument name.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("namespace", namespace.into()));
        self
    }

    /// Set the log filter directive used by `prom_bridge_init`.
    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("log_filter", filter.into()));
        self
    }

    /// Register the bridge's own metrics on its registry.
    pub fn self_metrics(mut self, enabled: bool) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("self_metrics", enabled));
        self
    }

    /// Set the summary defaults applied when a caller passes zero.
    pub fn summary_defaults(mut self, defaults: SummaryDefaults) -> Self {
        self.figment = self.figment.merge(Serialized::default("summary", defaults));
        self
    }

    /// Provide an external Prometheus registry.
    ///
    /// Every instrument created through the bridge is registered here, and
    /// exposition serves this registry.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use prometheus::Registry;
    ///
    /// let registry = Registry::new();
    /// let bridge = BridgeBuilder::new()
    ///     .registry(registry.clone())
    ///     .build()?;
    /// ```
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Apply CLI argument overrides.
    ///
    /// This method applies any non-None values from the `BridgeArgs` struct.
    pub fn with_cli_args(mut self, args: &BridgeArgs) -> Self {
        if let Some(ref path) = args.bridge_config {
            self = self.file(path);
        }
        if let Some(ref prefix) = args.bridge_thread_prefix {
            self.figment = self
                .figment
                .merge(Serialized::default("thread_prefix", prefix.clone()));
        }
        if let Some(threads) = args.bridge_exposition_threads {
            self.figment = self
                .figment
                .merge(Serialized::default("exposition_threads", threads));
        }
        if let Some(ref path) = args.bridge_metrics_path {
            self.figment = self
                .figment
                .merge(Serialized::default("metrics_path", path.clone()));
        }
        if let Some(ref namespace) = args.bridge_namespace {
            self.figment = self
                .figment
                .merge(Serialized::default("namespace", namespace.clone()));
        }
        if let Some(ref filter) = args.bridge_log_filter {
            self.figment = self
                .figment
                .merge(Serialized::default("log_filter", filter.clone()));
        }
        self
    }

    /// Extract the merged configuration without building a bridge.
    pub fn config(&self) -> Result<BridgeConfig> {
        let mut config: BridgeConfig = self.figment.extract().map_err(Box::new)?;
        config.registry = self.registry.clone();
        Ok(config)
    }

    /// Build the bridge.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration extraction fails or the bridge's own
    /// metrics cannot be registered.
    pub fn build(self) -> Result<Bridge> {
        let config = self.config()?;
        Bridge::from_config(config)
    }
}

/// CLI arguments for bridge configuration.
///
/// Use with clap's `Parser` derive macro. These arguments can be applied
/// to a `BridgeBuilder` using `with_cli_args`.
///
/// # Examples
///
/// ```ignore
/// use clap::Parser;
/// use prom_bridge::{BridgeArgs, BridgeBuilder};
///
/// #[derive(Parser)]
/// struct MyArgs {
///     #[command(flatten)]
///     bridge: BridgeArgs,
/// }
///
/// let args = MyArgs::parse();
/// let bridge = BridgeBuilder::new()
///     .with_cli_args(&args.bridge)
///     .build()?;
/// ```
#[derive(Debug, Default, Clone, clap::Args)]
pub struct BridgeArgs {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long)]
    pub bridge_config: Option<String>,

    /// Exposition thread name prefix
    #[arg(long)]
    pub bridge_thread_prefix: Option<String>,

    /// Number of exposition worker threads
    #[arg(long)]
    pub bridge_exposition_threads: Option<usize>,

    /// Default exposition path
    #[arg(long)]
    pub bridge_metrics_path: Option<String>,

    /// Namespace prepended to instrument names
    #[arg(long)]
    pub bridge_namespace: Option<String>,

    /// Log filter directive (e.g. "prom_bridge=debug")
    #[arg(long)]
    pub bridge_log_filter: Option<String>,
}
