//! Error types for prom-bridge.

use thiserror::Error;

use crate::handle::InstrumentKind;

/// Errors that can occur when building or using a bridge.
///
/// None of these cross the C ABI: the `ffi` layer logs them and converts them
/// to the sentinel handle `0`, a no-op, or a `-1` status.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Quantile and error lists could not be turned into summary objectives.
    #[error("invalid summary objectives: {0}")]
    InvalidObjectives(String),

    /// A caller-supplied argument was unusable (null name, reserved label, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Handle is unknown to the table of the given kind (never issued, deleted,
    /// or minted by another kind or an earlier bridge).
    #[error("unknown {kind} handle {handle:#018x}")]
    UnknownHandle { kind: InstrumentKind, handle: u64 },

    /// The per-table sequence ran out of values.
    #[error("{0} handle space exhausted")]
    HandleSpaceExhausted(InstrumentKind),

    /// Error reported by the metrics library (bad name, label cardinality,
    /// duplicate registration).
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Error extracting configuration from figment.
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Exposition path is empty or malformed.
    #[error("invalid exposition path {0:?}")]
    InvalidPath(String),

    /// Exposition listener could not bind.
    #[error("failed to bind exposition listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Error building the background tokio runtime.
    #[error("failed to build exposition runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
