//! Process-wide bridge used by the C ABI.
//!
//! Foreign callers cannot hold a Rust object, so the exported functions reach
//! one shared [`Bridge`] held here. It is installed explicitly by
//! `prom_bridge_init`, or built with defaults (plus `PROM_BRIDGE_*` from the
//! environment) on first use. `prom_bridge_shutdown` takes it out again; calls
//! that were already running keep their `Arc` until they return.
//!
//! Rust code embedding the crate should build its own [`Bridge`] instead.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::bridge::Bridge;
use crate::builder::BridgeBuilder;
use crate::error::Result;

/// Environment prefix read by the process-wide bridge.
pub const ENV_PREFIX: &str = "PROM_BRIDGE";

static CURRENT_BRIDGE: RwLock<Option<Arc<Bridge>>> = parking_lot::const_rwlock(None);

/// Get the process-wide bridge, building a default one if none is installed.
pub fn current_bridge() -> Result<Arc<Bridge>> {
    if let Some(bridge) = CURRENT_BRIDGE.read().as_ref() {
        return Ok(Arc::clone(bridge));
    }

    let mut current = CURRENT_BRIDGE.write();
    if let Some(bridge) = current.as_ref() {
        return Ok(Arc::clone(bridge));
    }

    let bridge = Arc::new(BridgeBuilder::new().env_prefix(ENV_PREFIX).build()?);
    *current = Some(Arc::clone(&bridge));
    Ok(bridge)
}

/// Get the process-wide bridge without building one.
pub fn try_current_bridge() -> Option<Arc<Bridge>> {
    CURRENT_BRIDGE.read().clone()
}

/// Install `bridge` as the process-wide bridge, returning the previous one.
///
/// Handles minted by the previous bridge stop resolving immediately.
pub fn install_bridge(bridge: Bridge) -> Option<Arc<Bridge>> {
    let generation = bridge.generation();
    let previous = CURRENT_BRIDGE.write().replace(Arc::new(bridge));
    info!(generation, replaced = previous.is_some(), "process bridge installed");
    previous
}

/// Remove the process-wide bridge.
///
/// The bridge, its tables and its exposition runtime are dropped once the last
/// in-flight call releases it.
pub fn take_bridge() -> Option<Arc<Bridge>> {
    let previous = CURRENT_BRIDGE.write().take();
    if let Some(ref bridge) = previous {
        info!(generation = bridge.generation(), "process bridge removed");
    }
    previous
}
