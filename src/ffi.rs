//! C ABI.
//!
//! Every exported function copies its arguments through [`crate::sanitize`],
//! runs against the process-wide bridge from [`crate::context`], and converts
//! the outcome into a plain value: a handle (`0` when nothing was produced), a
//! bool or port status, or nothing at all for mutations. Panics are caught at
//! this boundary and mapped to the same sentinels.
//!
//! Lookups of unknown, deleted or stale handles are soft misses and are logged
//! at debug level only. Every other failure is logged as a warning.
//!
//! The matching declarations live in `include/prom_bridge.h`.

use std::panic::{catch_unwind, UnwindSafe};

use libc::{c_char, c_int};
use tracing::{debug, error, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::builder::BridgeBuilder;
use crate::context::{current_bridge, install_bridge, take_bridge, ENV_PREFIX};
use crate::error::{BridgeError, Result};
use crate::handle::{Handle, INVALID_HANDLE};
use crate::sanitize::{copy_f64_array, copy_str, copy_str_array};

/// Run one exported call, absorbing errors and panics into `fallback`.
fn boundary<T, F>(op: &'static str, fallback: T, f: F) -> T
where
    F: FnOnce() -> Result<T> + UnwindSafe,
{
    match catch_unwind(f) {
        Ok(Ok(value)) => value,
        Ok(Err(e @ BridgeError::UnknownHandle { .. })) => {
            debug!(op, %e, "ignored");
            fallback
        }
        Ok(Err(e)) => {
            warn!(op, %e, "call failed");
            fallback
        }
        Err(_) => {
            error!(op, "panic caught at the C boundary");
            fallback
        }
    }
}

unsafe fn required_str(ptr: *const c_char, what: &str) -> Result<String> {
    // SAFETY: forwarded from the exported function's contract.
    unsafe { copy_str(ptr) }.ok_or_else(|| BridgeError::InvalidArgument(format!("{what} is null")))
}

unsafe fn required_strs(ptr: *const *const c_char, len: usize, what: &str) -> Result<Vec<String>> {
    // SAFETY: forwarded from the exported function's contract.
    unsafe { copy_str_array(ptr, len) }.ok_or_else(|| {
        BridgeError::InvalidArgument(format!("{what} array is null or holds a null entry"))
    })
}

unsafe fn required_f64s(ptr: *const f64, len: usize, what: &str) -> Result<Vec<f64>> {
    // SAFETY: forwarded from the exported function's contract.
    unsafe { copy_f64_array(ptr, len) }
        .ok_or_else(|| BridgeError::InvalidArgument(format!("{what} array is null")))
}

fn init_logging(filter: Option<&str>) {
    let filter = match filter {
        Some(directive) => EnvFilter::try_new(directive).unwrap_or_else(|_| "warn".into()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
    };
    // The host process may already have a subscriber
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

// Lifecycle

/// Build the process-wide bridge from defaults, an optional config file and
/// `PROM_BRIDGE_*` environment variables, replacing any existing one.
///
/// Installs a log subscriber using the configured `log_filter` (or
/// `RUST_LOG`) unless the process already has one. Handles minted before the
/// call stop resolving. Returns false if the configuration is invalid.
///
/// # Safety
///
/// `config_path` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn prom_bridge_init(config_path: *const c_char) -> bool {
    boundary("prom_bridge_init", false, || {
        let mut builder = BridgeBuilder::new();
        if !config_path.is_null() {
            // SAFETY: non-null and NUL-terminated per this function's contract.
            let path = unsafe { required_str(config_path, "config path") }?;
            builder = builder.file(path);
        }
        let builder = builder.env_prefix(ENV_PREFIX);

        let config = builder.config()?;
        init_logging(config.log_filter.as_deref());
        install_bridge(builder.build()?);
        Ok(true)
    })
}

/// Drop the process-wide bridge, its handles and its exposition listeners.
///
/// The next call builds a fresh default bridge.
#[no_mangle]
pub extern "C" fn prom_bridge_shutdown() {
    boundary("prom_bridge_shutdown", (), || {
        take_bridge();
        Ok(())
    })
}

// Exposition

/// Serve the registry at `path` on `addr` (`"host:port"` or `":port"`).
///
/// A null or empty `path` uses the configured default. Returns the bound port,
/// or -1 if the listener could not be started.
///
/// # Safety
///
/// `addr` must be a valid NUL-terminated string; `path` must be null or one.
#[no_mangle]
pub unsafe extern "C" fn prom_start_exposition(addr: *const c_char, path: *const c_char) -> c_int {
    boundary("prom_start_exposition", -1, || {
        // SAFETY: valid strings per this function's contract.
        let addr = unsafe { required_str(addr, "address") }?;
        let path = unsafe { copy_str(path) }.unwrap_or_default();
        let bound = current_bridge()?.start_exposition(&addr, &path)?;
        Ok(c_int::from(bound.port()))
    })
}

// Gauges

/// Create a gauge. Returns its handle, or 0 on failure.
///
/// # Safety
///
/// `name` and `help` must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn prom_gauge_new(name: *const c_char, help: *const c_char) -> u64 {
    boundary("prom_gauge_new", INVALID_HANDLE, || {
        // SAFETY: valid strings per this function's contract.
        let name = unsafe { required_str(name, "name") }?;
        let help = unsafe { required_str(help, "help") }?;
        current_bridge()?.new_gauge(&name, &help).map(Handle::raw)
    })
}

/// Create a gauge vector with `nlabels` label names. Returns its handle, or 0
/// on failure.
///
/// # Safety
///
/// `name` and `help` must be valid NUL-terminated strings; `labels` must point
/// to `nlabels` of them (or be null when `nlabels` is 0).
#[no_mangle]
pub unsafe extern "C" fn prom_gauge_vec_new(
    name: *const c_char,
    help: *const c_char,
    labels: *const *const c_char,
    nlabels: usize,
) -> u64 {
    boundary("prom_gauge_vec_new", INVALID_HANDLE, || {
        // SAFETY: valid arguments per this function's contract.
        let name = unsafe { required_str(name, "name") }?;
        let help = unsafe { required_str(help, "help") }?;
        let labels = unsafe { required_strs(labels, nlabels, "label name") }?;
        current_bridge()?
            .new_gauge_vec(&name, &help, labels)
            .map(Handle::raw)
    })
}

/// Return the gauge of `vec` for the given label values, creating it on first
/// use. Repeated calls with the same values return the same handle while the
/// child is live. Returns 0 for an unknown vector or a wrong number of values.
///
/// # Safety
///
/// `values` must point to `nvalues` valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn prom_gauge_with_label_values(
    vec: u64,
    values: *const *const c_char,
    nvalues: usize,
) -> u64 {
    boundary("prom_gauge_with_label_values", INVALID_HANDLE, || {
        // SAFETY: valid arguments per this function's contract.
        let values = unsafe { required_strs(values, nvalues, "label value") }?;
        current_bridge()?
            .gauge_with_label_values(Handle::from_raw(vec), &values)
            .map(Handle::raw)
    })
}

/// Delete the gauge of `vec` for the given label values. Its handle stops
/// resolving. No-op if there is no such vector or series.
///
/// # Safety
///
/// `values` must point to `nvalues` valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn prom_gauge_delete_label_values(
    vec: u64,
    values: *const *const c_char,
    nvalues: usize,
) {
    boundary("prom_gauge_delete_label_values", (), || {
        // SAFETY: valid arguments per this function's contract.
        let values = unsafe { required_strs(values, nvalues, "label value") }?;
        current_bridge()?.gauge_delete_label_values(Handle::from_raw(vec), &values)?;
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn prom_gauge_set(gauge: u64, value: f64) {
    boundary("prom_gauge_set", (), || {
        current_bridge()?.gauge_set(Handle::from_raw(gauge), value)
    })
}

#[no_mangle]
pub extern "C" fn prom_gauge_add(gauge: u64, value: f64) {
    boundary("prom_gauge_add", (), || {
        current_bridge()?.gauge_add(Handle::from_raw(gauge), value)
    })
}

#[no_mangle]
pub extern "C" fn prom_gauge_sub(gauge: u64, value: f64) {
    boundary("prom_gauge_sub", (), || {
        current_bridge()?.gauge_sub(Handle::from_raw(gauge), value)
    })
}

// Counters

/// Create a counter. Returns its handle, or 0 on failure.
///
/// # Safety
///
/// `name` and `help` must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn prom_counter_new(name: *const c_char, help: *const c_char) -> u64 {
    boundary("prom_counter_new", INVALID_HANDLE, || {
        // SAFETY: valid strings per this function's contract.
        let name = unsafe { required_str(name, "name") }?;
        let help = unsafe { required_str(help, "help") }?;
        current_bridge()?.new_counter(&name, &help).map(Handle::raw)
    })
}

/// Create a counter vector. See [`prom_gauge_vec_new`].
///
/// # Safety
///
/// Same as [`prom_gauge_vec_new`].
#[no_mangle]
pub unsafe extern "C" fn prom_counter_vec_new(
    name: *const c_char,
    help: *const c_char,
    labels: *const *const c_char,
    nlabels: usize,
) -> u64 {
    boundary("prom_counter_vec_new", INVALID_HANDLE, || {
        // SAFETY: valid arguments per this function's contract.
        let name = unsafe { required_str(name, "name") }?;
        let help = unsafe { required_str(help, "help") }?;
        let labels = unsafe { required_strs(labels, nlabels, "label name") }?;
        current_bridge()?
            .new_counter_vec(&name, &help, labels)
            .map(Handle::raw)
    })
}

/// See [`prom_gauge_with_label_values`].
///
/// # Safety
///
/// `values` must point to `nvalues` valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn prom_counter_with_label_values(
    vec: u64,
    values: *const *const c_char,
    nvalues: usize,
) -> u64 {
    boundary("prom_counter_with_label_values", INVALID_HANDLE, || {
        // SAFETY: valid arguments per this function's contract.
        let values = unsafe { required_strs(values, nvalues, "label value") }?;
        current_bridge()?
            .counter_with_label_values(Handle::from_raw(vec), &values)
            .map(Handle::raw)
    })
}

/// See [`prom_gauge_delete_label_values`].
///
/// # Safety
///
/// `values` must point to `nvalues` valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn prom_counter_delete_label_values(
    vec: u64,
    values: *const *const c_char,
    nvalues: usize,
) {
    boundary("prom_counter_delete_label_values", (), || {
        // SAFETY: valid arguments per this function's contract.
        let values = unsafe { required_strs(values, nvalues, "label value") }?;
        current_bridge()?.counter_delete_label_values(Handle::from_raw(vec), &values)?;
        Ok(())
    })
}

/// Add `value` to a counter. Negative and NaN values are ignored.
#[no_mangle]
pub extern "C" fn prom_counter_add(counter: u64, value: f64) {
    boundary("prom_counter_add", (), || {
        current_bridge()?.counter_add(Handle::from_raw(counter), value)
    })
}

// Summaries

/// Create a summary with objectives pairing `quantiles[i]` with `errors[i]`.
///
/// Zero `max_age_secs` or `age_buckets` select the configured defaults.
/// Returns 0 if the lists are empty, differ in length or hold values outside
/// `[0, 1]`.
///
/// # Safety
///
/// `name` and `help` must be valid NUL-terminated strings; `quantiles` and
/// `errors` must point to `nquantiles` and `nerrors` doubles.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn prom_summary_new(
    name: *const c_char,
    help: *const c_char,
    quantiles: *const f64,
    nquantiles: usize,
    errors: *const f64,
    nerrors: usize,
    max_age_secs: u32,
    age_buckets: u32,
) -> u64 {
    boundary("prom_summary_new", INVALID_HANDLE, || {
        // SAFETY: valid arguments per this function's contract.
        let name = unsafe { required_str(name, "name") }?;
        let help = unsafe { required_str(help, "help") }?;
        let quantiles = unsafe { required_f64s(quantiles, nquantiles, "quantile") }?;
        let errors = unsafe { required_f64s(errors, nerrors, "error") }?;
        current_bridge()?
            .new_summary(&name, &help, &quantiles, &errors, max_age_secs, age_buckets)
            .map(Handle::raw)
    })
}

/// Create a summary vector. See [`prom_summary_new`].
///
/// # Safety
///
/// Same as [`prom_summary_new`], plus `labels` must point to `nlabels` valid
/// NUL-terminated strings.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn prom_summary_vec_new(
    name: *const c_char,
    help: *const c_char,
    quantiles: *const f64,
    nquantiles: usize,
    errors: *const f64,
    nerrors: usize,
    max_age_secs: u32,
    age_buckets: u32,
    labels: *const *const c_char,
    nlabels: usize,
) -> u64 {
    boundary("prom_summary_vec_new", INVALID_HANDLE, || {
        // SAFETY: valid arguments per this function's contract.
        let name = unsafe { required_str(name, "name") }?;
        let help = unsafe { required_str(help, "help") }?;
        let quantiles = unsafe { required_f64s(quantiles, nquantiles, "quantile") }?;
        let errors = unsafe { required_f64s(errors, nerrors, "error") }?;
        let labels = unsafe { required_strs(labels, nlabels, "label name") }?;
        current_bridge()?
            .new_summary_vec(
                &name,
                &help,
                &quantiles,
                &errors,
                max_age_secs,
                age_buckets,
                labels,
            )
            .map(Handle::raw)
    })
}

/// See [`prom_gauge_with_label_values`].
///
/// # Safety
///
/// `values` must point to `nvalues` valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn prom_summary_with_label_values(
    vec: u64,
    values: *const *const c_char,
    nvalues: usize,
) -> u64 {
    boundary("prom_summary_with_label_values", INVALID_HANDLE, || {
        // SAFETY: valid arguments per this function's contract.
        let values = unsafe { required_strs(values, nvalues, "label value") }?;
        current_bridge()?
            .summary_with_label_values(Handle::from_raw(vec), &values)
            .map(Handle::raw)
    })
}

/// See [`prom_gauge_delete_label_values`].
///
/// # Safety
///
/// `values` must point to `nvalues` valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn prom_summary_delete_label_values(
    vec: u64,
    values: *const *const c_char,
    nvalues: usize,
) {
    boundary("prom_summary_delete_label_values", (), || {
        // SAFETY: valid arguments per this function's contract.
        let values = unsafe { required_strs(values, nvalues, "label value") }?;
        current_bridge()?.summary_delete_label_values(Handle::from_raw(vec), &values)?;
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn prom_summary_observe(summary: u64, value: f64) {
    boundary("prom_summary_observe", (), || {
        current_bridge()?.summary_observe(Handle::from_raw(summary), value)
    })
}
