//! Integration tests driving the C ABI against the process-wide bridge.
//!
//! Every test in this binary shares one lazily built bridge, so each test
//! uses its own metric names and none of them shuts the bridge down.

use std::ffi::CString;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::raw::c_char;
use std::ptr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use prom_bridge::ffi::*;
use prom_bridge::{current_bridge, Handle, INVALID_HANDLE};
use prometheus::{Encoder, TextEncoder};

fn cstr(s: &str) -> CString {
    CString::new(s).unwrap()
}

/// Owned C strings plus the pointer array a C caller would pass.
struct CStrArray {
    _owned: Vec<CString>,
    ptrs: Vec<*const c_char>,
}

impl CStrArray {
    fn new(items: &[&str]) -> Self {
        let owned: Vec<CString> = items.iter().map(|s| cstr(s)).collect();
        let ptrs = owned.iter().map(|s| s.as_ptr()).collect();
        Self {
            _owned: owned,
            ptrs,
        }
    }

    fn as_ptr(&self) -> *const *const c_char {
        self.ptrs.as_ptr()
    }

    fn len(&self) -> usize {
        self.ptrs.len()
    }
}

fn exposition_text() -> String {
    let bridge = current_bridge().unwrap();
    let mut buf = Vec::new();
    TextEncoder::new()
        .encode(&bridge.registry().gather(), &mut buf)
        .unwrap();
    String::from_utf8(buf).unwrap()
}

fn gauge_value(handle: u64) -> f64 {
    current_bridge()
        .unwrap()
        .gauge(Handle::from_raw(handle))
        .unwrap()
        .get()
}

fn counter_value(handle: u64) -> f64 {
    current_bridge()
        .unwrap()
        .counter(Handle::from_raw(handle))
        .unwrap()
        .get()
}

unsafe fn new_counter_vec(name: &str, labels: &[&str]) -> u64 {
    let labels = CStrArray::new(labels);
    prom_counter_vec_new(
        cstr(name).as_ptr(),
        cstr("test vector").as_ptr(),
        labels.as_ptr(),
        labels.len(),
    )
}

unsafe fn counter_child(vec: u64, values: &[&str]) -> u64 {
    let values = CStrArray::new(values);
    prom_counter_with_label_values(vec, values.as_ptr(), values.len())
}

#[test]
fn test_gauge_create_and_mutate() {
    unsafe {
        let gauge = prom_gauge_new(cstr("ffi_gauge").as_ptr(), cstr("A gauge").as_ptr());
        assert_ne!(gauge, INVALID_HANDLE);

        prom_gauge_set(gauge, 10.0);
        prom_gauge_add(gauge, 2.5);
        prom_gauge_sub(gauge, 0.5);
        assert_eq!(gauge_value(gauge), 12.0);
    }
}

#[test]
fn test_same_labels_share_series() {
    unsafe {
        let vec = new_counter_vec("ffi_shared_total", &["method", "code"]);
        assert_ne!(vec, INVALID_HANDLE);

        let h1 = counter_child(vec, &["GET", "200"]);
        let h2 = counter_child(vec, &["GET", "200"]);
        assert_ne!(h1, INVALID_HANDLE);
        assert_eq!(h1, h2);

        prom_counter_add(h1, 5.0);
        prom_counter_add(h2, 3.0);
        assert_eq!(counter_value(h1), 8.0);
        assert!(exposition_text().contains("ffi_shared_total{code=\"200\",method=\"GET\"} 8"));
    }
}

#[test]
fn test_wrong_arity_returns_zero() {
    unsafe {
        let vec = new_counter_vec("ffi_arity_total", &["a", "b"]);
        assert_eq!(counter_child(vec, &["only"]), INVALID_HANDLE);
        assert_eq!(counter_child(vec, &["x", "y", "z"]), INVALID_HANDLE);
        assert_ne!(counter_child(vec, &["x", "y"]), INVALID_HANDLE);
    }
}

#[test]
fn test_delete_then_mutate_is_noop() {
    unsafe {
        let labels = CStrArray::new(&["queue"]);
        let vec = prom_gauge_vec_new(
            cstr("ffi_queue_depth").as_ptr(),
            cstr("Queue depth").as_ptr(),
            labels.as_ptr(),
            labels.len(),
        );
        let values = CStrArray::new(&["ingest"]);
        let child = prom_gauge_with_label_values(vec, values.as_ptr(), values.len());
        prom_gauge_set(child, 3.0);
        assert!(exposition_text().contains("ffi_queue_depth{queue=\"ingest\"} 3"));

        prom_gauge_delete_label_values(vec, values.as_ptr(), values.len());
        prom_gauge_set(child, 99.0);
        prom_gauge_add(child, 1.0);

        let text = exposition_text();
        assert!(!text.contains("ffi_queue_depth{queue=\"ingest\"}"), "{text}");
        assert!(current_bridge()
            .unwrap()
            .gauge(Handle::from_raw(child))
            .is_err());

        // Deleting twice, or through an unknown vector, is harmless
        prom_gauge_delete_label_values(vec, values.as_ptr(), values.len());
        prom_gauge_delete_label_values(INVALID_HANDLE, values.as_ptr(), values.len());

        // Re-deriving starts a fresh series under a fresh handle
        let again = prom_gauge_with_label_values(vec, values.as_ptr(), values.len());
        assert_ne!(again, INVALID_HANDLE);
        assert_ne!(again, child);
        assert_eq!(gauge_value(again), 0.0);
    }
}

#[test]
fn test_unknown_handles_are_noops() {
    unsafe {
        prom_gauge_set(INVALID_HANDLE, 1.0);
        prom_gauge_add(u64::MAX, 1.0);
        prom_counter_add(12345, 1.0);
        prom_summary_observe(INVALID_HANDLE, 1.0);

        assert_eq!(counter_child(INVALID_HANDLE, &["x"]), INVALID_HANDLE);

        // A gauge handle is not a counter handle
        let gauge = prom_gauge_new(cstr("ffi_kind_gauge").as_ptr(), cstr("Gauge").as_ptr());
        prom_counter_add(gauge, 1.0);
        assert_eq!(gauge_value(gauge), 0.0);
    }
}

#[test]
fn test_counter_ignores_negative_values() {
    unsafe {
        let counter =
            prom_counter_new(cstr("ffi_monotonic_total").as_ptr(), cstr("Counter").as_ptr());
        prom_counter_add(counter, 4.0);
        prom_counter_add(counter, -1.0);
        prom_counter_add(counter, f64::NAN);
        assert_eq!(counter_value(counter), 4.0);
    }
}

#[test]
fn test_summary_objectives() {
    unsafe {
        let name = cstr("ffi_latency_seconds");
        let help = cstr("Latency");
        let quantiles = [0.5, 0.9];
        let one_error = [0.05];

        let mismatched = prom_summary_new(
            name.as_ptr(),
            help.as_ptr(),
            quantiles.as_ptr(),
            quantiles.len(),
            one_error.as_ptr(),
            one_error.len(),
            0,
            0,
        );
        assert_eq!(mismatched, INVALID_HANDLE);

        let empty = prom_summary_new(
            name.as_ptr(),
            help.as_ptr(),
            ptr::null(),
            0,
            ptr::null(),
            0,
            0,
            0,
        );
        assert_eq!(empty, INVALID_HANDLE);

        let errors = [0.05, 0.01];
        let too_many_buckets = prom_summary_new(
            name.as_ptr(),
            help.as_ptr(),
            quantiles.as_ptr(),
            quantiles.len(),
            errors.as_ptr(),
            errors.len(),
            60,
            u32::MAX,
        );
        assert_eq!(too_many_buckets, INVALID_HANDLE);
        assert!(!exposition_text().contains("ffi_latency_seconds"));

        let summary = prom_summary_new(
            name.as_ptr(),
            help.as_ptr(),
            quantiles.as_ptr(),
            quantiles.len(),
            errors.as_ptr(),
            errors.len(),
            60,
            3,
        );
        assert_ne!(summary, INVALID_HANDLE);
        for v in 1..=10 {
            prom_summary_observe(summary, v as f64);
        }

        let text = exposition_text();
        assert!(text.contains("ffi_latency_seconds_count 10"), "{text}");
        assert!(text.contains("ffi_latency_seconds_sum 55"), "{text}");
        assert!(text.contains("ffi_latency_seconds{quantile=\"0.5\"}"), "{text}");
    }
}

#[test]
fn test_summary_vec() {
    unsafe {
        let quantiles = [0.99];
        let errors = [0.001];
        let labels = CStrArray::new(&["handler"]);
        let vec = prom_summary_vec_new(
            cstr("ffi_handler_seconds").as_ptr(),
            cstr("Handler latency").as_ptr(),
            quantiles.as_ptr(),
            1,
            errors.as_ptr(),
            1,
            0,
            0,
            labels.as_ptr(),
            labels.len(),
        );
        assert_ne!(vec, INVALID_HANDLE);

        let values = CStrArray::new(&["login"]);
        let child = prom_summary_with_label_values(vec, values.as_ptr(), values.len());
        prom_summary_observe(child, 0.5);
        prom_summary_observe(child, 1.5);
        assert!(exposition_text().contains("ffi_handler_seconds_count{handler=\"login\"} 2"));

        prom_summary_delete_label_values(vec, values.as_ptr(), values.len());
        prom_summary_observe(child, 3.0);
        assert!(!exposition_text().contains("ffi_handler_seconds_count{handler=\"login\"}"));
    }
}

#[test]
fn test_duplicate_and_invalid_names_return_zero() {
    unsafe {
        let help = cstr("Help");
        let first = prom_counter_new(cstr("ffi_dup_total").as_ptr(), help.as_ptr());
        assert_ne!(first, INVALID_HANDLE);
        assert_eq!(
            prom_counter_new(cstr("ffi_dup_total").as_ptr(), help.as_ptr()),
            INVALID_HANDLE
        );
        assert_eq!(
            prom_gauge_new(cstr("not a valid name").as_ptr(), help.as_ptr()),
            INVALID_HANDLE
        );
        assert_eq!(prom_gauge_new(ptr::null(), help.as_ptr()), INVALID_HANDLE);
    }
}

#[test]
fn test_caller_buffers_can_be_reused() {
    unsafe {
        let mut label = *b"region\0";
        let label_ptr = [label.as_ptr() as *const c_char];
        let vec = prom_gauge_vec_new(
            cstr("ffi_reused_buffer").as_ptr(),
            cstr("Reused buffer").as_ptr(),
            label_ptr.as_ptr(),
            1,
        );

        let mut value = *b"east\0";
        let value_ptr = [value.as_ptr() as *const c_char];
        let child = prom_gauge_with_label_values(vec, value_ptr.as_ptr(), 1);
        prom_gauge_set(child, 1.0);

        // Scribble over both buffers after the calls returned
        label[..6].copy_from_slice(b"XXXXXX");
        value[..4].copy_from_slice(b"YYYY");

        let text = exposition_text();
        assert!(text.contains("ffi_reused_buffer{region=\"east\"} 1"), "{text}");
    }
}

#[test]
fn test_concurrent_counter_creation() {
    let handles: Vec<u64> = (0..8)
        .map(|t| {
            thread::spawn(move || {
                (0..25)
                    .map(|i| unsafe {
                        prom_counter_new(
                            cstr(&format!("ffi_concurrent_{t}_{i}_total")).as_ptr(),
                            cstr("Concurrent").as_ptr(),
                        )
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .flat_map(|join| join.join().unwrap())
        .collect();

    assert_eq!(handles.len(), 200);
    assert!(handles.iter().all(|&h| h != INVALID_HANDLE));
    let mut unique = handles.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), handles.len());

    // Each handle reaches its own counter
    for (i, &h) in handles.iter().enumerate() {
        prom_counter_add(h, i as f64);
    }
    for (i, &h) in handles.iter().enumerate() {
        assert_eq!(counter_value(h), i as f64);
    }
}

#[test]
fn test_concurrent_derive_and_delete() {
    let vec = unsafe { new_counter_vec("ffi_churn_total", &["worker"]) };
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let deleter = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let values = CStrArray::new(&["w"]);
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                unsafe { prom_counter_delete_label_values(vec, values.as_ptr(), values.len()) };
            }
        })
    };

    for _ in 0..2000 {
        let child = unsafe { counter_child(vec, &["w"]) };
        assert_ne!(child, INVALID_HANDLE);
        prom_counter_add(child, 1.0);
    }

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    deleter.join().unwrap();
}

fn http_get(port: u16, path: &str) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    write!(
        stream,
        "GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"
    )
    .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    response
}

#[test]
fn test_exposition_over_http() {
    unsafe {
        let gauge = prom_gauge_new(cstr("ffi_served").as_ptr(), cstr("Served").as_ptr());
        prom_gauge_set(gauge, 42.0);

        let port =
            prom_start_exposition(cstr("127.0.0.1:0").as_ptr(), cstr("ffi-metrics").as_ptr());
        assert!(port > 0);

        let response = http_get(port as u16, "/ffi-metrics");
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.contains("text/plain"), "{response}");
        assert!(response.contains("ffi_served 42"), "{response}");

        // The port is taken now
        let addr = cstr(&format!("127.0.0.1:{port}"));
        assert_eq!(prom_start_exposition(addr.as_ptr(), ptr::null()), -1);
        assert_eq!(prom_start_exposition(ptr::null(), ptr::null()), -1);
        let any_port = cstr("127.0.0.1:0");
        let wildcard = cstr("/*");
        assert_eq!(prom_start_exposition(any_port.as_ptr(), wildcard.as_ptr()), -1);

        // Null path falls back to the configured default
        let default_port = prom_start_exposition(cstr("127.0.0.1:0").as_ptr(), ptr::null());
        assert!(default_port > 0);
        let response = http_get(default_port as u16, "/metrics");
        assert!(response.contains("ffi_served 42"), "{response}");
    }
}
