//! Copies of caller-owned arguments.
//!
//! Every pointer received through the C ABI refers to memory the caller may
//! free or rewrite as soon as the call returns. The functions here turn such
//! arguments into owned Rust values with no reference left into the caller's
//! buffers. Nothing borrowed from the caller is stored past the call.
//!
//! Empty inputs produce `String::new()` / `Vec::new()`, neither of which
//! allocates.

use std::ffi::CStr;

use libc::c_char;

/// Copy a NUL-terminated string.
///
/// Returns `None` for a null pointer. Invalid UTF-8 is replaced with U+FFFD.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated buffer that stays valid and
/// unmodified for the duration of this call.
pub unsafe fn copy_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: just checked that `ptr` is not null; the caller guarantees termination.
    let bytes = unsafe { CStr::from_ptr(ptr) }.to_bytes();
    Some(owned_str(bytes))
}

/// Copy an array of `len` NUL-terminated strings.
///
/// A null array with `len == 0` is the empty sequence. Returns `None` when the
/// array is null but `len` is not zero, or when any element is null.
///
/// # Safety
///
/// `ptr` must be null or point to `len` readable pointers, each of which must
/// satisfy the contract of [`copy_str`].
pub unsafe fn copy_str_array(ptr: *const *const c_char, len: usize) -> Option<Vec<String>> {
    if len == 0 {
        return Some(Vec::new());
    }
    if ptr.is_null() {
        return None;
    }
    // SAFETY: non-null and the caller guarantees `len` readable elements.
    let items = unsafe { std::slice::from_raw_parts(ptr, len) };
    items
        .iter()
        // SAFETY: each element is covered by the caller's contract.
        .map(|&item| unsafe { copy_str(item) })
        .collect()
}

/// Copy an array of `len` doubles.
///
/// # Safety
///
/// `ptr` must be null or point to `len` readable `f64` values.
pub unsafe fn copy_f64_array(ptr: *const f64, len: usize) -> Option<Vec<f64>> {
    if len == 0 {
        return Some(Vec::new());
    }
    if ptr.is_null() {
        return None;
    }
    // SAFETY: non-null and the caller guarantees `len` readable elements.
    Some(unsafe { std::slice::from_raw_parts(ptr, len) }.to_vec())
}

/// Copy raw bytes into a fresh `String`.
pub fn owned_str(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::ptr;

    #[test]
    fn test_copy_str_survives_buffer_mutation() {
        let mut buf = b"label-val-1\0".to_vec();
        let copy = unsafe { copy_str(buf.as_ptr() as *const c_char) }.unwrap();

        assert_eq!(copy.as_bytes(), &buf[..buf.len() - 1]);
        assert_ne!(copy.as_ptr(), buf.as_ptr());

        buf.fill(b'X');
        assert_eq!(copy, "label-val-1");
    }

    #[test]
    fn test_copy_str_empty_and_null() {
        let empty = CString::new("").unwrap();
        let copy = unsafe { copy_str(empty.as_ptr()) }.unwrap();
        assert!(copy.is_empty());
        assert_eq!(copy.capacity(), 0);

        assert!(unsafe { copy_str(ptr::null()) }.is_none());
    }

    #[test]
    fn test_copy_str_lossy_utf8() {
        let raw = [b'a', 0xff, b'b', 0];
        let copy = unsafe { copy_str(raw.as_ptr() as *const c_char) }.unwrap();
        assert_eq!(copy, "a\u{fffd}b");
    }

    #[test]
    fn test_copy_str_array() {
        let owned: Vec<CString> = ["label1", "label2", ""]
            .iter()
            .map(|s| CString::new(*s).unwrap())
            .collect();
        let ptrs: Vec<*const c_char> = owned.iter().map(|s| s.as_ptr()).collect();

        let copy = unsafe { copy_str_array(ptrs.as_ptr(), ptrs.len()) }.unwrap();
        drop(owned);
        assert_eq!(copy, vec!["label1", "label2", ""]);
    }

    #[test]
    fn test_copy_str_array_edge_cases() {
        let empty = unsafe { copy_str_array(ptr::null(), 0) }.unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.capacity(), 0);

        assert!(unsafe { copy_str_array(ptr::null(), 2) }.is_none());

        let one = CString::new("x").unwrap();
        let with_null = [one.as_ptr(), ptr::null()];
        assert!(unsafe { copy_str_array(with_null.as_ptr(), 2) }.is_none());
    }

    #[test]
    fn test_copy_f64_array() {
        let values = [0.5, 0.9, 0.99];
        let copy = unsafe { copy_f64_array(values.as_ptr(), values.len()) }.unwrap();
        assert_eq!(copy, values);

        assert!(unsafe { copy_f64_array(ptr::null(), 0) }.unwrap().is_empty());
        assert!(unsafe { copy_f64_array(ptr::null(), 1) }.is_none());
    }
}
