//! C exports for the injector
//!
//! The injector loads the cdylib, resolves these symbols and drives the
//! attach lifecycle through them. Errors are reported through a caller
//! supplied buffer; panics never cross the boundary.

use std::ffi::{c_char, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::attach;

/// Copy an error message into a caller-supplied buffer, NUL-terminated
unsafe fn write_error(buf: *mut c_char, buf_len: usize, message: &str) {
    if buf.is_null() || buf_len == 0 {
        return;
    }
    let bytes = message.as_bytes();
    let n = bytes.len().min(buf_len - 1);
    std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf as *mut u8, n);
    *buf.add(n) = 0;
}

/// Attach to the host process
///
/// `build` is the host build string the injector determined, e.g.
/// "1.21.3.01". On failure, a message is written to `error` (if non-null)
/// and `false` is returned; the host is left unmodified.
///
/// # Safety
/// `build` must be a valid NUL-terminated string; `error`, when non-null,
/// must point at `error_len` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn shale_attach(
    build: *const c_char,
    error: *mut c_char,
    error_len: usize,
) -> bool {
    if build.is_null() {
        write_error(error, error_len, "build string is null");
        return false;
    }
    let build = match CStr::from_ptr(build).to_str() {
        Ok(s) => s,
        Err(_) => {
            write_error(error, error_len, "build string is not UTF-8");
            return false;
        }
    };

    match catch_unwind(AssertUnwindSafe(|| attach::attach(build))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            write_error(error, error_len, &e.to_string());
            false
        }
        Err(_) => {
            write_error(error, error_len, "panic during attach");
            false
        }
    }
}

/// Detach from the host process, restoring all patched entry points
#[no_mangle]
pub extern "C" fn shale_detach() -> bool {
    match catch_unwind(attach::detach) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::error!("Detach failed: {}", e);
            false
        }
        Err(_) => {
            tracing::error!("Panic during detach");
            false
        }
    }
}

/// Runtime version string, static NUL-terminated
#[no_mangle]
pub extern "C" fn shale_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_build_is_rejected() {
        let mut buf = [0 as c_char; 64];
        let ok = unsafe { shale_attach(std::ptr::null(), buf.as_mut_ptr(), buf.len()) };
        assert!(!ok);

        let message = unsafe { CStr::from_ptr(buf.as_ptr()) }.to_str().unwrap();
        assert_eq!(message, "build string is null");
    }

    #[test]
    fn test_error_message_is_truncated_to_buffer() {
        let mut buf = [0 as c_char; 8];
        let ok = unsafe { shale_attach(std::ptr::null(), buf.as_mut_ptr(), buf.len()) };
        assert!(!ok);

        let message = unsafe { CStr::from_ptr(buf.as_ptr()) }.to_str().unwrap();
        assert_eq!(message.len(), 7);
    }

    #[test]
    fn test_version_is_nul_terminated() {
        let version = unsafe { CStr::from_ptr(shale_version()) }.to_str().unwrap();
        assert_eq!(version, env!("CARGO_PKG_VERSION"));
    }
}
