//! ABI mirrors of host C++ standard library types
//!
//! The host passes `const std::string&` arguments to several intercepted
//! entry points. To read those arguments, and to hand back a rewritten
//! message, we mirror the libstdc++ `basic_string` layout: a data pointer,
//! a length, and a 16-byte union of the SSO buffer and allocated capacity.
//!
//! The host's Linux build links libstdc++, so this is the only layout we
//! model. Reads use only the pointer and length; strings we construct for
//! the host always point at our own heap storage, never at the inline
//! buffer, so the mirror can be moved freely.

use std::ffi::c_char;
use std::str::Utf8Error;

/// Raw mirror of libstdc++ `std::string` (x86_64)
///
/// Read-only view over a string owned by the host. Never construct one of
/// these directly for passing to the host - use [`StdStringBuf`], which
/// keeps the backing bytes alive.
#[repr(C)]
pub struct StdString {
    ptr: *const c_char,
    len: usize,
    // Union of the 16-byte SSO buffer and the allocated capacity.
    buf: [u8; 16],
}

impl StdString {
    /// View the string bytes
    ///
    /// # Safety
    /// `self` must mirror a live, initialized host `std::string`.
    pub unsafe fn as_bytes(&self) -> &[u8] {
        if self.ptr.is_null() {
            return &[];
        }
        std::slice::from_raw_parts(self.ptr as *const u8, self.len)
    }

    /// View the string as UTF-8
    ///
    /// # Safety
    /// Same requirements as [`StdString::as_bytes`].
    pub unsafe fn to_str(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(self.as_bytes())
    }

    /// Lossy UTF-8 copy of the string
    ///
    /// # Safety
    /// Same requirements as [`StdString::as_bytes`].
    pub unsafe fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// An owned `std::string` mirror built from Rust data
///
/// Backing bytes live on our heap (NUL-terminated, as libstdc++ guarantees)
/// and stay valid for the lifetime of the buffer. The host only receives a
/// pointer to the mirror for the duration of a call, so the caller keeps
/// the `StdStringBuf` alive across the original invocation.
pub struct StdStringBuf {
    repr: StdString,
    _storage: Box<[u8]>,
}

impl StdStringBuf {
    pub fn new(s: &str) -> Self {
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        let storage = bytes.into_boxed_slice();

        let mut buf = [0u8; 16];
        // _M_allocated_capacity; copy constructors on the host side only
        // read the pointer and length, but keep this coherent anyway.
        buf[..8].copy_from_slice(&(s.len() as u64).to_ne_bytes());

        Self {
            repr: StdString {
                ptr: storage.as_ptr() as *const c_char,
                len: s.len(),
                buf,
            },
            _storage: storage,
        }
    }

    /// Pointer suitable for a `const std::string&` argument slot
    pub fn as_raw(&self) -> *const StdString {
        &self.repr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_std_string_layout() {
        // pointer + length + 16-byte union
        assert_eq!(std::mem::size_of::<StdString>(), 32);
    }

    #[test]
    fn test_buf_round_trip() {
        let buf = StdStringBuf::new("banned");
        let view = unsafe { &*buf.as_raw() };
        assert_eq!(unsafe { view.to_str() }.unwrap(), "banned");
        assert_eq!(view.len(), 6);
    }

    #[test]
    fn test_buf_is_nul_terminated() {
        let buf = StdStringBuf::new("bye");
        let view = unsafe { &*buf.as_raw() };
        let bytes = unsafe { std::slice::from_raw_parts(view.ptr as *const u8, 4) };
        assert_eq!(bytes, b"bye\0");
    }

    #[test]
    fn test_buf_survives_move() {
        let buf = StdStringBuf::new("a much longer string that cannot fit inline");
        let moved = buf;
        let view = unsafe { &*moved.as_raw() };
        assert_eq!(
            unsafe { view.to_str() }.unwrap(),
            "a much longer string that cannot fit inline"
        );
    }

    #[test]
    fn test_empty_string() {
        let buf = StdStringBuf::new("");
        let view = unsafe { &*buf.as_raw() };
        assert!(view.is_empty());
        assert_eq!(unsafe { view.to_str() }.unwrap(), "");
    }
}
