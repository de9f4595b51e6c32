//! The owned string buffer that crosses the boundary.
//!
//! Neither side may assume the other's string representation, so strings
//! travel as an explicit, length-prefixed allocation. The header embeds a
//! destructor slot: whichever module allocated the buffer frees it, through
//! its own allocator, no matter which side drops the last reference to it.
//! The byte length is authoritative; a zero byte is appended for the
//! benefit of C viewers but never consulted.

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::ops::{Deref, DerefMut};
use std::{fmt, ptr, slice, str};

#[allow(missing_debug_implementations)]
#[repr(C)]
pub struct BStrVtbl {
    pub destruct: unsafe extern "C" fn(*mut BStr),
}

#[derive(Debug)]
#[repr(C)]
pub struct BStrHeader {
    pub vtable: *const BStrVtbl,
    pub length: usize,
}

/// A length-prefixed byte buffer, allocated on one side of the boundary and
/// freed through its embedded destructor.
#[repr(C)]
pub struct BStr {
    header: BStrHeader,
    data: [u8; 0],
}

unsafe extern "C" fn destruct_local(this: *mut BStr) {
    let len = (*this).header.length;
    dealloc(this as *mut u8, BStr::layout_for(len));
}

static LOCAL_VTBL: BStrVtbl = BStrVtbl {
    destruct: destruct_local,
};

impl BStr {
    fn layout_for(len: usize) -> Layout {
        // Trailing zero byte for C viewers.
        Layout::from_size_align(
            std::mem::size_of::<BStrHeader>() + len + 1,
            std::mem::align_of::<BStrHeader>(),
        )
        .expect("string buffer layout")
    }

    /// Allocates a buffer of `len` bytes without initializing the contents.
    ///
    /// # Safety
    ///
    /// The caller must fill all `len` bytes before reading them.
    pub unsafe fn alloc_uninitialized(len: usize) -> *mut BStr {
        assert!(len <= (i32::MAX / 2) as usize, "string buffer too large");

        let layout = Self::layout_for(len);
        let raw = alloc(layout) as *mut BStr;
        if raw.is_null() {
            handle_alloc_error(layout);
        }

        (*raw).header = BStrHeader {
            vtable: &LOCAL_VTBL,
            length: len,
        };
        *(*raw).data.as_mut_ptr().add(len) = 0;
        raw
    }

    /// Allocates a buffer holding a copy of `bytes`.
    pub fn alloc_bytes(bytes: &[u8]) -> *mut BStr {
        unsafe {
            let raw = Self::alloc_uninitialized(bytes.len());
            (*raw).data_mut().copy_from_slice(bytes);
            raw
        }
    }

    /// Allocates a buffer holding a copy of `s`.
    pub fn alloc(s: &str) -> *mut BStr {
        Self::alloc_bytes(s.as_bytes())
    }

    /// Length in bytes. Embedded zero bytes count.
    pub fn len(&self) -> usize {
        self.header.length
    }

    pub fn is_empty(&self) -> bool {
        self.header.length == 0
    }

    pub fn data(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.data.as_ptr(), self.len()) }
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.data.as_mut_ptr(), self.len()) }
    }

    /// The contents as UTF-8, if they are UTF-8.
    pub fn to_str(&self) -> Result<&str, str::Utf8Error> {
        str::from_utf8(self.data())
    }

    /// Frees a buffer through its embedded destructor.
    ///
    /// # Safety
    ///
    /// `raw` must be a live buffer pointer; it is dead afterwards.
    pub unsafe fn free_raw(raw: *mut BStr) {
        if !raw.is_null() {
            (((*(*raw).header.vtable).destruct))(raw)
        }
    }
}

/// An owning handle to a `BStr` allocation. May be null; dropping a non-null
/// handle frees the buffer through its destructor slot.
#[repr(transparent)]
pub struct BStrRef(*mut BStr);

unsafe impl Send for BStrRef {}
unsafe impl Sync for BStrRef {}

impl BStrRef {
    pub fn new(s: &str) -> BStrRef {
        BStrRef(BStr::alloc(s))
    }

    pub fn from_bytes(bytes: &[u8]) -> BStrRef {
        BStrRef(BStr::alloc_bytes(bytes))
    }

    pub fn null() -> BStrRef {
        BStrRef(ptr::null_mut())
    }

    /// Takes ownership of a raw buffer pointer.
    ///
    /// # Safety
    ///
    /// `raw` must be null or a live buffer owned by no one else.
    pub unsafe fn from_raw(raw: *mut BStr) -> BStrRef {
        BStrRef(raw)
    }

    /// Releases ownership, returning the raw buffer pointer.
    pub fn into_raw(self) -> *mut BStr {
        let raw = self.0;
        std::mem::forget(self);
        raw
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

impl Deref for BStrRef {
    type Target = BStr;

    fn deref(&self) -> &BStr {
        assert!(!self.is_null(), "null string buffer");
        unsafe { &*self.0 }
    }
}

impl DerefMut for BStrRef {
    fn deref_mut(&mut self) -> &mut BStr {
        assert!(!self.is_null(), "null string buffer");
        unsafe { &mut *self.0 }
    }
}

impl Drop for BStrRef {
    fn drop(&mut self) {
        unsafe { BStr::free_raw(self.0) }
    }
}

impl fmt::Debug for BStrRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "BStrRef(null)")
        } else {
            write!(f, "BStrRef({:?})", String::from_utf8_lossy(self.data()))
        }
    }
}

impl fmt::Display for BStrRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "{}", String::from_utf8_lossy(self.data()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_read_back() {
        let s = BStrRef::new("ladybugs awake");
        assert_eq!(s.to_str().unwrap(), "ladybugs awake");
        assert_eq!(s.len(), 14);
    }

    #[test]
    fn length_is_bytes_not_chars() {
        let s = BStrRef::new("śnieg");
        assert_eq!(s.len(), "śnieg".len());
        assert_eq!(s.to_str().unwrap(), "śnieg");
    }

    #[test]
    fn embedded_zero_bytes_survive() {
        let bytes = b"ab\0cd\0";
        let s = BStrRef::from_bytes(bytes);
        assert_eq!(s.len(), 6);
        assert_eq!(s.data(), bytes);
    }

    #[test]
    fn empty_buffer() {
        let s = BStrRef::new("");
        assert!(s.is_empty());
        assert_eq!(s.data(), b"");
    }

    #[test]
    fn null_handle_is_droppable() {
        let s = BStrRef::null();
        assert!(s.is_null());
    }
}
