//! The native-visible side of a managed object.
//!
//! A stub is a call table plus an opaque reference to the owning managed
//! object, with its own reference counter. The managed object stays rooted
//! (its `Arc` held) for as long as the counter is non-zero; the last release
//! drops the box and with it the rooting reference.
//!
//! Thunk tables are built lazily once per interface type (the stub half of
//! the process-wide code cache) and shared by every stub instance of that
//! interface; creating a stub only allocates the small box.

use std::os::raw::c_void;
use std::sync::atomic::{fence, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::trace;

use crate::abi::{hresults, ComInterface, HResult, IBaseTrait, Iid};
use crate::proxy::ComPtr;

static STUBS_CREATED: AtomicU64 = AtomicU64::new(0);
static STUBS_DESTROYED: AtomicU64 = AtomicU64::new(0);

/// Stubs created since process start. Diagnostic; monotonically increasing.
pub fn stubs_created() -> u64 {
    STUBS_CREATED.load(Ordering::Relaxed)
}

/// Stubs currently alive. Diagnostic.
pub fn live_stubs() -> u64 {
    STUBS_CREATED.load(Ordering::Relaxed) - STUBS_DESTROYED.load(Ordering::Relaxed)
}

/// A heap-allocated stub instance: interface slot first (so the slot pointer
/// and the box pointer coincide), then the counter, then the rooted object.
#[repr(C)]
pub struct CcwBox<T: ComInterface> {
    iface: T,
    strong: AtomicUsize,
    object: Arc<T::Trait>,
}

impl<T: ComInterface> CcwBox<T> {
    /// Wraps `object` in a fresh stub and returns the owning handle to its
    /// call table. The handle holds the stub's initial reference-count unit.
    pub fn create(object: Arc<T::Trait>) -> ComPtr<T> {
        let boxed = Box::new(CcwBox {
            iface: T::from_vtable(T::ccw_vtable()),
            strong: AtomicUsize::new(1),
            object,
        });
        STUBS_CREATED.fetch_add(1, Ordering::Relaxed);
        trace!(interface = T::interface_name(), "created call-table stub");
        let raw = Box::into_raw(boxed) as *mut T;
        unsafe { ComPtr::from_raw(raw, true) }
    }

    /// The managed object this stub forwards into.
    pub fn target(&self) -> &T::Trait {
        &self.object
    }
}

impl<T: ComInterface> IBaseTrait for CcwBox<T> {
    fn query_interface(&self, iid: &Iid, out: *mut *mut c_void) -> HResult {
        if out.is_null() {
            return hresults::E_POINTER;
        }
        if T::scan_iid(iid) {
            self.retain();
            unsafe { *out = self as *const Self as *mut c_void };
            hresults::E_OK
        } else {
            unsafe { *out = std::ptr::null_mut() };
            hresults::E_NOINTERFACE
        }
    }

    fn retain(&self) -> u32 {
        let prev = self.strong.fetch_add(1, Ordering::Relaxed);
        if prev == usize::MAX {
            panic!("reference count overflow");
        }
        (prev + 1) as u32
    }

    unsafe fn release(&self) -> u32 {
        let prev = self.strong.fetch_sub(1, Ordering::Release);
        if prev == 0 {
            if cfg!(debug_assertions) {
                panic!("release without a matching retain");
            }
            tracing::warn!(
                interface = T::interface_name(),
                "stub reference count underflow ignored"
            );
            self.strong.store(0, Ordering::Relaxed);
            return 0;
        }
        if prev == 1 {
            fence(Ordering::Acquire);
            STUBS_DESTROYED.fetch_add(1, Ordering::Relaxed);
            trace!(interface = T::interface_name(), "destroyed call-table stub");
            drop(Box::from_raw(self as *const Self as *mut Self));
            return 0;
        }
        (prev - 1) as u32
    }
}
