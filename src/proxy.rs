//! The managed-side handle to a native call table.
//!
//! A [`ComPtr`] owns exactly one reference-count unit on the object behind
//! it: one retain at construction (unless the caller's retain is being
//! transferred in), one release at disposal. Two handles to the same native
//! object never share a unit. Disposal and finalization funnel through a
//! single atomic swap, so the release happens exactly once even when they
//! race.
//!
//! The per-interface forwarding methods that make a proxy callable are
//! emitted by `com_interface!`; this module only supplies the ownership
//! machinery they sit on.

use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::os::raw::c_void;
use std::ptr::{null_mut, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::abi::{hresults, ComInterface, Extends, HResult, IBase, IBaseTrait, Iid};

/// An owning, nullable handle to a native interface pointer.
#[repr(transparent)]
pub struct ComPtr<T: ComInterface> {
    ptr: AtomicPtr<T>,
}

// The wrapped call table is free-threaded by contract.
unsafe impl<T: ComInterface> Send for ComPtr<T> {}
unsafe impl<T: ComInterface> Sync for ComPtr<T> {}

impl<T: ComInterface> ComPtr<T> {
    pub fn null() -> Self {
        Self {
            ptr: AtomicPtr::new(null_mut()),
        }
    }

    /// Wraps a raw interface pointer. With `already_retained` the caller's
    /// reference-count unit is transferred in; otherwise one is taken here.
    ///
    /// # Safety
    ///
    /// `raw` must be null or point at a live call table of `T`'s shape, and
    /// when `already_retained` is set the caller must actually own the unit
    /// being transferred.
    pub unsafe fn from_raw(raw: *mut T, already_retained: bool) -> Self {
        if raw.is_null() {
            return Self::null();
        }
        if !already_retained {
            (*(raw as *mut IBase)).retain();
        }
        Self {
            ptr: AtomicPtr::new(raw),
        }
    }

    pub fn is_null(&self) -> bool {
        self.as_raw().is_null()
    }

    pub fn as_raw(&self) -> *mut T {
        self.ptr.load(Ordering::Acquire)
    }

    /// Releases ownership without touching the reference count.
    pub fn into_raw(self) -> *mut T {
        let raw = self.ptr.swap(null_mut(), Ordering::AcqRel);
        std::mem::forget(self);
        raw
    }

    /// Gives back this handle's reference-count unit and nulls the handle.
    /// Idempotent: a second disposal, or the drop that follows, is a no-op.
    pub fn dispose(&self) {
        let raw = self.ptr.swap(null_mut(), Ordering::AcqRel);
        if !raw.is_null() {
            unsafe {
                (*(raw as *mut IBase)).release();
            }
        }
    }

    pub fn as_interface(&self) -> Option<&T> {
        unsafe { self.as_raw().as_ref() }
    }

    /// Reinterprets this handle as an ancestor interface. Costs one retain;
    /// the call table is shared.
    pub fn upcast<B>(&self) -> ComPtr<B>
    where
        B: ComInterface,
        T: Extends<B>,
    {
        unsafe { ComPtr::from_raw(self.as_raw() as *mut B, false) }
    }

    /// Asks the object behind this handle for interface `U`. See
    /// [`crate::router::query_interface`].
    pub fn query<U: ComInterface>(&self) -> Result<ComPtr<U>, crate::InteropError> {
        crate::router::query_interface::<U, T>(self)
    }

    /// Capability-probing variant: `Ok(None)` exactly when the object does
    /// not support `U`. See [`crate::router::query_interface_or_null`].
    pub fn query_or_null<U: ComInterface>(
        &self,
    ) -> Result<Option<ComPtr<U>>, crate::InteropError> {
        crate::router::query_interface_or_null::<U, T>(self)
    }
}

impl<T: ComInterface> Deref for ComPtr<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.as_interface()
            .expect("method called through a null interface pointer")
    }
}

impl<T: ComInterface> Clone for ComPtr<T> {
    fn clone(&self) -> Self {
        unsafe { Self::from_raw(self.as_raw(), false) }
    }
}

impl<T: ComInterface> Drop for ComPtr<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<T: ComInterface> Default for ComPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ComInterface> fmt::Debug for ComPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:p})", T::interface_name(), self.as_raw())
    }
}

/// The proxy viewed as a managed object: the base contract forwards straight
/// through the wrapped call table, and the native handle is exposed so the
/// boundary router can short-circuit round trips.
impl<T: ComInterface> IBaseTrait for ComPtr<T> {
    fn query_interface(&self, iid: &Iid, out: *mut *mut c_void) -> HResult {
        match self.as_interface() {
            Some(iface) => unsafe {
                (*(iface as *const T as *const IBase)).query_interface(iid, out)
            },
            None => hresults::E_POINTER,
        }
    }

    fn retain(&self) -> u32 {
        match self.as_interface() {
            Some(iface) => unsafe { (*(iface as *const T as *const IBase)).retain() },
            None => 0,
        }
    }

    unsafe fn release(&self) -> u32 {
        match self.as_interface() {
            Some(iface) => (*(iface as *const T as *const IBase)).release(),
            None => 0,
        }
    }

    fn native_handle(&self) -> Option<NonNull<IBase>> {
        NonNull::new(self.as_raw() as *mut IBase)
    }
}

/// A borrowed, non-owning interface argument: no reference-count traffic on
/// the way across. The callee retains if it stores the pointer.
#[repr(transparent)]
pub struct ComRef<'a, T: ComInterface> {
    ptr: *mut T,
    _marker: PhantomData<&'a T>,
}

impl<'a, T: ComInterface> ComRef<'a, T> {
    pub fn null() -> Self {
        Self {
            ptr: null_mut(),
            _marker: PhantomData,
        }
    }

    pub fn from_com_ptr(owner: &'a ComPtr<T>) -> Self {
        Self {
            ptr: owner.as_raw(),
            _marker: PhantomData,
        }
    }

    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    pub fn as_raw(&self) -> *mut T {
        self.ptr
    }

    pub fn as_interface(&self) -> Option<&T> {
        unsafe { self.ptr.as_ref() }
    }

    /// Promotes the borrow to an owning handle, taking a fresh unit.
    pub fn to_owned(&self) -> ComPtr<T> {
        unsafe { ComPtr::from_raw(self.ptr, false) }
    }
}

impl<'a, T: ComInterface> Clone for ComRef<'a, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, T: ComInterface> Copy for ComRef<'a, T> {}

impl<'a, T: ComInterface> Deref for ComRef<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.as_interface()
            .expect("method called through a null interface reference")
    }
}

impl<'a, T: ComInterface> fmt::Debug for ComRef<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:p})", T::interface_name(), self.as_raw())
    }
}
