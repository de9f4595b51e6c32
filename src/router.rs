//! The boundary façade: the four entry points everything else crosses
//! through. On each crossing the router decides between a direct
//! pass-through, reusing an original handle (round trip), or manufacturing
//! a proxy or stub through the per-interface caches.

use std::os::raw::c_void;
use std::ptr::null_mut;
use std::sync::Arc;

use tracing::trace;

use crate::abi::{hresults, ComInterface, IBase, IBaseTrait, Iid};
use crate::error::InteropError;
use crate::proxy::ComPtr;
use crate::stub::CcwBox;

/// Wraps a raw native interface pointer as a managed proxy. Null pointers
/// come back as null handles. With `already_retained` the caller's
/// reference-count unit transfers to the proxy; otherwise the proxy takes
/// its own.
///
/// # Safety
///
/// `ptr` must be null or point at a live call table of `T`'s shape, and an
/// `already_retained` unit must actually be owned by the caller.
pub unsafe fn rcw_from_ptr<T: ComInterface>(ptr: *mut T, already_retained: bool) -> ComPtr<T> {
    ComPtr::from_raw(ptr, already_retained)
}

/// Produces a native call-table pointer for a managed object.
///
/// A `None` object becomes a null handle. An object that is itself a proxy
/// (round trip) hands back its original native pointer with one fresh
/// retain: no new stub exists, which is what keeps proxy/stub chains from
/// growing across repeated crossings. Everything else gets a stub instance
/// over the interface's cached thunk table.
pub fn ccw_for_object<T: ComInterface>(object: Option<&Arc<T::Trait>>) -> ComPtr<T> {
    let Some(object) = object else {
        return ComPtr::null();
    };
    if let Some(handle) = object.native_handle() {
        trace!(
            interface = T::interface_name(),
            "round trip: reusing original native pointer"
        );
        return unsafe { ComPtr::from_raw(handle.as_ptr() as *mut T, false) };
    }
    CcwBox::<T>::create(Arc::clone(object))
}

/// Asks `obj` for interface `U`.
///
/// When `T`'s own hierarchy already satisfies `U`, the same call table is
/// returned directly with one retain and no boundary crossing. Otherwise a
/// native `query_interface` call is issued; its failure surfaces as
/// [`InteropError::NoInterface`] exactly when the object reported
/// `E_NOINTERFACE`, and as the untranslated code otherwise.
pub fn query_interface<U, T>(obj: &ComPtr<T>) -> Result<ComPtr<U>, InteropError>
where
    U: ComInterface,
    T: ComInterface,
{
    let raw = obj.as_raw();
    if raw.is_null() {
        return Err(InteropError::Native(hresults::E_POINTER));
    }

    if T::scan_iid(&U::iid()) {
        trace!(
            from = T::interface_name(),
            to = U::interface_name(),
            "query satisfied in-process"
        );
        return Ok(unsafe { ComPtr::from_raw(raw as *mut U, false) });
    }

    let iid: Iid = U::iid();
    let mut out: *mut c_void = null_mut();
    let hr = unsafe { (*(raw as *mut IBase)).query_interface(&iid, &mut out) };
    if hr == hresults::E_NOINTERFACE {
        return Err(InteropError::NoInterface(iid));
    }
    hr.into_result()?;
    Ok(unsafe { ComPtr::from_raw(out as *mut U, true) })
}

/// Capability-probing variant of [`query_interface`]: converts exactly the
/// `NoInterface` condition into `Ok(None)`. Any other failure propagates
/// untouched; the success path is identical.
pub fn query_interface_or_null<U, T>(obj: &ComPtr<T>) -> Result<Option<ComPtr<U>>, InteropError>
where
    U: ComInterface,
    T: ComInterface,
{
    match query_interface::<U, T>(obj) {
        Ok(found) => Ok(Some(found)),
        Err(InteropError::NoInterface(_)) => Ok(None),
        Err(other) => Err(other),
    }
}
