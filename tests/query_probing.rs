//! Capability probing semantics: `query_interface_or_null` converts exactly
//! the NoInterface condition, the in-process fast path never crosses the
//! boundary, and foreign failure codes propagate untranslated.

use std::os::raw::c_void;
use std::sync::atomic::{AtomicU32, Ordering};

use interop_rs::{
    com_iid, com_interface, hresults, ComPtr, HResult, IBase, IBaseTrait, IBaseVtbl, Iid,
    InteropError,
};

com_iid!(
    IID_IPROBE = [
        0x82c5_6d10,
        0x41f7,
        0x4aa3,
        [0x9d, 0x3c, 0x55, 0x08, 0xb2, 0x6e, 0x14, 0xf0]
    ]
);

com_interface! {
    interface (IProbe, IProbeTrait): (IBase, IBaseTrait) {
        iid: IID_IPROBE,
        vtable: IProbeVtbl,
    }
}

com_iid!(
    IID_IABSENT = [
        0x82c5_6d11,
        0x41f7,
        0x4aa3,
        [0x9d, 0x3c, 0x55, 0x08, 0xb2, 0x6e, 0x14, 0xf1]
    ]
);

com_interface! {
    interface (IAbsent, IAbsentTrait): (IBase, IBaseTrait) {
        iid: IID_IABSENT,
        vtable: IAbsentVtbl,
    }
}

/// A hand-rolled call table standing in for a foreign native object, with a
/// per-object count of how often its `query_interface` slot was entered.
#[repr(C)]
struct RawObject {
    vtable: *const IBaseVtbl,
    qi_calls: AtomicU32,
}

unsafe impl Sync for RawObject {}

impl RawObject {
    const fn new(vtable: &'static IBaseVtbl) -> Self {
        Self {
            vtable,
            qi_calls: AtomicU32::new(0),
        }
    }

    fn qi_calls(&self) -> u32 {
        self.qi_calls.load(Ordering::SeqCst)
    }

    fn as_probe(&'static self) -> ComPtr<IProbe> {
        unsafe { interop_rs::rcw_from_ptr(self as *const _ as *mut IProbe, true) }
    }
}

unsafe extern "C" fn qi_no_interface(
    this: *mut IBase,
    _iid: *const Iid,
    out: *mut *mut c_void,
) -> HResult {
    let object = &*(this as *const RawObject);
    object.qi_calls.fetch_add(1, Ordering::SeqCst);
    *out = std::ptr::null_mut();
    hresults::E_NOINTERFACE
}

unsafe extern "C" fn qi_broken(
    this: *mut IBase,
    _iid: *const Iid,
    out: *mut *mut c_void,
) -> HResult {
    let object = &*(this as *const RawObject);
    object.qi_calls.fetch_add(1, Ordering::SeqCst);
    *out = std::ptr::null_mut();
    hresults::E_FAIL
}

unsafe extern "C" fn retain_noop(_this: *mut IBase) -> u32 {
    1
}

unsafe extern "C" fn release_noop(_this: *mut IBase) -> u32 {
    1
}

static POLITE_VTBL: IBaseVtbl = IBaseVtbl {
    query_interface: qi_no_interface,
    retain: retain_noop,
    release: release_noop,
};

static BROKEN_VTBL: IBaseVtbl = IBaseVtbl {
    query_interface: qi_broken,
    retain: retain_noop,
    release: release_noop,
};

#[test]
fn no_interface_becomes_none_and_only_no_interface() {
    static OBJECT: RawObject = RawObject::new(&POLITE_VTBL);
    let obj = OBJECT.as_probe();

    // Unsupported: the probing entry point reports None.
    let probed = obj.query_or_null::<IAbsent>().unwrap();
    assert!(probed.is_none());

    // The strict entry point reports the dedicated condition.
    let err = obj.query::<IAbsent>();
    assert!(matches!(err, Err(InteropError::NoInterface(_))));

    assert_eq!(OBJECT.qi_calls(), 2);
}

#[test]
fn other_failures_propagate_with_their_code() {
    static OBJECT: RawObject = RawObject::new(&BROKEN_VTBL);
    let obj = OBJECT.as_probe();

    let err = obj.query::<IAbsent>();
    assert!(matches!(
        err,
        Err(InteropError::Native(hr)) if hr == hresults::E_FAIL
    ));

    // The probing entry point must NOT swallow a non-NoInterface failure.
    let err = obj.query_or_null::<IAbsent>();
    assert!(matches!(
        err,
        Err(InteropError::Native(hr)) if hr == hresults::E_FAIL
    ));
}

#[test]
fn in_process_satisfaction_never_crosses_the_boundary() {
    static OBJECT: RawObject = RawObject::new(&POLITE_VTBL);
    let obj = OBJECT.as_probe();

    // Same interface and ancestors resolve without a native call.
    let same: ComPtr<IProbe> = obj.query().unwrap();
    assert_eq!(same.as_raw(), obj.as_raw());
    let base: ComPtr<IBase> = obj.query().unwrap();
    assert!(!base.is_null());
    assert_eq!(OBJECT.qi_calls(), 0);

    // Anything else needs the object's answer.
    let _ = obj.query_or_null::<IAbsent>().unwrap();
    assert_eq!(OBJECT.qi_calls(), 1);
}

#[test]
fn querying_through_a_null_handle_fails_cleanly() {
    let obj: ComPtr<IProbe> = ComPtr::null();
    let err = obj.query::<IAbsent>();
    assert!(matches!(err, Err(InteropError::Native(_))));
}
