//! The raw ABI surface shared by both sides of the boundary: interface
//! identifiers, the `HResult` error convention, and the base call-table
//! contract every interface inherits.
//!
//! Nothing in this module allocates or takes locks. The types here are the
//! fixed, versioned contract; everything else in the crate is machinery for
//! producing and consuming them.

use std::fmt;
use std::os::raw::c_void;

use crate::detail::{resolve_class, FixedOffset, ZeroOffset};
use crate::error::{ConstructionError, InteropError};
use crate::marshal::{MarshalKind, Prim};
use crate::metadata::{
    Direction, ErrorConvention, InterfaceDescriptor, MethodDescriptor, ParamDescriptor,
};

/// An interface identifier: a 128-bit value naming an interface's ABI shape
/// and version. Two interfaces with the same identifier are assumed
/// ABI-compatible; this layer does not verify that assumption.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(C)]
pub struct Iid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Iid {
    /// The nil identifier. Never valid for a real interface.
    pub const NIL: Iid = Iid::new(0, 0, 0, [0; 8]);

    pub const fn new(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Self {
            data1,
            data2,
            data3,
            data4,
        }
    }
}

/// Prints in registry format `{XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX}`.
impl fmt::Display for Iid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{:08X}-{:04X}-{:04X}-{:02X}{:02X}-\
             {:02X}{:02X}{:02X}{:02X}{:02X}{:02X}}}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7]
        )
    }
}

/// The native error convention: a 32-bit status code where negative values
/// are failures. Wrapped so the crate's own codes stay distinguishable from
/// plain integers at API boundaries.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct HResult(pub i32);

impl HResult {
    pub const fn is_ok(self) -> bool {
        self.0 >= 0
    }

    pub const fn code(self) -> i32 {
        self.0
    }

    /// Translates a failure code into the managed error taxonomy. The code
    /// survives losslessly; `E_NOINTERFACE` maps to the dedicated variant
    /// that capability probing depends on.
    pub fn into_result(self) -> Result<(), InteropError> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(InteropError::from_hresult(self))
        }
    }
}

impl fmt::Display for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010X}", self.0 as u32)
    }
}

pub mod hresults {
    //! Status codes shared across the boundary.

    use super::HResult;

    pub const E_OK: HResult = HResult(0);
    pub const E_NOTIMPL: HResult = HResult(0x8000_4001_u32 as i32);
    pub const E_NOINTERFACE: HResult = HResult(0x8000_4002_u32 as i32);
    pub const E_POINTER: HResult = HResult(0x8000_4003_u32 as i32);
    pub const E_FAIL: HResult = HResult(0x8000_4005_u32 as i32);
    pub const E_UNEXPECTED: HResult = HResult(0x8000_FFFF_u32 as i32);

    // Crate-specific facility codes.
    pub const E_MARSHAL: HResult = HResult(0x8004_0200_u32 as i32);
    pub const E_CONSTRUCTION: HResult = HResult(0x8004_0201_u32 as i32);
    pub const E_PROTOCOL: HResult = HResult(0x8004_0202_u32 as i32);
    pub const E_MODULE: HResult = HResult(0x8004_0203_u32 as i32);
}

/// Runs a fallible closure and folds the outcome into the native error
/// convention. Class implementations use this to bridge `?`-style bodies
/// into call-table slots.
pub fn to_hresult<F>(f: F) -> HResult
where
    F: FnOnce() -> Result<(), InteropError>,
{
    match f() {
        Ok(()) => hresults::E_OK,
        Err(e) => e.hresult(),
    }
}

crate::com_iid!(
    pub IID_IBASE = [
        0x7f1c_43a0,
        0x5d0e,
        0x4a6b,
        [0x93, 0x41, 0x0d, 0x8a, 0x6e, 0x2b, 0x71, 0xc9]
    ]
);

/// Base interface for all boundary-crossing types. Carries the three-method
/// contract: interface discovery plus reference counting.
///
/// The methods on this struct call straight through a raw call table; use
/// [`ComPtr`](crate::ComPtr) instead of calling them directly.
#[derive(Debug)]
#[repr(C)]
pub struct IBase {
    vtable: *const IBaseVtbl,
}

// Call tables are immutable once published.
unsafe impl Sync for IBase {}
unsafe impl Send for IBase {}

/// Call-table layout of the base contract. The slot order here is the
/// cross-boundary compatibility invariant: every interface's table starts
/// with these three slots.
#[allow(missing_debug_implementations)]
#[repr(C)]
pub struct IBaseVtbl {
    pub query_interface:
        unsafe extern "C" fn(*mut IBase, *const Iid, *mut *mut c_void) -> HResult,
    pub retain: unsafe extern "C" fn(*mut IBase) -> u32,
    pub release: unsafe extern "C" fn(*mut IBase) -> u32,
}

impl IBase {
    /// Asks the object for another interface on itself. Fails with exactly
    /// `E_NOINTERFACE` when the identifier is unsupported.
    pub unsafe fn query_interface(
        &self,
        iid: *const Iid,
        out: *mut *mut c_void,
    ) -> HResult {
        ((*self.vtable).query_interface)(self as *const Self as *mut Self, iid, out)
    }

    /// Takes one reference-count unit. The returned count is observational
    /// only.
    pub unsafe fn retain(&self) -> u32 {
        ((*self.vtable).retain)(self as *const Self as *mut Self)
    }

    /// Gives back one reference-count unit; reaching zero destroys the
    /// object.
    pub unsafe fn release(&self) -> u32 {
        ((*self.vtable).release)(self as *const Self as *mut Self)
    }

    #[doc(hidden)]
    pub fn fill_vtable<C, S>() -> IBaseVtbl
    where
        C: IBaseTrait,
        S: FixedOffset,
    {
        unsafe extern "C" fn query_interface<C: IBaseTrait, S: FixedOffset>(
            this: *mut IBase,
            iid: *const Iid,
            out: *mut *mut c_void,
        ) -> HResult {
            let object: *const C = resolve_class::<S, IBase, C>(this);
            (*object).query_interface(&*iid, out)
        }
        unsafe extern "C" fn retain<C: IBaseTrait, S: FixedOffset>(this: *mut IBase) -> u32 {
            let object: *const C = resolve_class::<S, IBase, C>(this);
            (*object).retain()
        }
        unsafe extern "C" fn release<C: IBaseTrait, S: FixedOffset>(this: *mut IBase) -> u32 {
            let object: *const C = resolve_class::<S, IBase, C>(this);
            (*object).release()
        }

        IBaseVtbl {
            query_interface: query_interface::<C, S>,
            retain: retain::<C, S>,
            release: release::<C, S>,
        }
    }
}

/// The managed-side view of the base contract. Implemented for proxies, stub
/// boxes, and `com_class!` objects; plain managed objects can rely on the
/// defaults, which describe an object with no standalone native identity.
pub trait IBaseTrait: Send + Sync {
    fn query_interface(&self, _iid: &Iid, out: *mut *mut c_void) -> HResult {
        if !out.is_null() {
            unsafe { *out = std::ptr::null_mut() };
        }
        hresults::E_NOINTERFACE
    }

    fn retain(&self) -> u32 {
        1
    }

    /// # Safety
    ///
    /// A release that drops the count to zero destroys the object; the
    /// caller must not touch it afterwards.
    unsafe fn release(&self) -> u32 {
        1
    }

    /// The native call table this object wraps, if it is a proxy. The
    /// boundary router uses this to short-circuit round trips.
    fn native_handle(&self) -> Option<std::ptr::NonNull<IBase>> {
        None
    }
}

/// Implemented (via the declaration macros) by every interface type. The
/// associated items are what the metadata cache and the stub factory reflect
/// over, once per type.
///
/// # Safety
///
/// `Vtable` must be `#[repr(C)]` with the base contract's table embedded as
/// its first field, and `scan_iid` must cover exactly the identifiers whose
/// tables are layout-prefixes of `Vtable`.
pub unsafe trait ComInterface: Sized + Send + Sync + 'static {
    type Vtable: Send + Sync + 'static;
    type Trait: ?Sized + IBaseTrait + 'static;

    fn iid() -> Iid;
    fn interface_name() -> &'static str;

    /// Whether `iid` names this interface or one of its ancestors.
    fn scan_iid(iid: &Iid) -> bool;

    fn from_vtable(vtable: *const Self::Vtable) -> Self;

    /// The full call-table description, base contract slots first, declared
    /// methods in declaration order.
    fn method_table() -> Result<Vec<MethodDescriptor>, ConstructionError>;

    /// The thunk table used by stub instances for this interface, built on
    /// first use and retained for the process.
    fn ccw_vtable() -> &'static Self::Vtable;

    /// This interface's cached descriptor.
    fn descriptor() -> Result<&'static InterfaceDescriptor, InteropError> {
        crate::metadata::descriptor_of::<Self>()
    }
}

/// Marker for compile-time upcasts: `T: Extends<B>` promises that a `T`
/// call-table pointer is also a valid `B` call-table pointer.
///
/// # Safety
///
/// Only implement for true layout-prefix ancestors.
pub unsafe trait Extends<B: ComInterface>: ComInterface {}

unsafe impl Extends<IBase> for IBase {}

unsafe impl ComInterface for IBase {
    type Vtable = IBaseVtbl;
    type Trait = dyn IBaseTrait;

    fn iid() -> Iid {
        IID_IBASE
    }

    fn interface_name() -> &'static str {
        "IBase"
    }

    fn scan_iid(iid: &Iid) -> bool {
        *iid == IID_IBASE
    }

    fn from_vtable(vtable: *const Self::Vtable) -> Self {
        Self { vtable }
    }

    fn method_table() -> Result<Vec<MethodDescriptor>, ConstructionError> {
        Ok(vec![
            MethodDescriptor {
                name: "query_interface",
                params: vec![
                    ParamDescriptor {
                        kind: MarshalKind::prim(Prim::Ptr),
                        dir: Direction::In,
                    },
                    ParamDescriptor {
                        kind: MarshalKind::prim(Prim::Ptr),
                        dir: Direction::In,
                    },
                ],
                ret: None,
                convention: ErrorConvention::HResult,
            },
            MethodDescriptor {
                name: "retain",
                params: vec![],
                ret: Some(MarshalKind::prim(Prim::U32)),
                convention: ErrorConvention::Plain,
            },
            MethodDescriptor {
                name: "release",
                params: vec![],
                ret: Some(MarshalKind::prim(Prim::U32)),
                convention: ErrorConvention::Plain,
            },
        ])
    }

    fn ccw_vtable() -> &'static Self::Vtable {
        static VTABLE: std::sync::LazyLock<IBaseVtbl> =
            std::sync::LazyLock::new(IBase::fill_vtable::<crate::stub::CcwBox<IBase>, ZeroOffset>);
        &VTABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iid_display() {
        assert_eq!(
            IID_IBASE.to_string(),
            "{7F1C43A0-5D0E-4A6B-9341-0D8A6E2B71C9}"
        );
    }

    #[test]
    fn hresult_failure_codes_survive_translation() {
        let err = InteropError::from_hresult(hresults::E_FAIL);
        assert_eq!(err.hresult(), hresults::E_FAIL);

        let err = InteropError::from_hresult(hresults::E_NOINTERFACE);
        assert!(matches!(err, InteropError::NoInterface(_)));
        assert_eq!(err.hresult(), hresults::E_NOINTERFACE);
    }

    #[test]
    fn ok_codes_are_not_errors() {
        assert!(hresults::E_OK.into_result().is_ok());
        assert!(hresults::E_FAIL.into_result().is_err());
    }
}
