//! Interface and class declaration macros.
//!
//! These are the crate's "code generator": one invocation per interface
//! emits the call-table struct, the proxy forwarding methods, the stub
//! thunk table, the managed trait, and the metadata table, all in fixed
//! slot order. Nothing else in the crate knows any interface's shape.

/// Defines an [`Iid`](crate::Iid) constant.
///
/// ```
/// use interop_rs::com_iid;
///
/// com_iid!(IID_IFROB = [0x1234_5678, 0x90AB, 0xCDEF,
///     [0x12, 0x34, 0x56, 0x78, 0x90, 0xAB, 0xCD, 0xEF]]);
/// ```
#[macro_export]
macro_rules! com_iid {
    ($(#[$iid_attr:meta])*
     $name:ident = [$d1:expr, $d2:expr, $d3:expr, $d4:expr $(,)?]) => {
        $(#[$iid_attr])*
        const $name: $crate::Iid = $crate::Iid::new($d1, $d2, $d3, $d4);
    };
    ($(#[$iid_attr:meta])*
     pub $name:ident = [$d1:expr, $d2:expr, $d3:expr, $d4:expr $(,)?]) => {
        $(#[$iid_attr])*
        pub const $name: $crate::Iid = $crate::Iid::new($d1, $d2, $d3, $d4);
    };
}

/// Defines a boundary-crossing interface.
///
/// ```
/// use interop_rs::{com_iid, com_interface, HResult, IBase, IBaseTrait};
///
/// com_iid!(IID_IFROB = [0x1234_5678, 0x90AB, 0xCDEF,
///     [0x12, 0x34, 0x56, 0x78, 0x90, 0xAB, 0xCD, 0xEF]]);
///
/// com_interface! {
///     interface (IFrob, IFrobTrait): (IBase, IBaseTrait) {
///         iid: IID_IFROB,
///         vtable: IFrobVtbl,
///
///         fn frob(amount: i32) -> HResult;
///     }
/// }
/// ```
///
/// One invocation produces, in call-table order (base contract slots first,
/// declared methods in declaration order):
///
/// * `IFrobVtbl`, the `#[repr(C)]` call table with the base table embedded;
/// * `IFrob`, the interface struct, with one forwarding method per slot
///   (the proxy side, generated here once instead of per call);
/// * `IFrobTrait`, the managed trait implementations provide, plus the
///   forwarding impls that let proxies and stub boxes stand in for managed
///   objects;
/// * the thunk table builder the stub factory caches per interface type;
/// * the method metadata the descriptor registry reflects over.
///
/// Interfaces with deeper hierarchies list the remaining ancestors after
/// the immediate base so upcasts stay available:
///
/// ```ignore
/// com_interface! {
///     interface (IFrobEx, IFrobExTrait): (IFrob, IFrobTrait), IBase {
///         ...
///     }
/// }
/// ```
#[macro_export]
macro_rules! com_interface {
    (
        $(#[$iface_attr:meta])*
        interface ($iface:ident, $trait_ident:ident): ($base_iface:ty, $base_trait:path) {
            iid: $iid:ident,
            vtable: $vtable:ident,
            $(
                $(#[$fn_attr:meta])*
                fn $func:ident($($i:ident: $t:ty),* $(,)?) -> $rt:ty;
            )*
        }
    ) => {
        #[allow(missing_debug_implementations)]
        #[doc(hidden)]
        #[repr(C)]
        pub struct $vtable {
            pub base: <$base_iface as $crate::ComInterface>::Vtable,
            $(pub $func: unsafe extern "C" fn(*mut $iface $(, $t)*) -> $rt,)*
        }

        $(#[$iface_attr])*
        #[repr(C)]
        pub struct $iface {
            vtable: *const $vtable,
        }

        // Call tables are immutable once published.
        unsafe impl ::std::marker::Sync for $iface {}
        unsafe impl ::std::marker::Send for $iface {}

        impl $iface {
            $(
                $(#[$fn_attr])*
                pub fn $func(&self $(, $i: $t)*) -> $rt {
                    unsafe {
                        ((*self.vtable).$func)(self as *const Self as *mut Self $(, $i)*)
                    }
                }
            )*

            #[doc(hidden)]
            pub fn fill_vtable<C, S>() -> $vtable
            where
                C: $trait_ident,
                S: $crate::detail::FixedOffset,
            {
                $(
                    unsafe extern "C" fn $func<C: $trait_ident, S: $crate::detail::FixedOffset>(
                        this: *mut $iface $(, $i: $t)*
                    ) -> $rt {
                        let object: *const C =
                            $crate::detail::resolve_class::<S, $iface, C>(this);
                        (*object).$func($($i),*)
                    }
                )*

                $vtable {
                    base: <$base_iface>::fill_vtable::<C, S>(),
                    $($func: $func::<C, S>,)*
                }
            }
        }

        impl ::std::ops::Deref for $iface {
            type Target = $base_iface;
            fn deref(&self) -> &$base_iface {
                unsafe { &*(self as *const Self as *const $base_iface) }
            }
        }

        pub trait $trait_ident: $base_trait {
            $(fn $func(&self $(, $i: $t)*) -> $rt;)*
        }

        unsafe impl $crate::Extends<$iface> for $iface {}
        unsafe impl $crate::Extends<$base_iface> for $iface {}

        unsafe impl $crate::ComInterface for $iface {
            type Vtable = $vtable;
            type Trait = dyn $trait_ident;

            fn iid() -> $crate::Iid {
                $iid
            }

            fn interface_name() -> &'static str {
                stringify!($iface)
            }

            fn scan_iid(iid: &$crate::Iid) -> bool {
                *iid == $iid || <$base_iface as $crate::ComInterface>::scan_iid(iid)
            }

            fn from_vtable(vtable: *const Self::Vtable) -> Self {
                Self { vtable }
            }

            fn method_table() -> ::std::result::Result<
                ::std::vec::Vec<$crate::metadata::MethodDescriptor>,
                $crate::ConstructionError,
            > {
                #[allow(unused_mut)]
                let mut methods = <$base_iface as $crate::ComInterface>::method_table()?;
                $(
                    methods.push($crate::metadata::MethodDescriptor {
                        name: stringify!($func),
                        params: ::std::vec![
                            $(<$t as $crate::metadata::AbiParam>::PARAM),*
                        ],
                        ret: <$rt as $crate::metadata::AbiReturn>::RET,
                        convention: <$rt as $crate::metadata::AbiReturn>::CONVENTION,
                    });
                )*
                Ok(methods)
            }

            fn ccw_vtable() -> &'static Self::Vtable {
                static VTABLE: ::std::sync::LazyLock<$vtable> =
                    ::std::sync::LazyLock::new(|| {
                        $iface::fill_vtable::<
                            $crate::stub::CcwBox<$iface>,
                            $crate::detail::ZeroOffset,
                        >()
                    });
                &VTABLE
            }
        }

        // A proxy stands wherever a managed implementation is expected.
        impl<P> $trait_ident for $crate::ComPtr<P>
        where
            P: $crate::ComInterface + $crate::Extends<$iface>,
        {
            $(
                fn $func(&self $(, $i: $t)*) -> $rt {
                    let raw = self.as_raw();
                    ::std::assert!(
                        !raw.is_null(),
                        "method called through a null interface pointer"
                    );
                    unsafe { (*(raw as *const $iface)).$func($($i),*) }
                }
            )*
        }

        // Stub boxes forward into the managed object they root.
        impl<P> $trait_ident for $crate::stub::CcwBox<P>
        where
            P: $crate::ComInterface + $crate::Extends<$iface>,
            P::Trait: $trait_ident,
        {
            $(
                fn $func(&self $(, $i: $t)*) -> $rt {
                    self.target().$func($($i),*)
                }
            )*
        }
    };

    (
        $(#[$iface_attr:meta])*
        interface ($iface:ident, $trait_ident:ident): ($base_iface:ty, $base_trait:path), $($extra_base:ty),+ {
            iid: $iid:ident,
            vtable: $vtable:ident,
            $(
                $(#[$fn_attr:meta])*
                fn $func:ident($($i:ident: $t:ty),* $(,)?) -> $rt:ty;
            )*
        }
    ) => {
        $crate::com_interface! {
            $(#[$iface_attr])*
            interface ($iface, $trait_ident): ($base_iface, $base_trait) {
                iid: $iid,
                vtable: $vtable,
                $($(#[$fn_attr])* fn $func($($i: $t),*) -> $rt;)*
            }
        }

        $(unsafe impl $crate::Extends<$extra_base> for $iface {})+
    };
}

/// Defines a class whose instances are their own stubs: the object embeds
/// one call-table slot per exposed interface and a shared reference count,
/// and is destroyed when the count reaches zero.
///
/// ```ignore
/// com_class! {
///     class FrobServer {
///         iface_frob: IFrob;
///         @data: FrobState;
///     }
/// }
///
/// impl IFrobTrait for FrobServer {
///     fn frob(&self, amount: i32) -> HResult { ... }
/// }
///
/// let server: ComPtr<IBase> = FrobServer::alloc(FrobState::default());
/// ```
///
/// `query_interface` scans the declared interfaces in order and answers
/// with the matching embedded slot; unsupported identifiers fail with
/// `E_NOINTERFACE`. The `@data` field is where all mutable state lives;
/// methods receive `&self`, so state needs interior mutability.
#[macro_export]
macro_rules! com_class {
    (
        $(#[$cls_attr:meta])*
        class $cls:ident {
            $first_field:ident: $first_ty:ty;
            $( $iface_field:ident: $iface_ty:ty; )*
            $(#[$data_attr:meta])*
            @data: $data:ty;
        }
    ) => {
        $(#[$cls_attr])*
        pub struct $cls {
            $first_field: $first_ty,
            $( $iface_field: $iface_ty, )*
            ref_count: ::std::sync::atomic::AtomicUsize,
            $(#[$data_attr])*
            data: $data,
        }

        impl $cls {
            /// Builds an instance on the heap with one initial
            /// reference-count unit, owned by the returned handle.
            pub fn alloc(data: $data) -> $crate::ComPtr<$crate::IBase> {
                let instance = Self {
                    $first_field: $crate::com_class_slot!($cls, $first_field, $first_ty),
                    $( $iface_field: $crate::com_class_slot!($cls, $iface_field, $iface_ty), )*
                    ref_count: ::std::sync::atomic::AtomicUsize::new(1),
                    data,
                };
                let raw = $crate::detail::allocate_class(instance);
                let base = unsafe { ::std::ptr::addr_of!((*raw).$first_field) }
                    as *mut $crate::IBase;
                unsafe { $crate::ComPtr::from_raw(base, true) }
            }

            /// A fresh handle to an already-live instance.
            #[allow(dead_code)]
            pub fn as_com_ptr(&self) -> $crate::ComPtr<$crate::IBase> {
                ::std::assert_ne!(
                    self.ref_count.load(::std::sync::atomic::Ordering::Relaxed),
                    0,
                    "cannot revive a destroyed object"
                );
                $crate::IBaseTrait::retain(self);
                let base = &self.$first_field as *const $first_ty as *mut $crate::IBase;
                unsafe { $crate::ComPtr::from_raw(base, true) }
            }
        }

        impl $crate::IBaseTrait for $cls {
            fn query_interface(
                &self,
                iid: &$crate::Iid,
                out: *mut *mut ::std::os::raw::c_void,
            ) -> $crate::HResult {
                if out.is_null() {
                    return $crate::hresults::E_POINTER;
                }
                if <$first_ty as $crate::ComInterface>::scan_iid(iid) {
                    $crate::IBaseTrait::retain(self);
                    unsafe {
                        *out = &self.$first_field as *const $first_ty
                            as *mut ::std::os::raw::c_void;
                    }
                    return $crate::hresults::E_OK;
                }
                $(
                    if <$iface_ty as $crate::ComInterface>::scan_iid(iid) {
                        $crate::IBaseTrait::retain(self);
                        unsafe {
                            *out = &self.$iface_field as *const $iface_ty
                                as *mut ::std::os::raw::c_void;
                        }
                        return $crate::hresults::E_OK;
                    }
                )*
                unsafe { *out = ::std::ptr::null_mut() };
                $crate::hresults::E_NOINTERFACE
            }

            fn retain(&self) -> u32 {
                $crate::detail::retain_count(&self.ref_count)
            }

            unsafe fn release(&self) -> u32 {
                $crate::detail::release_count(&self.ref_count, self as *const Self)
            }
        }
    };
}

/// Builds one embedded call-table slot for a `com_class!` field, caching the
/// filled table for the process.
#[doc(hidden)]
#[macro_export]
macro_rules! com_class_slot {
    ($cls:ident, $field:ident, $iface_ty:ty) => {{
        struct FieldOffset;
        impl $crate::detail::FixedOffset for FieldOffset {
            fn offset() -> isize {
                // From the embedded slot back to the containing object.
                -($crate::detail::offset_of!($cls, $field) as isize)
            }
        }
        static VTABLE: ::std::sync::LazyLock<<$iface_ty as $crate::ComInterface>::Vtable> =
            ::std::sync::LazyLock::new(|| {
                <$iface_ty>::fill_vtable::<$cls, FieldOffset>()
            });
        <$iface_ty as $crate::ComInterface>::from_vtable(&*VTABLE as *const _)
    }};
}
