//! Interface reflection, done once per interface type.
//!
//! A descriptor captures everything the dynamic call path needs to know
//! about an interface: its identifier and its methods in call-table order.
//! The order is fixed: the base contract's three slots first, then declared
//! methods in declaration order. That ordering **is** the call-table layout
//! the other side compiled against; nothing here may reorder it.
//!
//! Descriptors are built lazily on first use, published in a process-wide
//! map, and never destroyed. Construction for a given type is serialized by
//! the map's entry lock, so concurrent first-users all observe the same
//! published descriptor.

use std::any::TypeId;
use std::sync::LazyLock;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::abi::{ComInterface, HResult, Iid};
use crate::error::{ConstructionError, InteropError};
use crate::marshal::{bstr::BStr, MarshalKind, Prim};
use crate::proxy::{ComPtr, ComRef};

/// Which way a parameter's payload flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy)]
pub struct ParamDescriptor {
    pub kind: MarshalKind,
    pub dir: Direction,
}

/// How a slot signals failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorConvention {
    /// The slot returns a status code; payloads travel via out-parameters.
    HResult,
    /// The slot returns its payload directly and cannot fail.
    Plain,
}

#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub name: &'static str,
    pub params: Vec<ParamDescriptor>,
    /// Payload of a `Plain` slot; always `None` under `HResult`.
    pub ret: Option<MarshalKind>,
    pub convention: ErrorConvention,
}

impl MethodDescriptor {
    pub fn in_arity(&self) -> usize {
        self.params
            .iter()
            .filter(|p| p.dir == Direction::In)
            .count()
    }

    pub fn out_arity(&self) -> usize {
        self.params
            .iter()
            .filter(|p| p.dir == Direction::Out)
            .count()
    }
}

/// Sanity bound on generated call tables. Nothing legitimate comes close.
pub const MAX_CALL_TABLE_SLOTS: usize = 1024;

/// One interface type's reflected shape. Process lifetime once published.
#[derive(Debug)]
pub struct InterfaceDescriptor {
    pub iid: Iid,
    pub name: &'static str,
    /// Full table in slot order: base contract first, then declared methods.
    pub methods: Vec<MethodDescriptor>,
}

impl InterfaceDescriptor {
    /// Slots occupied by the base contract.
    pub const BASE_SLOTS: usize = 3;

    pub fn slot_count(&self) -> usize {
        self.methods.len()
    }

    pub fn method(&self, slot: usize) -> Option<&MethodDescriptor> {
        self.methods.get(slot)
    }

    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.methods.iter().position(|m| m.name == name)
    }
}

static REGISTRY: LazyLock<DashMap<TypeId, &'static InterfaceDescriptor>> =
    LazyLock::new(DashMap::new);

/// The cached descriptor for `T`, building and publishing it on first use.
///
/// A failed construction is reported to the caller and retried on the next
/// request; it never poisons the cache for other interface types.
pub fn descriptor_of<T: ComInterface>() -> Result<&'static InterfaceDescriptor, InteropError> {
    match REGISTRY.entry(TypeId::of::<T>()) {
        Entry::Occupied(entry) => Ok(*entry.get()),
        Entry::Vacant(slot) => {
            let descriptor = build::<T>()?;
            debug!(
                interface = descriptor.name,
                iid = %descriptor.iid,
                slots = descriptor.slot_count(),
                "built interface descriptor"
            );
            let published: &'static InterfaceDescriptor = Box::leak(Box::new(descriptor));
            slot.insert(published);
            Ok(published)
        }
    }
}

fn build<T: ComInterface>() -> Result<InterfaceDescriptor, ConstructionError> {
    let iid = T::iid();
    if iid == Iid::NIL {
        return Err(ConstructionError::NilIdentifier);
    }
    let methods = T::method_table()?;
    if methods.len() > MAX_CALL_TABLE_SLOTS {
        return Err(ConstructionError::TableTooLarge(methods.len()));
    }
    Ok(InterfaceDescriptor {
        iid,
        name: T::interface_name(),
        methods,
    })
}

/// Compile-time parameter reflection: every type legal in an interface
/// declaration maps to the descriptor the declaration macro records for it.
pub trait AbiParam {
    const PARAM: ParamDescriptor;
}

macro_rules! prim_abi_param {
    ($($ty:ty => $prim:ident),* $(,)?) => {
        $(
            impl AbiParam for $ty {
                const PARAM: ParamDescriptor = ParamDescriptor {
                    kind: MarshalKind::prim(Prim::$prim),
                    dir: Direction::In,
                };
            }
            impl<'a> AbiParam for &'a mut $ty {
                // Raw out-pointer to a primitive; passes through unconverted.
                const PARAM: ParamDescriptor = ParamDescriptor {
                    kind: MarshalKind::prim(Prim::Ptr),
                    dir: Direction::In,
                };
            }
        )*
    };
}

prim_abi_param! {
    i8 => I8, u8 => U8, i16 => I16, u16 => U16,
    i32 => I32, u32 => U32, i64 => I64, u64 => U64,
    f32 => F32, f64 => F64, isize => Isize, usize => Usize,
}

impl<T> AbiParam for *mut T {
    const PARAM: ParamDescriptor = ParamDescriptor {
        kind: MarshalKind::prim(Prim::Ptr),
        dir: Direction::In,
    };
}

impl<T> AbiParam for *const T {
    const PARAM: ParamDescriptor = ParamDescriptor {
        kind: MarshalKind::prim(Prim::Ptr),
        dir: Direction::In,
    };
}

impl<'a> AbiParam for &'a BStr {
    const PARAM: ParamDescriptor = ParamDescriptor {
        kind: MarshalKind::text(),
        dir: Direction::In,
    };
}

impl<'a> AbiParam for &'a mut crate::marshal::bstr::BStrRef {
    const PARAM: ParamDescriptor = ParamDescriptor {
        kind: MarshalKind::text(),
        dir: Direction::Out,
    };
}

impl<'a, T: ComInterface> AbiParam for ComRef<'a, T> {
    const PARAM: ParamDescriptor = ParamDescriptor {
        kind: MarshalKind::interface(),
        dir: Direction::In,
    };
}

impl<'a, T: ComInterface> AbiParam for &'a mut ComPtr<T> {
    const PARAM: ParamDescriptor = ParamDescriptor {
        kind: MarshalKind::interface(),
        dir: Direction::Out,
    };
}

/// Compile-time return reflection, pairing the payload shape with the error
/// convention the return type implies.
pub trait AbiReturn {
    const RET: Option<MarshalKind>;
    const CONVENTION: ErrorConvention;
}

impl AbiReturn for HResult {
    const RET: Option<MarshalKind> = None;
    const CONVENTION: ErrorConvention = ErrorConvention::HResult;
}

impl AbiReturn for () {
    const RET: Option<MarshalKind> = None;
    const CONVENTION: ErrorConvention = ErrorConvention::Plain;
}

macro_rules! prim_abi_return {
    ($($ty:ty => $prim:ident),* $(,)?) => {
        $(
            impl AbiReturn for $ty {
                const RET: Option<MarshalKind> = Some(MarshalKind::prim(Prim::$prim));
                const CONVENTION: ErrorConvention = ErrorConvention::Plain;
            }
        )*
    };
}

prim_abi_return! {
    i8 => I8, u8 => U8, i16 => I16, u16 => U16,
    i32 => I32, u32 => U32, i64 => I64, u64 => U64,
    f32 => F32, f64 => F64, isize => Isize, usize => Usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::IBase;

    #[test]
    fn base_contract_occupies_the_first_slots() {
        let d = descriptor_of::<IBase>().unwrap();
        assert_eq!(d.slot_count(), InterfaceDescriptor::BASE_SLOTS);
        assert_eq!(d.slot_of("query_interface"), Some(0));
        assert_eq!(d.slot_of("retain"), Some(1));
        assert_eq!(d.slot_of("release"), Some(2));
    }

    #[test]
    fn descriptor_is_published_once() {
        let a = descriptor_of::<IBase>().unwrap() as *const InterfaceDescriptor;
        let b = descriptor_of::<IBase>().unwrap() as *const InterfaceDescriptor;
        assert_eq!(a, b);
    }
}
