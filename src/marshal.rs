//! Per-type strategies for moving values across the boundary.
//!
//! A [`MarshalKind`] is chosen once per parameter or return value when an
//! interface's metadata is built, and describes the value's native storage
//! shape plus both conversion directions. Lowering may allocate an owned
//! temporary (strings do); [`Marshal::release_temporary`] is the matching
//! cleanup and runs even when the call unwinds. Lifting takes a `transfer`
//! flag: whether the conversion consumes one retain unit (or buffer
//! ownership) of the incoming value or must take its own.

use std::os::raw::c_void;

use enum_dispatch::enum_dispatch;
use libffi::middle::{Arg, Type};

use crate::abi::IBase;
use crate::error::MarshalError;
use crate::proxy::ComPtr;

pub mod bstr;

use bstr::BStr;

/// A managed-side value in transit across the boundary.
#[derive(Debug, Clone)]
pub enum Value {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Isize(isize),
    Usize(usize),
    Ptr(*mut c_void),
    Str(String),
    Interface(ComPtr<IBase>),
    Void,
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::I8(_) => "i8",
            Value::U8(_) => "u8",
            Value::I16(_) => "i16",
            Value::U16(_) => "u16",
            Value::I32(_) => "i32",
            Value::U32(_) => "u32",
            Value::I64(_) => "i64",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Isize(_) => "isize",
            Value::Usize(_) => "usize",
            Value::Ptr(_) => "pointer",
            Value::Str(_) => "string",
            Value::Interface(_) => "interface",
            Value::Void => "void",
        }
    }
}

/// ABI-level storage shapes for primitive values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prim {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Isize,
    Usize,
    Ptr,
}

impl Prim {
    pub fn ffi_type(self) -> Type {
        match self {
            Prim::I8 => Type::i8(),
            Prim::U8 => Type::u8(),
            Prim::I16 => Type::i16(),
            Prim::U16 => Type::u16(),
            Prim::I32 => Type::i32(),
            Prim::U32 => Type::u32(),
            Prim::I64 => Type::i64(),
            Prim::U64 => Type::u64(),
            Prim::F32 => Type::f32(),
            Prim::F64 => Type::f64(),
            Prim::Isize => Type::isize(),
            Prim::Usize => Type::usize(),
            Prim::Ptr => Type::pointer(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Prim::I8 => "i8",
            Prim::U8 => "u8",
            Prim::I16 => "i16",
            Prim::U16 => "u16",
            Prim::I32 => "i32",
            Prim::U32 => "u32",
            Prim::I64 => "i64",
            Prim::U64 => "u64",
            Prim::F32 => "f32",
            Prim::F64 => "f64",
            Prim::Isize => "isize",
            Prim::Usize => "usize",
            Prim::Ptr => "pointer",
        }
    }
}

/// A value lowered to its native storage shape, held in caller-owned storage
/// for the duration of one call.
#[derive(Debug, Clone, Copy)]
pub enum NativeArg {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Isize(isize),
    Usize(usize),
    Ptr(*mut c_void),
}

impl NativeArg {
    /// Borrows the storage for a foreign call. The returned `Arg` points
    /// into `self`, which must stay in place until the call returns.
    pub fn as_ffi_arg(&self) -> Arg {
        match self {
            NativeArg::I8(v) => Arg::new(v),
            NativeArg::U8(v) => Arg::new(v),
            NativeArg::I16(v) => Arg::new(v),
            NativeArg::U16(v) => Arg::new(v),
            NativeArg::I32(v) => Arg::new(v),
            NativeArg::U32(v) => Arg::new(v),
            NativeArg::I64(v) => Arg::new(v),
            NativeArg::U64(v) => Arg::new(v),
            NativeArg::F32(v) => Arg::new(v),
            NativeArg::F64(v) => Arg::new(v),
            NativeArg::Isize(v) => Arg::new(v),
            NativeArg::Usize(v) => Arg::new(v),
            NativeArg::Ptr(v) => Arg::new(v),
        }
    }
}

/// A single value's boundary-crossing strategy.
#[enum_dispatch]
pub trait Marshal {
    /// The native storage shape.
    fn ffi_type(&self) -> Type;

    /// Converts a managed value into native storage. Strings allocate an
    /// owned temporary that must be handed to [`Marshal::release_temporary`]
    /// after the call.
    fn lower(&self, value: &Value) -> Result<NativeArg, MarshalError>;

    /// Releases an owned temporary produced by [`Marshal::lower`]. A no-op
    /// for kinds that lower without allocating.
    fn release_temporary(&self, arg: NativeArg);

    /// Converts native storage back into a managed value. `transfer` decides
    /// whether the conversion consumes the incoming retain unit or buffer
    /// ownership, or must take a copy of its own.
    fn lift(&self, arg: NativeArg, transfer: bool) -> Result<Value, MarshalError>;
}

/// Numeric and raw-pointer values marshal by identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimitiveMarshaller {
    pub prim: Prim,
}

impl Marshal for PrimitiveMarshaller {
    fn ffi_type(&self) -> Type {
        self.prim.ffi_type()
    }

    fn lower(&self, value: &Value) -> Result<NativeArg, MarshalError> {
        let mismatch = || MarshalError::TypeMismatch {
            expected: self.prim.name(),
            got: value.kind_name(),
        };
        Ok(match (self.prim, value) {
            (Prim::I8, Value::I8(v)) => NativeArg::I8(*v),
            (Prim::U8, Value::U8(v)) => NativeArg::U8(*v),
            (Prim::I16, Value::I16(v)) => NativeArg::I16(*v),
            (Prim::U16, Value::U16(v)) => NativeArg::U16(*v),
            (Prim::I32, Value::I32(v)) => NativeArg::I32(*v),
            (Prim::U32, Value::U32(v)) => NativeArg::U32(*v),
            (Prim::I64, Value::I64(v)) => NativeArg::I64(*v),
            (Prim::U64, Value::U64(v)) => NativeArg::U64(*v),
            (Prim::F32, Value::F32(v)) => NativeArg::F32(*v),
            (Prim::F64, Value::F64(v)) => NativeArg::F64(*v),
            (Prim::Isize, Value::Isize(v)) => NativeArg::Isize(*v),
            (Prim::Usize, Value::Usize(v)) => NativeArg::Usize(*v),
            (Prim::Ptr, Value::Ptr(v)) => NativeArg::Ptr(*v),
            _ => return Err(mismatch()),
        })
    }

    fn release_temporary(&self, _arg: NativeArg) {}

    fn lift(&self, arg: NativeArg, _transfer: bool) -> Result<Value, MarshalError> {
        Ok(match arg {
            NativeArg::I8(v) => Value::I8(v),
            NativeArg::U8(v) => Value::U8(v),
            NativeArg::I16(v) => Value::I16(v),
            NativeArg::U16(v) => Value::U16(v),
            NativeArg::I32(v) => Value::I32(v),
            NativeArg::U32(v) => Value::U32(v),
            NativeArg::I64(v) => Value::I64(v),
            NativeArg::U64(v) => Value::U64(v),
            NativeArg::F32(v) => Value::F32(v),
            NativeArg::F64(v) => Value::F64(v),
            NativeArg::Isize(v) => Value::Isize(v),
            NativeArg::Usize(v) => Value::Usize(v),
            NativeArg::Ptr(v) => Value::Ptr(v),
        })
    }
}

/// Strings travel as owned, length-prefixed buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextMarshaller;

impl Marshal for TextMarshaller {
    fn ffi_type(&self) -> Type {
        Type::pointer()
    }

    fn lower(&self, value: &Value) -> Result<NativeArg, MarshalError> {
        match value {
            Value::Str(s) => Ok(NativeArg::Ptr(BStr::alloc(s) as *mut c_void)),
            other => Err(MarshalError::TypeMismatch {
                expected: "string",
                got: other.kind_name(),
            }),
        }
    }

    fn release_temporary(&self, arg: NativeArg) {
        if let NativeArg::Ptr(p) = arg {
            unsafe { BStr::free_raw(p as *mut BStr) }
        }
    }

    fn lift(&self, arg: NativeArg, transfer: bool) -> Result<Value, MarshalError> {
        let NativeArg::Ptr(p) = arg else {
            return Err(MarshalError::TypeMismatch {
                expected: "string buffer pointer",
                got: "non-pointer storage",
            });
        };
        if p.is_null() {
            return Err(MarshalError::NullBuffer);
        }
        let raw = p as *mut BStr;
        let copied = unsafe {
            (*raw)
                .to_str()
                .map(str::to_owned)
                .map_err(|_| MarshalError::InvalidUtf8)
        };
        if transfer {
            unsafe { BStr::free_raw(raw) };
        }
        Ok(Value::Str(copied?))
    }
}

/// Interface pointers marshal through the boundary router: borrowed on the
/// way out, wrapped as proxies on the way in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceMarshaller;

impl Marshal for InterfaceMarshaller {
    fn ffi_type(&self) -> Type {
        Type::pointer()
    }

    fn lower(&self, value: &Value) -> Result<NativeArg, MarshalError> {
        match value {
            Value::Interface(p) => Ok(NativeArg::Ptr(p.as_raw() as *mut c_void)),
            Value::Ptr(p) => Ok(NativeArg::Ptr(*p)),
            other => Err(MarshalError::TypeMismatch {
                expected: "interface",
                got: other.kind_name(),
            }),
        }
    }

    // Interface arguments are borrowed; the callee retains if it stores.
    fn release_temporary(&self, _arg: NativeArg) {}

    fn lift(&self, arg: NativeArg, transfer: bool) -> Result<Value, MarshalError> {
        let NativeArg::Ptr(p) = arg else {
            return Err(MarshalError::TypeMismatch {
                expected: "interface pointer",
                got: "non-pointer storage",
            });
        };
        Ok(Value::Interface(unsafe {
            ComPtr::from_raw(p as *mut IBase, transfer)
        }))
    }
}

/// The storage-shape dispatch chosen once per parameter at metadata build
/// time.
#[enum_dispatch(Marshal)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarshalKind {
    Primitive(PrimitiveMarshaller),
    Text(TextMarshaller),
    Interface(InterfaceMarshaller),
}

impl MarshalKind {
    pub const fn prim(prim: Prim) -> Self {
        MarshalKind::Primitive(PrimitiveMarshaller { prim })
    }

    pub const fn text() -> Self {
        MarshalKind::Text(TextMarshaller)
    }

    pub const fn interface() -> Self {
        MarshalKind::Interface(InterfaceMarshaller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_marshal_by_identity() {
        let m = MarshalKind::prim(Prim::I32);
        let lowered = m.lower(&Value::I32(-7)).unwrap();
        assert!(matches!(lowered, NativeArg::I32(-7)));
        let lifted = m.lift(lowered, false).unwrap();
        assert!(matches!(lifted, Value::I32(-7)));
    }

    #[test]
    fn primitive_shape_mismatch_is_an_error() {
        let m = MarshalKind::prim(Prim::I32);
        assert!(m.lower(&Value::Str("no".into())).is_err());
    }

    #[test]
    fn text_round_trips_through_owned_buffer() {
        let m = MarshalKind::text();
        let lowered = m.lower(&Value::Str("grüße\0!".into())).unwrap();
        // transfer = true consumes the temporary
        let lifted = m.lift(lowered, true).unwrap();
        match lifted {
            Value::Str(s) => assert_eq!(s, "grüße\0!"),
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn null_text_buffer_is_a_marshal_failure() {
        let m = MarshalKind::text();
        let err = m.lift(NativeArg::Ptr(std::ptr::null_mut()), false);
        assert!(matches!(err, Err(MarshalError::NullBuffer)));
    }
}
