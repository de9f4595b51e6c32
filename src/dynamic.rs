//! Metadata-driven calls into a native call table.
//!
//! This is the fully-runtime call path: no compile-time knowledge of the
//! slot signature, just the interface descriptor. The call frame is built
//! from the method's marshaller shapes (implicit `this` pointer first),
//! the slot at the method's fixed offset is invoked through libffi, and
//! out-parameters and the return value are lifted back with ownership
//! transferred. Owned temporaries are released even when lowering or the
//! call fails partway.

use std::cell::UnsafeCell;
use std::os::raw::c_void;
use std::ptr::null_mut;

use libffi::middle::{Arg, Cif, CodePtr, Type};
use tracing::trace;

use crate::abi::{ComInterface, HResult, IBase};
use crate::error::{InteropError, MarshalError};
use crate::marshal::{Marshal, MarshalKind, NativeArg, Prim, Value};
use crate::metadata::{
    descriptor_of, Direction, ErrorConvention, InterfaceDescriptor, MethodDescriptor,
};
use crate::proxy::ComPtr;

/// Everything a dynamic call produced: the return payload (`Void` under the
/// hresult convention) and the lifted out-parameters in declaration order.
#[derive(Debug)]
pub struct Outcome {
    pub ret: Value,
    pub outs: Vec<Value>,
}

/// Releases owned argument temporaries when the call frame is torn down,
/// no matter how it is torn down.
struct TempGuard {
    lowered: Vec<(MarshalKind, NativeArg)>,
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        for (kind, arg) in self.lowered.drain(..) {
            kind.release_temporary(arg);
        }
    }
}

/// Invokes slot `slot` of `descriptor` on `target` with `args` as the
/// in-parameters, in declaration order.
///
/// # Safety
///
/// `target` must be a live call table whose layout matches `descriptor`.
pub unsafe fn invoke(
    descriptor: &InterfaceDescriptor,
    target: *mut IBase,
    slot: usize,
    args: &[Value],
) -> Result<Outcome, InteropError> {
    let method = descriptor
        .method(slot)
        .ok_or(InteropError::InvalidSlot(slot))?;

    if target.is_null() {
        return Err(InteropError::Native(crate::hresults::E_POINTER));
    }
    if args.len() != method.in_arity() {
        return Err(InteropError::Marshal(MarshalError::ArityMismatch {
            expected: method.in_arity(),
            got: args.len(),
        }));
    }

    trace!(
        interface = descriptor.name,
        method = method.name,
        slot,
        "dynamic call"
    );

    // Out-parameter landing slots; addresses must stay put, so the vector
    // is sized before any address is taken.
    let out_slots: Vec<UnsafeCell<*mut c_void>> = (0..method.out_arity())
        .map(|_| UnsafeCell::new(null_mut()))
        .collect();

    let mut guard = TempGuard {
        lowered: Vec::with_capacity(args.len()),
    };
    let mut natives: Vec<NativeArg> = Vec::with_capacity(method.params.len());
    let mut next_in = 0;
    let mut next_out = 0;
    for param in &method.params {
        match param.dir {
            Direction::In => {
                let lowered = param.kind.lower(&args[next_in])?;
                guard.lowered.push((param.kind, lowered));
                natives.push(lowered);
                next_in += 1;
            }
            Direction::Out => {
                natives.push(NativeArg::Ptr(out_slots[next_out].get() as *mut c_void));
                next_out += 1;
            }
        }
    }

    // Call frame: the implicit `this` pointer, then the declared parameters.
    let mut arg_types: Vec<Type> = Vec::with_capacity(method.params.len() + 1);
    arg_types.push(Type::pointer());
    for param in &method.params {
        arg_types.push(match param.dir {
            Direction::In => param.kind.ffi_type(),
            Direction::Out => Type::pointer(),
        });
    }
    let return_type = match method.convention {
        ErrorConvention::HResult => Type::i32(),
        ErrorConvention::Plain => match method.ret {
            None => Type::void(),
            Some(kind) => kind.ffi_type(),
        },
    };
    let cif = Cif::new(arg_types, return_type);

    let this_ptr: *mut c_void = target as *mut c_void;
    let mut ffi_args: Vec<Arg> = Vec::with_capacity(natives.len() + 1);
    ffi_args.push(Arg::new(&this_ptr));
    for native in &natives {
        ffi_args.push(native.as_ffi_arg());
    }

    let code = slot_code(target, slot)?;

    let ret = match method.convention {
        ErrorConvention::HResult => {
            let hr = HResult(cif.call::<i32>(code, &ffi_args));
            hr.into_result()?;
            Value::Void
        }
        ErrorConvention::Plain => call_plain(&cif, code, &ffi_args, method)?,
    };

    // The callee only owns the out slots on success; lift with transfer so
    // whatever it wrote is consumed exactly once.
    let mut outs = Vec::with_capacity(method.out_arity());
    let mut slot_iter = out_slots.iter();
    for param in &method.params {
        if param.dir == Direction::Out {
            let cell = slot_iter.next().expect("out slot count");
            let written = *cell.get();
            outs.push(param.kind.lift(NativeArg::Ptr(written), true)?);
        }
    }

    Ok(Outcome { ret, outs })
}

/// Looks up a method by name on `T` and invokes it dynamically.
///
/// # Safety
///
/// `obj` must wrap a live call table of `T`'s shape.
pub unsafe fn invoke_interface<T: ComInterface>(
    obj: &ComPtr<T>,
    method: &str,
    args: &[Value],
) -> Result<Outcome, InteropError> {
    let descriptor = descriptor_of::<T>()?;
    let slot = descriptor
        .slot_of(method)
        .ok_or_else(|| InteropError::UnknownMethod(method.to_string()))?;
    invoke(descriptor, obj.as_raw() as *mut IBase, slot, args)
}

/// Reads the function pointer out of the call table's `slot`-th entry.
unsafe fn slot_code(target: *mut IBase, slot: usize) -> Result<CodePtr, InteropError> {
    let vtable = *(target as *const *const *const c_void);
    let entry = *vtable.add(slot);
    if entry.is_null() {
        return Err(InteropError::Native(crate::hresults::E_FAIL));
    }
    Ok(CodePtr::from_ptr(entry))
}

unsafe fn call_plain(
    cif: &Cif,
    code: CodePtr,
    ffi_args: &[Arg],
    method: &MethodDescriptor,
) -> Result<Value, InteropError> {
    let Some(kind) = method.ret else {
        let _: c_void = cif.call(code, ffi_args);
        return Ok(Value::Void);
    };

    macro_rules! read_return {
        ($ty:ty) => {
            cif.call::<$ty>(code, ffi_args)
        };
    }

    Ok(match kind {
        MarshalKind::Primitive(p) => match p.prim {
            Prim::I8 => Value::I8(read_return!(i8)),
            Prim::U8 => Value::U8(read_return!(u8)),
            Prim::I16 => Value::I16(read_return!(i16)),
            Prim::U16 => Value::U16(read_return!(u16)),
            Prim::I32 => Value::I32(read_return!(i32)),
            Prim::U32 => Value::U32(read_return!(u32)),
            Prim::I64 => Value::I64(read_return!(i64)),
            Prim::U64 => Value::U64(read_return!(u64)),
            Prim::F32 => Value::F32(read_return!(f32)),
            Prim::F64 => Value::F64(read_return!(f64)),
            Prim::Isize => Value::Isize(read_return!(isize)),
            Prim::Usize => Value::Usize(read_return!(usize)),
            Prim::Ptr => Value::Ptr(read_return!(*mut c_void)),
        },
        // Pointer-shaped payloads come back owned.
        MarshalKind::Text(_) | MarshalKind::Interface(_) => {
            let raw = read_return!(*mut c_void);
            kind.lift(NativeArg::Ptr(raw), true)?
        }
    })
}
