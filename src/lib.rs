//! An interface-based ABI bridge between in-process Rust objects and native
//! code behind raw call tables.
//!
//! Both sides expose and consume objects purely through *interfaces*:
//! polymorphic call tables identified by a 128-bit [`Iid`], each inheriting
//! the base contract of reference counting and interface discovery defined
//! in [`abi`]. The crate supplies:
//!
//! * [`com_interface!`] / [`com_class!`] / [`com_iid!`]: the declaration
//!   surface that compiles an interface into its forwarding code;
//! * [`ComPtr`]: the managed handle that owns exactly one reference-count
//!   unit on a native object (the proxy, or "RCW", side);
//! * [`CcwBox`] and `com_class!` objects: native-callable call tables that
//!   forward into managed objects (the stub, or "CCW", side);
//! * the [`router`] façade: `rcw_from_ptr`, `ccw_for_object`,
//!   `query_interface`, `query_interface_or_null`, with round-trip
//!   short-circuiting so wrapper chains never grow;
//! * [`metadata`] and [`dynamic`]: per-interface descriptors built once per
//!   type, and a libffi-driven call path for fully dynamic invocation;
//! * [`module`]: loading the native half from a shared library.

mod macros;

pub mod abi;
pub mod detail;
pub mod dynamic;
pub mod error;
pub mod marshal;
pub mod metadata;
pub mod module;
pub mod proxy;
pub mod router;
pub mod stub;

pub use abi::{
    hresults, to_hresult, ComInterface, Extends, HResult, IBase, IBaseTrait, IBaseVtbl, Iid,
    IID_IBASE,
};
pub use error::{ConstructionError, InteropError, MarshalError};
pub use marshal::bstr::{BStr, BStrRef};
pub use marshal::Value;
pub use metadata::{descriptor_of, InterfaceDescriptor, MethodDescriptor};
pub use module::{ModuleCache, ModuleError, NativeModule};
pub use proxy::{ComPtr, ComRef};
pub use router::{ccw_for_object, query_interface, query_interface_or_null, rcw_from_ptr};
pub use stub::CcwBox;
