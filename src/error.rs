use thiserror::Error;

use crate::abi::{hresults, HResult, Iid};
use crate::module::ModuleError;

/// Failure taxonomy for boundary crossings.
///
/// `NoInterface` is the one condition every layer must keep distinguishable:
/// `query_interface_or_null` converts exactly it, and nothing else, into a
/// `None`. Every other failure crosses the boundary with its code intact.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InteropError {
    #[error("interface {0} is not supported by the object")]
    NoInterface(Iid),

    #[error("marshalling failed: {0}")]
    Marshal(#[from] MarshalError),

    #[error("interface metadata construction failed: {0}")]
    Construction(#[from] ConstructionError),

    #[error("native module error: {0}")]
    Module(#[from] ModuleError),

    #[error("call table slot {0} is out of range")]
    InvalidSlot(usize),

    #[error("interface has no method named '{0}'")]
    UnknownMethod(String),

    #[error("native call failed with {0}")]
    Native(HResult),
}

impl InteropError {
    /// Maps a failing status code onto the taxonomy. Codes without a
    /// dedicated variant are carried verbatim so nothing is lost in
    /// translation.
    pub fn from_hresult(hr: HResult) -> Self {
        match hr {
            hresults::E_NOINTERFACE => InteropError::NoInterface(Iid::NIL),
            other => InteropError::Native(other),
        }
    }

    /// The native status code for this failure.
    pub fn hresult(&self) -> HResult {
        match self {
            InteropError::NoInterface(_) => hresults::E_NOINTERFACE,
            InteropError::Marshal(_) => hresults::E_MARSHAL,
            InteropError::Construction(_) => hresults::E_CONSTRUCTION,
            InteropError::Module(_) => hresults::E_MODULE,
            InteropError::InvalidSlot(_) | InteropError::UnknownMethod(_) => {
                hresults::E_UNEXPECTED
            }
            InteropError::Native(hr) => *hr,
        }
    }
}

/// A value could not cross the boundary. Surfaced to the caller, never
/// retried.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MarshalError {
    #[error("string buffer is not valid UTF-8")]
    InvalidUtf8,

    #[error("string buffer pointer is null")]
    NullBuffer,

    #[error("expected a {expected} value, got {got}")]
    TypeMismatch {
        expected: &'static str,
        got: &'static str,
    },

    #[error("method takes {expected} arguments, {got} were supplied")]
    ArityMismatch { expected: usize, got: usize },
}

/// Interface metadata could not be built. Fatal to that interface type, but
/// never to the cache entries of other types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConstructionError {
    #[error("interface identifier is nil")]
    NilIdentifier,

    #[error("call table has {0} slots, exceeding the supported maximum")]
    TableTooLarge(usize),
}
