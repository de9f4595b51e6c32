//! Loading the native half of the system.
//!
//! A native module is a shared library exporting one or more factory entry
//! points with the `unsafe extern "C" fn(*mut *mut c_void) -> HResult`
//! convention: on success the export writes an already-retained interface
//! pointer into the out slot.

use std::os::raw::c_void;
use std::path::{Path, PathBuf};
use std::ptr::null_mut;
use std::sync::Arc;

use dashmap::DashMap;
use libloading::{Library, Symbol};
use thiserror::Error;
use tracing::debug;

use crate::abi::{hresults, ComInterface, HResult};
use crate::error::InteropError;
use crate::proxy::ComPtr;

/// The factory export convention.
pub type EntryPointFn = unsafe extern "C" fn(*mut *mut c_void) -> HResult;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModuleError {
    #[error("unable to find library '{0}'")]
    LibraryNotFound(String),

    #[error("unable to find entry point '{1}' in library '{0}'")]
    SymbolNotFound(String, String),

    #[error("failed to load library '{0}': {1}")]
    LoadError(String, String),
}

/// A loaded native library.
pub struct NativeModule {
    name: String,
    library: Library,
}

impl std::fmt::Debug for NativeModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NativeModule({})", self.name)
    }
}

impl NativeModule {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ModuleError> {
        let path = path.as_ref();
        let name = path.display().to_string();
        debug!(module = %name, "loading native module");
        let library = unsafe { Library::new(path) }
            .map_err(|e| ModuleError::LoadError(name.clone(), e.to_string()))?;
        Ok(Self { name, library })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Calls the named factory export and wraps the interface pointer it
    /// produces. The export's retain transfers to the returned handle.
    pub fn entry_point<T: ComInterface>(&self, symbol: &str) -> Result<ComPtr<T>, InteropError> {
        let entry: Symbol<'_, EntryPointFn> = unsafe { self.library.get(symbol.as_bytes()) }
            .map_err(|_| {
                ModuleError::SymbolNotFound(self.name.clone(), symbol.to_string())
            })?;

        let mut out: *mut c_void = null_mut();
        let hr = unsafe { entry(&mut out) };
        hr.into_result()?;
        if out.is_null() {
            return Err(InteropError::Native(hresults::E_POINTER));
        }
        debug!(module = %self.name, symbol, interface = T::interface_name(), "resolved entry point");
        Ok(unsafe { ComPtr::from_raw(out as *mut T, true) })
    }
}

/// Loads native modules by short name from a root directory, keeping each
/// library alive for the process once loaded.
#[derive(Debug)]
pub struct ModuleCache {
    root: PathBuf,
    libraries: DashMap<String, Arc<NativeModule>>,
}

impl ModuleCache {
    pub fn new(root: impl AsRef<str>) -> Self {
        Self {
            root: PathBuf::from(root.as_ref()),
            libraries: DashMap::new(),
        }
    }

    fn find_library_path(&self, name: &str) -> Option<PathBuf> {
        let exact = self.root.join(name);
        if exact.exists() {
            return Some(exact);
        }

        #[cfg(target_os = "linux")]
        let extensions = &[".so", ".dylib", ".dll"];
        #[cfg(target_os = "macos")]
        let extensions = &[".dylib", ".so", ".dll"];
        #[cfg(target_os = "windows")]
        let extensions = &[".dll", ".so", ".dylib"];
        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        let extensions = &[".so", ".dll", ".dylib"];

        for prefix in ["lib", ""] {
            for ext in extensions {
                let path = self.root.join(format!("{prefix}{name}{ext}"));
                if path.exists() {
                    return Some(path);
                }
            }
        }

        // Versioned files such as libfoo.so.1.2
        if let Ok(entries) = self.root.read_dir() {
            for entry in entries.filter_map(Result::ok) {
                let file_name = entry.file_name();
                let s = file_name.to_string_lossy();
                if s.starts_with(name) && (s.contains(".so.") || s.contains(".dylib.")) {
                    return Some(entry.path());
                }
            }
        }

        None
    }

    pub fn get(&self, name: &str) -> Result<Arc<NativeModule>, ModuleError> {
        if let Some(module) = self.libraries.get(name) {
            return Ok(Arc::clone(&module));
        }

        let path = self
            .find_library_path(name)
            .ok_or_else(|| ModuleError::LibraryNotFound(name.to_string()))?;
        let module = Arc::new(NativeModule::open(path)?);
        self.libraries
            .entry(name.to_string())
            .or_insert_with(|| Arc::clone(&module));
        Ok(Arc::clone(
            &self.libraries.get(name).expect("just inserted"),
        ))
    }

    /// Resolves `symbol` in `name` and calls it as a factory entry point.
    pub fn entry_point<T: ComInterface>(
        &self,
        name: &str,
        symbol: &str,
    ) -> Result<ComPtr<T>, InteropError> {
        let module = self.get(name)?;
        module.entry_point::<T>(symbol)
    }
}
