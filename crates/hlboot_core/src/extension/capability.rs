//! Typed capability for the extension `setup` export.

use crate::runtime::HostOptions;
use libloading::Library;
use std::ffi::c_void;
use std::fmt::{Debug, Formatter};

/// Default secondary extension library name.
pub const DEFAULT_EXTENSION_LIBRARY: &str = "hlgodot.hdll";
/// Default required export name.
pub const DEFAULT_SETUP_SYMBOL: &str = "setup";

/// C signature of the `setup` export: receives the host options pointer.
pub type SetupFn = unsafe extern "C" fn(*mut c_void);

/// Resolved `setup` entry point.
///
/// Keeps the owning library open for as long as the hook exists, so the
/// function pointer stays valid across every call.
pub struct SetupHook {
    library: String,
    symbol: String,
    entry: SetupFn,
    _lib: Option<Library>,
}

impl SetupHook {
    /// Wraps an entry resolved from `lib`.
    pub(crate) fn from_library(library: &str, symbol: &str, entry: SetupFn, lib: Library) -> Self {
        Self {
            library: library.to_string(),
            symbol: symbol.to_string(),
            entry,
            _lib: Some(lib),
        }
    }

    /// Wraps a statically linked entry.
    pub fn from_fn(library: &str, symbol: &str, entry: extern "C" fn(*mut c_void)) -> Self {
        Self {
            library: library.to_string(),
            symbol: symbol.to_string(),
            entry,
            _lib: None,
        }
    }

    pub fn library(&self) -> &str {
        &self.library
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Raw entry point, for runtimes that dispatch it themselves. Valid while
    /// `self` is alive.
    pub fn entry(&self) -> SetupFn {
        self.entry
    }

    /// Calls the hook once with the host options.
    pub fn invoke(&self, options: HostOptions) {
        // SAFETY: `entry` was checked non-null at resolution and its library
        // is kept loaded by `self`.
        unsafe { (self.entry)(options.as_ptr()) }
    }
}

impl Debug for SetupHook {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetupHook")
            .field("library", &self.library)
            .field("symbol", &self.symbol)
            .field("dynamic", &self._lib.is_some())
            .finish()
    }
}
