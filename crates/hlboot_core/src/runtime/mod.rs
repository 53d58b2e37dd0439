//! Virtual machine seam.
//!
//! The bootstrap never looks inside the VM. Everything it needs is expressed as
//! the alloc/free/run primitives of [`VmRuntime`], so the HashLink binding and
//! test doubles plug into the same orchestrator.

use crate::extension::SetupHook;
use std::ffi::c_void;

pub mod hashlink;

/// Opaque host-supplied options pointer.
///
/// The host owns the pointee; this crate only forwards it to the module
/// initializer and the extension `setup` hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostOptions(*mut c_void);

impl HostOptions {
    /// Wraps a raw options pointer received from the host.
    pub fn from_raw(ptr: *mut c_void) -> Self {
        Self(ptr)
    }

    /// Options value for runs that have no host (CLI, tests).
    pub fn null() -> Self {
        Self(std::ptr::null_mut())
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

/// Callable reference used to dispatch the entrypoint.
pub struct Closure<V: VmRuntime + ?Sized> {
    pub signature: V::Signature,
    pub function: V::Function,
    pub has_value: bool,
}

/// Primitives the bootstrap needs from a bytecode VM.
///
/// Methods take `&self` because the state they touch is process-wide inside
/// the VM, not owned by the handle.
pub trait VmRuntime {
    /// Parsed bytecode program.
    type Code;
    /// Live module instantiated from [`Self::Code`].
    type Module;
    /// Function type descriptor.
    type Signature: Copy;
    /// Resolved function pointer.
    type Function: Copy;
    /// Uncaught fault value.
    type Fault;

    /// Creates GlobalVMState for this process.
    fn global_init(&self) -> Result<(), String>;

    /// Releases GlobalVMState.
    fn global_teardown(&self);

    /// Parses a raw image. `Err` carries the parser's reason.
    fn parse_code(&self, image: &[u8]) -> Result<Self::Code, String>;

    /// Drops bytecode bodies that are no longer needed once a module is linked.
    fn compact_code(&self, code: &mut Self::Code);

    /// Releases the allocator that backs `code`.
    fn release_code(&self, code: Self::Code);

    /// Instantiates a module. `None` means the VM ran out of resources.
    fn allocate_module(&self, code: &Self::Code) -> Option<Self::Module>;

    /// Binds host options and links the module.
    fn init_module(&self, module: &mut Self::Module, options: HostOptions) -> Result<(), String>;

    fn free_module(&self, module: Self::Module);

    /// Resolves the closure for the module's entrypoint.
    fn entry_closure(&self, module: &Self::Module) -> Result<Closure<Self>, String>;

    /// Calls `closure` with no arguments, returning the fault value if one
    /// escaped.
    fn call(&self, closure: &Closure<Self>) -> Result<(), Self::Fault>;

    /// Calls the extension `setup` hook with `options`, catching any fault it
    /// raises the same way [`Self::call`] does.
    fn call_setup(&self, hook: &SetupHook, options: HostOptions) -> Result<(), Self::Fault>;

    /// String representation of a fault value.
    fn describe_fault(&self, fault: &Self::Fault) -> String;

    /// Call-site labels of the most recent fault, innermost first.
    fn exception_stack(&self) -> Vec<String>;

    /// Breaks into an attached debugger, if any.
    fn debug_break(&self);
}
