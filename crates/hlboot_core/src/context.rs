//! Execution context manager.
//!
//! # Responsibility
//! - Own GlobalVMState for the duration of one bootstrap run.
//! - Own the parsed code and the module built from it.
//!
//! # Invariants
//! - GlobalVMState is initialized before any module is allocated and torn
//!   down exactly once, after the last module and code allocator are gone.
//! - At most one module is alive per context.
//! - A module is freed before the code allocator that backs it.
//! - Bytecode bodies are released on every path, compacted or not.
//!
//! Teardown order is enforced by borrows: [`ParsedCode`] and [`LoadedModule`]
//! borrow the context, so the context cannot be torn down while they live.

use crate::error::{BootError, BootResult};
use crate::image;
use crate::runtime::{Closure, HostOptions, VmRuntime};
use log::{debug, error, info};
use std::cell::Cell;
use std::path::Path;

/// Process-wide VM state for one bootstrap run.
pub struct ExecutionContext<'vm, V: VmRuntime> {
    vm: &'vm V,
    module_live: Cell<bool>,
}

impl<'vm, V: VmRuntime> ExecutionContext<'vm, V> {
    /// Initializes GlobalVMState.
    ///
    /// # Errors
    /// - `RuntimeUnavailable` when the VM refuses to initialize, e.g. because
    ///   another context is already active in this process.
    pub fn global_init(vm: &'vm V) -> BootResult<Self> {
        vm.global_init().map_err(|reason| {
            error!(
                "event=global_init module=context status=error error_code=runtime_unavailable error={reason}"
            );
            BootError::RuntimeUnavailable(reason)
        })?;
        info!("event=global_init module=context status=ok");
        Ok(Self {
            vm,
            module_live: Cell::new(false),
        })
    }

    pub fn vm(&self) -> &'vm V {
        self.vm
    }

    /// Reads and parses a bytecode image.
    pub fn load_code(&self, path: &Path) -> BootResult<ParsedCode<'_, V>> {
        let code = image::load_code(self.vm, path)?;
        Ok(ParsedCode {
            vm: self.vm,
            code: Some(code),
            compacted: false,
        })
    }

    /// Builds a module from `code`; the module takes ownership of it.
    ///
    /// # Errors
    /// - `AllocationError` when the VM is out of resources or a module is
    ///   already alive in this context. `code` is released in both cases.
    pub fn allocate_module<'ctx>(
        &'ctx self,
        code: ParsedCode<'ctx, V>,
    ) -> BootResult<LoadedModule<'ctx, 'vm, V>> {
        if self.module_live.get() {
            return Err(BootError::AllocationError(
                "a module is already alive in this context".to_string(),
            ));
        }
        let Some(module) = code.code.as_ref().and_then(|c| self.vm.allocate_module(c)) else {
            error!(
                "event=module_alloc module=context status=error error_code=module_alloc_failed"
            );
            return Err(BootError::AllocationError(
                "the VM could not allocate a module".to_string(),
            ));
        };
        self.module_live.set(true);
        debug!("event=module_alloc module=context status=ok");
        Ok(LoadedModule {
            ctx: self,
            module: Some(module),
            code,
        })
    }

    /// Releases GlobalVMState. Dropping the context has the same effect.
    pub fn global_teardown(self) {
        drop(self);
    }
}

impl<V: VmRuntime> Drop for ExecutionContext<'_, V> {
    fn drop(&mut self) {
        self.vm.global_teardown();
        info!("event=global_teardown module=context status=ok");
    }
}

/// Parsed bytecode whose bodies and allocator are released on drop.
pub struct ParsedCode<'ctx, V: VmRuntime> {
    vm: &'ctx V,
    code: Option<V::Code>,
    compacted: bool,
}

impl<V: VmRuntime> ParsedCode<'_, V> {
    /// Releases bytecode bodies; the backing allocator stays alive.
    fn compact(&mut self) {
        if self.compacted {
            return;
        }
        if let Some(code) = self.code.as_mut() {
            self.vm.compact_code(code);
            self.compacted = true;
        }
    }
}

impl<V: VmRuntime> Drop for ParsedCode<'_, V> {
    fn drop(&mut self) {
        // Releasing the allocator does not free bodies that were never compacted.
        self.compact();
        if let Some(code) = self.code.take() {
            self.vm.release_code(code);
            debug!("event=code_release module=context status=ok");
        }
    }
}

/// Live module plus the code it was built from.
pub struct LoadedModule<'ctx, 'vm, V: VmRuntime> {
    ctx: &'ctx ExecutionContext<'vm, V>,
    module: Option<V::Module>,
    code: ParsedCode<'ctx, V>,
}

impl<V: VmRuntime> LoadedModule<'_, '_, V> {
    /// Binds host options and links the module.
    ///
    /// # Errors
    /// - `LinkError` when the module references cannot be satisfied. The
    ///   module stays valid for [`Self::free_module`].
    pub fn init_module(&mut self, options: HostOptions) -> BootResult<()> {
        let vm = self.ctx.vm;
        let Some(module) = self.module.as_mut() else {
            return Err(BootError::LinkError("module was already freed".to_string()));
        };
        vm.init_module(module, options).map_err(|reason| {
            error!(
                "event=module_init module=context status=error error_code=module_link_failed error={reason}"
            );
            BootError::LinkError(reason)
        })?;
        info!("event=module_init module=context status=ok");
        Ok(())
    }

    /// Drops bytecode bodies the linked module no longer needs.
    pub fn compact_code(&mut self) {
        self.code.compact();
    }

    /// Builds the closure that dispatches the module entrypoint.
    pub fn entry_closure(&self) -> BootResult<Closure<V>> {
        let module = self
            .module
            .as_ref()
            .ok_or_else(|| BootError::LinkError("module was already freed".to_string()))?;
        self.ctx
            .vm
            .entry_closure(module)
            .map_err(BootError::LinkError)
    }

    /// Frees the module, then the code allocator behind it.
    pub fn free_module(self) {
        drop(self);
    }
}

impl<V: VmRuntime> Drop for LoadedModule<'_, '_, V> {
    fn drop(&mut self) {
        if let Some(module) = self.module.take() {
            self.ctx.vm.free_module(module);
            self.ctx.module_live.set(false);
            debug!("event=module_free module=context status=ok");
        }
    }
}
