//! Scripted VM used by the integration tests.
//!
//! Images are `HLB\x01` followed by a UTF-8 script:
//! - `noop`: entrypoint returns normally.
//! - `fault:<message>:<frame>|<frame>...`: entrypoint raises.
//! - `unlinked`: module initialization fails.
//! - `oom`: module allocation fails.
//! - `noentry`: the module has no entrypoint.
//!
//! A fault raised by the extension `setup` hook is configured on the VM with
//! [`ScriptedVm::fail_setup`].

#![allow(dead_code)]

use hlboot_core::{
    BootError, Closure, ExtensionResolver, HostOptions, SetupHook, VmRuntime,
};
use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

pub const MAGIC: &[u8] = b"HLB\x01";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    Noop,
    Fault { message: String, stack: Vec<String> },
    Unlinked,
    OutOfMemory,
    NoEntry,
}

pub struct ScriptCode {
    script: Script,
    has_bodies: bool,
}

#[derive(Default)]
pub struct ScriptedVm {
    pub global_inits: Cell<usize>,
    pub global_teardowns: Cell<usize>,
    pub double_teardowns: Cell<usize>,
    global_active: Cell<bool>,
    /// Code allocators, bytecode bodies and modules currently alive.
    pub live_allocations: Cell<isize>,
    pub entry_calls: Cell<usize>,
    pub debug_breaks: Cell<usize>,
    pub setup_calls: Cell<usize>,
    /// Setup-hook count observed when the entrypoint ran.
    pub setups_before_entry: Cell<Option<usize>>,
    pub events: RefCell<Vec<&'static str>>,
    modules: RefCell<Vec<Script>>,
    bound_options: Cell<Option<HostOptions>>,
    last_stack: RefCell<Vec<String>>,
    setup_fault: RefCell<Option<(String, Vec<String>)>>,
}

impl ScriptedVm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `setup` call raise `message` with `stack`.
    pub fn fail_setup(&self, message: &str, stack: &[&str]) {
        *self.setup_fault.borrow_mut() = Some((
            message.to_string(),
            stack.iter().map(|frame| frame.to_string()).collect(),
        ));
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.borrow().clone()
    }

    fn record(&self, event: &'static str) {
        self.events.borrow_mut().push(event);
    }

    fn adjust(&self, delta: isize) {
        self.live_allocations.set(self.live_allocations.get() + delta);
    }
}

impl VmRuntime for ScriptedVm {
    type Code = ScriptCode;
    type Module = usize;
    type Signature = u32;
    type Function = usize;
    type Fault = String;

    fn global_init(&self) -> Result<(), String> {
        if self.global_active.get() {
            return Err("global state already active".to_string());
        }
        self.global_active.set(true);
        self.global_inits.set(self.global_inits.get() + 1);
        self.record("global_init");
        Ok(())
    }

    fn global_teardown(&self) {
        if !self.global_active.get() {
            self.double_teardowns.set(self.double_teardowns.get() + 1);
        }
        self.global_active.set(false);
        self.global_teardowns.set(self.global_teardowns.get() + 1);
        self.record("global_teardown");
    }

    fn parse_code(&self, image: &[u8]) -> Result<Self::Code, String> {
        let Some(body) = image.strip_prefix(MAGIC) else {
            return Err("bad magic".to_string());
        };
        let text = std::str::from_utf8(body).map_err(|err| err.to_string())?;
        let script = match text.trim() {
            "noop" => Script::Noop,
            "unlinked" => Script::Unlinked,
            "oom" => Script::OutOfMemory,
            "noentry" => Script::NoEntry,
            other => {
                let Some(rest) = other.strip_prefix("fault:") else {
                    return Err(format!("unknown script `{other}`"));
                };
                let (message, frames) = rest.split_once(':').unwrap_or((rest, ""));
                Script::Fault {
                    message: message.to_string(),
                    stack: frames
                        .split('|')
                        .filter(|frame| !frame.is_empty())
                        .map(str::to_string)
                        .collect(),
                }
            }
        };
        self.adjust(2);
        self.record("parse");
        Ok(ScriptCode {
            script,
            has_bodies: true,
        })
    }

    fn compact_code(&self, code: &mut Self::Code) {
        assert!(code.has_bodies, "bodies compacted twice");
        code.has_bodies = false;
        self.adjust(-1);
        self.record("compact");
    }

    /// Releases the allocator only; bodies that were never compacted leak.
    fn release_code(&self, _code: Self::Code) {
        self.adjust(-1);
        self.record("code_release");
    }

    fn allocate_module(&self, code: &Self::Code) -> Option<Self::Module> {
        if code.script == Script::OutOfMemory {
            return None;
        }
        let mut modules = self.modules.borrow_mut();
        modules.push(code.script.clone());
        self.adjust(1);
        self.record("module_alloc");
        Some(modules.len() - 1)
    }

    fn init_module(&self, module: &mut Self::Module, options: HostOptions) -> Result<(), String> {
        self.record("module_init");
        if self.modules.borrow()[*module] == Script::Unlinked {
            return Err("unresolved native `std@missing`".to_string());
        }
        self.bound_options.set(Some(options));
        Ok(())
    }

    fn free_module(&self, _module: Self::Module) {
        self.adjust(-1);
        self.record("module_free");
    }

    fn entry_closure(&self, module: &Self::Module) -> Result<Closure<Self>, String> {
        if self.modules.borrow()[*module] == Script::NoEntry {
            return Err("module has no entrypoint".to_string());
        }
        Ok(Closure {
            signature: 0,
            function: *module,
            has_value: false,
        })
    }

    fn call(&self, closure: &Closure<Self>) -> Result<(), Self::Fault> {
        self.entry_calls.set(self.entry_calls.get() + 1);
        self.record("entry_call");
        if let Some(options) = self.bound_options.get().filter(|o| !o.is_null()) {
            // SAFETY: tests pass a pointer to a live `HostState`.
            let state = unsafe { &*options.as_ptr().cast::<HostState>() };
            self.setups_before_entry
                .set(Some(state.setup_calls.load(Ordering::SeqCst)));
        }
        match &self.modules.borrow()[closure.function] {
            Script::Fault { message, stack } => {
                *self.last_stack.borrow_mut() = stack.clone();
                Err(message.clone())
            }
            _ => Ok(()),
        }
    }

    fn call_setup(&self, hook: &SetupHook, options: HostOptions) -> Result<(), Self::Fault> {
        self.setup_calls.set(self.setup_calls.get() + 1);
        self.record("setup_call");
        hook.invoke(options);
        match self.setup_fault.borrow_mut().take() {
            Some((message, stack)) => {
                *self.last_stack.borrow_mut() = stack;
                Err(message)
            }
            None => Ok(()),
        }
    }

    fn describe_fault(&self, fault: &Self::Fault) -> String {
        fault.clone()
    }

    fn exception_stack(&self) -> Vec<String> {
        self.last_stack.borrow().clone()
    }

    fn debug_break(&self) {
        self.debug_breaks.set(self.debug_breaks.get() + 1);
    }
}

/// Host options struct handed to the bootstrap in tests.
#[derive(Default)]
pub struct HostState {
    pub setup_calls: AtomicUsize,
}

impl HostState {
    pub fn options(&self) -> HostOptions {
        HostOptions::from_raw((self as *const HostState).cast_mut().cast::<c_void>())
    }
}

extern "C" fn count_setup(options: *mut c_void) {
    if options.is_null() {
        return;
    }
    // SAFETY: tests pass a pointer to a live `HostState`.
    let state = unsafe { &*options.cast::<HostState>() };
    state.setup_calls.fetch_add(1, Ordering::SeqCst);
}

/// Resolver that hands out a statically linked `setup`, or fails on demand.
pub struct StaticResolver {
    pub missing_symbol: bool,
    pub resolutions: Cell<usize>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self {
            missing_symbol: false,
            resolutions: Cell::new(0),
        }
    }

    pub fn without_symbol() -> Self {
        Self {
            missing_symbol: true,
            resolutions: Cell::new(0),
        }
    }
}

impl ExtensionResolver for StaticResolver {
    fn resolve(&self, library: &str, symbol: &str) -> Result<SetupHook, BootError> {
        self.resolutions.set(self.resolutions.get() + 1);
        if self.missing_symbol {
            return Err(BootError::SymbolNotFound {
                library: library.to_string(),
                symbol: symbol.to_string(),
            });
        }
        Ok(SetupHook::from_fn(library, symbol, count_setup))
    }
}

/// Writes `script` as an image under `dir`.
pub fn write_image(dir: &Path, name: &str, script: &str) -> PathBuf {
    let path = dir.join(name);
    let mut bytes = MAGIC.to_vec();
    bytes.extend_from_slice(script.as_bytes());
    std::fs::write(&path, bytes).unwrap();
    path
}
