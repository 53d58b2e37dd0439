//! HashLink runtime binding.
//!
//! # Responsibility
//! - Load `libhl` at run time and resolve the `hl_*` entry points we call.
//! - Expose them through [`VmRuntime`] so the bootstrap stays VM-agnostic.
//!
//! # Invariants
//! - Struct mirrors follow the HashLink 1.13 public headers; only the leading
//!   fields we read are declared for structures we never allocate ourselves.
//! - At most one HashLink global state is active per process.
//! - Function pointers never outlive the `Library` they were resolved from.

use super::{Closure, HostOptions, VmRuntime};
use crate::error::{BootError, BootResult};
use crate::extension::SetupHook;
use libloading::Library;
use log::{debug, info};
use std::ffi::{c_char, c_void, CStr};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, Ordering};

static GLOBAL_ACTIVE: AtomicBool = AtomicBool::new(false);

type Uchar = u16;

/// `HFUN` in `hl_type_kind`.
const HFUN: i32 = 10;

/// Opaque `hl_type`.
#[repr(C)]
pub struct HlType {
    _private: [u8; 0],
}

/// Opaque `vdynamic`.
#[repr(C)]
pub struct VDynamic {
    _private: [u8; 0],
}

/// `hl_type` viewed through the `fun` arm of its union.
#[repr(C)]
#[allow(dead_code)]
struct HlFunType {
    kind: i32,
    fun: *mut HlTypeFun,
    vobj_proto: *mut *mut c_void,
    mark_bits: *mut u32,
}

#[repr(C)]
#[allow(dead_code)]
struct HlClosureKind {
    kind: i32,
    p: *mut c_void,
}

#[repr(C)]
#[allow(dead_code)]
struct HlClosureFun {
    args: *mut *mut HlType,
    ret: *mut HlType,
    nargs: i32,
    parent: *mut HlType,
}

/// `hl_type_fun`, including the storage HashLink uses for closure types.
#[repr(C)]
#[allow(dead_code)]
struct HlTypeFun {
    args: *mut *mut HlType,
    ret: *mut HlType,
    nargs: i32,
    parent: *mut HlType,
    closure_type: HlClosureKind,
    closure: HlClosureFun,
}

impl HlTypeFun {
    fn new(args: *mut *mut HlType, nargs: i32, ret: *mut HlType, parent: *mut HlType) -> Self {
        Self {
            args,
            ret,
            nargs,
            parent,
            closure_type: HlClosureKind {
                kind: 0,
                p: ptr::null_mut(),
            },
            closure: HlClosureFun {
                args: ptr::null_mut(),
                ret: ptr::null_mut(),
                nargs: 0,
                parent: ptr::null_mut(),
            },
        }
    }
}

impl HlFunType {
    fn new(fun: *mut HlTypeFun) -> Self {
        Self {
            kind: HFUN,
            fun,
            vobj_proto: ptr::null_mut(),
            mark_bits: ptr::null_mut(),
        }
    }
}

#[repr(C)]
#[allow(dead_code)]
struct HlAlloc {
    cur: *mut c_void,
}

#[repr(C)]
#[allow(dead_code)]
struct HlFunction {
    findex: i32,
    nregs: i32,
    nops: i32,
    ref_: i32,
    ty: *mut HlType,
    regs: *mut *mut HlType,
    ops: *mut c_void,
    debug: *mut i32,
    obj: *mut c_void,
    field: *const c_void,
}

#[repr(C)]
#[allow(dead_code)]
pub struct HlCode {
    version: i32,
    nints: i32,
    nfloats: i32,
    nstrings: i32,
    nbytes: i32,
    ntypes: i32,
    nglobals: i32,
    nnatives: i32,
    nfunctions: i32,
    nconstants: i32,
    entrypoint: i32,
    ndebugfiles: i32,
    hasdebug: u8,
    ints: *mut i32,
    floats: *mut f64,
    strings: *mut *mut c_char,
    strings_lens: *mut i32,
    bytes: *mut c_char,
    bytes_pos: *mut i32,
    debugfiles: *mut *mut c_char,
    debugfiles_lens: *mut i32,
    ustrings: *mut *mut Uchar,
    types: *mut c_void,
    globals: *mut *mut HlType,
    natives: *mut c_void,
    functions: *mut HlFunction,
    constants: *mut c_void,
    alloc: HlAlloc,
    falloc: HlAlloc,
}

/// Leading fields of `hl_module`.
#[repr(C)]
#[allow(dead_code)]
pub struct HlModule {
    code: *mut HlCode,
    codesize: i32,
    globals_size: i32,
    globals_indexes: *mut i32,
    globals_data: *mut u8,
    functions_ptrs: *mut *mut c_void,
    functions_indexes: *mut i32,
}

#[repr(C)]
#[allow(dead_code)]
struct VClosure {
    t: *mut HlType,
    fun: *mut c_void,
    has_value: i32,
    #[cfg(target_pointer_width = "64")]
    stack_count: i32,
    value: *mut c_void,
}

/// Header of `varray`; elements follow it in memory.
#[repr(C)]
#[allow(dead_code)]
struct VArray {
    t: *mut HlType,
    at: *mut HlType,
    size: i32,
    pad: i32,
}

struct HlApi {
    global_init: unsafe extern "C" fn(),
    global_free: unsafe extern "C" fn(),
    register_thread: unsafe extern "C" fn(*mut c_void),
    code_read: unsafe extern "C" fn(*const u8, i32, *mut *mut c_char) -> *mut HlCode,
    code_free: unsafe extern "C" fn(*mut HlCode),
    free: unsafe extern "C" fn(*mut HlAlloc),
    module_alloc: unsafe extern "C" fn(*mut HlCode) -> *mut HlModule,
    module_init: unsafe extern "C" fn(*mut HlModule, i32) -> i32,
    module_free: unsafe extern "C" fn(*mut HlModule),
    dyn_call_safe:
        unsafe extern "C" fn(*mut VClosure, *mut *mut VDynamic, i32, *mut u8) -> *mut VDynamic,
    exception_stack: unsafe extern "C" fn() -> *mut VArray,
    to_string: unsafe extern "C" fn(*mut VDynamic) -> *const Uchar,
    debug_break: unsafe extern "C" fn(),
    bytes_type: *mut HlType,
    void_type: *mut HlType,
}

impl HlApi {
    fn resolve(lib: &Library) -> Result<Self, String> {
        Ok(Self {
            global_init: export(lib, "hl_global_init")?,
            global_free: export(lib, "hl_global_free")?,
            register_thread: export(lib, "hl_register_thread")?,
            code_read: export(lib, "hl_code_read")?,
            code_free: export(lib, "hl_code_free")?,
            free: export(lib, "hl_free")?,
            module_alloc: export(lib, "hl_module_alloc")?,
            module_init: export(lib, "hl_module_init")?,
            module_free: export(lib, "hl_module_free")?,
            dyn_call_safe: export(lib, "hl_dyn_call_safe")?,
            exception_stack: export(lib, "hl_exception_stack")?,
            to_string: export(lib, "hl_to_string")?,
            debug_break: export(lib, "hl_debug_break")?,
            bytes_type: export(lib, "hlt_bytes")?,
            void_type: export(lib, "hlt_void")?,
        })
    }
}

fn export<T: Copy>(lib: &Library, name: &str) -> Result<T, String> {
    // SAFETY: every `T` requested above matches the C prototype in hl.h.
    unsafe { lib.get::<T>(name.as_bytes()) }
        .map(|symbol| *symbol)
        .map_err(|err| format!("missing export `{name}`: {err}"))
}

/// Parsed `hl_code` owned by the bootstrap.
pub struct HlCodeHandle(NonNull<HlCode>);

/// HashLink VM loaded from a shared library.
pub struct HashLinkRuntime {
    api: HlApi,
    stack_top: *mut c_void,
    hot_reload: bool,
    _lib: Option<Library>,
}

impl HashLinkRuntime {
    /// Loads `libhl` from `library`.
    ///
    /// `stack_top` must point into the frame that calls into the bootstrap; the
    /// HashLink GC scans the native stack up to it.
    pub fn load(library: &str, stack_top: *mut c_void, hot_reload: bool) -> BootResult<Self> {
        // SAFETY: loading libhl runs no initializers beyond its static ctors.
        let lib = unsafe { Library::new(library) }
            .map_err(|err| BootError::RuntimeUnavailable(format!("{library}: {err}")))?;
        let api = HlApi::resolve(&lib).map_err(BootError::RuntimeUnavailable)?;
        info!("event=runtime_load module=hashlink status=ok library={library}");
        Ok(Self {
            api,
            stack_top,
            hot_reload,
            _lib: Some(lib),
        })
    }

    /// Calls `raw` through `hl_dyn_call_safe` with no explicit arguments.
    fn call_guarded(&self, raw: &mut VClosure) -> Result<(), *mut VDynamic> {
        // Wider than `bool` so the write is in bounds whatever width the
        // headers were built with.
        let mut is_exception: u32 = 0;
        // SAFETY: `raw` describes a callable whose type matches its arguments.
        let result = unsafe {
            (self.api.dyn_call_safe)(
                raw,
                ptr::null_mut(),
                0,
                ptr::addr_of_mut!(is_exception).cast::<u8>(),
            )
        };
        if is_exception != 0 {
            Err(result)
        } else {
            Ok(())
        }
    }

    /// Platform file name of the HashLink shared library.
    pub fn default_library_name() -> &'static str {
        if cfg!(target_os = "windows") {
            "libhl.dll"
        } else if cfg!(target_os = "macos") {
            "libhl.dylib"
        } else {
            "libhl.so"
        }
    }
}

impl VmRuntime for HashLinkRuntime {
    type Code = HlCodeHandle;
    type Module = NonNull<HlModule>;
    type Signature = *mut HlType;
    type Function = *mut c_void;
    type Fault = *mut VDynamic;

    fn global_init(&self) -> Result<(), String> {
        if GLOBAL_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err("HashLink global state is already active in this process".to_string());
        }
        // SAFETY: guarded by GLOBAL_ACTIVE; stack_top comes from the caller's frame.
        unsafe {
            (self.api.global_init)();
            (self.api.register_thread)(self.stack_top);
        }
        Ok(())
    }

    fn global_teardown(&self) {
        // The thread stays registered: hl_global_free reports a global_lock
        // error while other threads (a debugger) are still attached.
        // SAFETY: only reached after a successful global_init.
        unsafe { (self.api.global_free)() }
        GLOBAL_ACTIVE.store(false, Ordering::Release);
    }

    fn parse_code(&self, image: &[u8]) -> Result<Self::Code, String> {
        let size = i32::try_from(image.len())
            .map_err(|_| format!("image of {} bytes exceeds the 2 GiB limit", image.len()))?;
        let mut message: *mut c_char = ptr::null_mut();
        // SAFETY: `image` is valid for `size` bytes; hl_code_read copies what it keeps.
        let code = unsafe { (self.api.code_read)(image.as_ptr(), size, &mut message) };
        match NonNull::new(code) {
            Some(code) => Ok(HlCodeHandle(code)),
            None if message.is_null() => Err("invalid bytecode".to_string()),
            // SAFETY: hl_code_read reports errors as NUL-terminated static strings.
            None => Err(unsafe { CStr::from_ptr(message) }
                .to_string_lossy()
                .into_owned()),
        }
    }

    fn compact_code(&self, code: &mut Self::Code) {
        // SAFETY: releases only the function-body allocator; `alloc` stays valid.
        unsafe { (self.api.code_free)(code.0.as_ptr()) }
    }

    fn release_code(&self, code: Self::Code) {
        // SAFETY: the hl_code struct itself lives in `alloc`, so nothing may
        // touch `code` after this call; we consume the handle.
        unsafe { (self.api.free)(ptr::addr_of_mut!((*code.0.as_ptr()).alloc)) }
    }

    fn allocate_module(&self, code: &Self::Code) -> Option<Self::Module> {
        // SAFETY: `code` came from hl_code_read and has not been released.
        NonNull::new(unsafe { (self.api.module_alloc)(code.0.as_ptr()) })
    }

    fn init_module(&self, module: &mut Self::Module, options: HostOptions) -> Result<(), String> {
        debug!(
            "event=module_init module=hashlink status=start hot_reload={} host_options={}",
            self.hot_reload,
            !options.is_null()
        );
        // SAFETY: `module` came from hl_module_alloc.
        let linked = unsafe { (self.api.module_init)(module.as_ptr(), i32::from(self.hot_reload)) };
        if linked == 0 {
            return Err("hl_module_init could not resolve module references".to_string());
        }
        Ok(())
    }

    fn free_module(&self, module: Self::Module) {
        // SAFETY: consumed handle; freed exactly once.
        unsafe { (self.api.module_free)(module.as_ptr()) }
    }

    fn entry_closure(&self, module: &Self::Module) -> Result<Closure<Self>, String> {
        // SAFETY: module and code stay alive until free_module/release_code;
        // the function table lives in `alloc`, which compact_code keeps.
        unsafe {
            let module = module.as_ref();
            let code = &*module.code;
            if code.entrypoint < 0 || code.entrypoint >= code.nfunctions + code.nnatives {
                return Err(format!("entrypoint index {} out of range", code.entrypoint));
            }
            let entry = code.entrypoint as usize;
            let index = *module.functions_indexes.add(entry);
            if index < 0 || index >= code.nfunctions {
                return Err(format!("entrypoint {entry} is not a bytecode function"));
            }
            let function = *module.functions_ptrs.add(entry);
            if function.is_null() {
                return Err(format!("entrypoint {entry} has no compiled body"));
            }
            Ok(Closure {
                signature: (*code.functions.add(index as usize)).ty,
                function,
                has_value: false,
            })
        }
    }

    fn call(&self, closure: &Closure<Self>) -> Result<(), Self::Fault> {
        let mut raw = VClosure {
            t: closure.signature,
            fun: closure.function,
            has_value: i32::from(closure.has_value),
            #[cfg(target_pointer_width = "64")]
            stack_count: 0,
            value: ptr::null_mut(),
        };
        self.call_guarded(&mut raw)
    }

    fn call_setup(&self, hook: &SetupHook, options: HostOptions) -> Result<(), Self::Fault> {
        // `setup` is bound as a closure over the options pointer: the full
        // type is `(bytes) -> void`, the bound type takes no arguments and
        // names the full type as its parent.
        let mut args = [self.api.bytes_type];
        let mut full_fun = HlTypeFun::new(args.as_mut_ptr(), 1, self.api.void_type, ptr::null_mut());
        let mut full = HlFunType::new(ptr::addr_of_mut!(full_fun));
        let mut bound_fun = HlTypeFun::new(
            args.as_mut_ptr().wrapping_add(1),
            0,
            self.api.void_type,
            ptr::addr_of_mut!(full).cast::<HlType>(),
        );
        let mut bound = HlFunType::new(ptr::addr_of_mut!(bound_fun));
        let mut raw = VClosure {
            t: ptr::addr_of_mut!(bound).cast::<HlType>(),
            fun: hook.entry() as *mut c_void,
            has_value: 1,
            #[cfg(target_pointer_width = "64")]
            stack_count: 0,
            value: options.as_ptr(),
        };
        debug!(
            "event=extension_setup module=hashlink status=start symbol={}",
            hook.symbol()
        );
        // Types above live on this frame for the whole guarded call.
        self.call_guarded(&mut raw)
    }

    fn describe_fault(&self, fault: &Self::Fault) -> String {
        // SAFETY: hl_to_string accepts any vdynamic, including null.
        unsafe { read_uchar((self.api.to_string)(*fault)) }
    }

    fn exception_stack(&self) -> Vec<String> {
        // SAFETY: the array holds `size` uchar* entries right after its header.
        unsafe {
            let array = (self.api.exception_stack)();
            if array.is_null() {
                return Vec::new();
            }
            let len = usize::try_from((*array).size).unwrap_or(0);
            let items = array.add(1).cast::<*const Uchar>();
            (0..len).map(|i| read_uchar(*items.add(i))).collect()
        }
    }

    fn debug_break(&self) {
        // SAFETY: no-op unless a debugger is attached.
        unsafe { (self.api.debug_break)() }
    }
}

/// Reads a NUL-terminated UTF-16 HashLink string.
///
/// # Safety
/// `value` must be null or point to a NUL-terminated `uchar` sequence.
unsafe fn read_uchar(value: *const Uchar) -> String {
    if value.is_null() {
        return "null".to_string();
    }
    let mut len = 0usize;
    while *value.add(len) != 0 {
        len += 1;
    }
    String::from_utf16_lossy(std::slice::from_raw_parts(value, len))
}
