//! C ABI surface called by the host.
//!
//! # Responsibility
//! - Export the host's extension initializer and run the bootstrap from it.
//! - Resolve configuration once per process.
//!
//! # Invariants
//! - Exported functions never unwind into the host.
//! - Every failure leaves a line on stdout; the host only sees a void return.

use hlboot_core::{
    init_from_config, BootConfig, BootError, BootResult, Bootstrap, DylibResolver,
    HashLinkRuntime, HostOptions,
};
use log::{error, info};
use std::ffi::{c_char, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::OnceLock;

static BOOT_CONFIG: OnceLock<BootConfig> = OnceLock::new();

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");

/// Host initializer.
///
/// Loads `main.hl`, runs `setup` from the extension library, then runs the
/// program entrypoint. Paths come from `HLBOOT_*` variables or the defaults.
///
/// # Safety
/// `options` must be null or point to the host's init options for the whole
/// call; it is forwarded untouched to the VM and the extension `setup`.
#[no_mangle]
pub unsafe extern "C" fn godot_gdnative_init(options: *mut c_void) {
    let options = HostOptions::from_raw(options);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        init_extension(resolve_config(), options)
    }));
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            error!(
                "event=host_init module=ffi status=error error_code={}",
                err.code()
            );
        }
        Err(_) => {
            println!("hlboot: bootstrap panicked; extension not initialized");
        }
    }
}

/// NUL-terminated crate version.
#[no_mangle]
pub extern "C" fn hlboot_version() -> *const c_char {
    VERSION.as_ptr().cast()
}

fn resolve_config() -> &'static BootConfig {
    BOOT_CONFIG.get_or_init(BootConfig::from_env)
}

fn init_extension(config: &BootConfig, options: HostOptions) -> BootResult<()> {
    if let Err(err) = init_from_config(config) {
        println!("hlboot: file logging disabled: {err}");
    }
    info!(
        "event=host_init module=ffi status=start host_options={}",
        !options.is_null()
    );

    // The GC scans the native stack up to this frame.
    let mut stack_top = 0usize;
    let runtime = HashLinkRuntime::load(
        &config.runtime_library,
        (&mut stack_top as *mut usize).cast::<c_void>(),
        config.hot_reload,
    )
    .inspect_err(|err: &BootError| println!("{err}"))?;

    let resolver = match config.image_path.parent() {
        Some(dir) if dir != Path::new("") => DylibResolver::with_search_dir(dir),
        _ => DylibResolver::new(),
    };
    let result = Bootstrap::new(&runtime, &resolver, config).run(options);
    result
}
