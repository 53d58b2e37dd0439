//! Terminal entry point.
//!
//! # Responsibility
//! - Run the same bootstrap the host extension runs, without a host.
//! - Map the outcome to a process exit code.

use clap::Parser;
use hlboot_core::config::DEFAULT_IMAGE_PATH;
use hlboot_core::extension::capability::{DEFAULT_EXTENSION_LIBRARY, DEFAULT_SETUP_SYMBOL};
use hlboot_core::{
    core_version, init_from_config, BootConfig, Bootstrap, DylibResolver, HashLinkRuntime,
    HostOptions,
};
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Boot a HashLink bytecode image with its native extension.
#[derive(Parser, Debug)]
#[command(name = "hlboot")]
#[command(version, long_about = None)]
struct Cli {
    /// Bytecode image to run
    #[arg(env = "HLBOOT_IMAGE", default_value = DEFAULT_IMAGE_PATH)]
    image: PathBuf,

    /// Extension library providing host primitives
    #[arg(long, env = "HLBOOT_EXTENSION", default_value = DEFAULT_EXTENSION_LIBRARY)]
    extension: String,

    /// Export called on the extension before the entrypoint
    #[arg(long, env = "HLBOOT_SETUP_SYMBOL", default_value = DEFAULT_SETUP_SYMBOL)]
    symbol: String,

    /// HashLink shared library (defaults to the platform libhl name)
    #[arg(long, env = "HLBOOT_RUNTIME")]
    runtime: Option<String>,

    /// Initialize the module with hot reload enabled
    #[arg(long, env = "HLBOOT_HOT_RELOAD")]
    hot_reload: bool,

    /// Log level (trace|debug|info|warn|error)
    #[arg(long, env = "HLBOOT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Absolute directory for rolling log files
    #[arg(long, env = "HLBOOT_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> BootConfig {
        let defaults = BootConfig::default();
        BootConfig {
            image_path: self.image,
            extension_library: self.extension,
            setup_symbol: self.symbol,
            runtime_library: self.runtime.unwrap_or(defaults.runtime_library),
            hot_reload: self.hot_reload,
            log_level: self.log_level.unwrap_or(defaults.log_level),
            log_dir: self.log_dir,
        }
    }
}

fn main() -> ExitCode {
    let config = Cli::parse().into_config();
    if let Err(err) = init_from_config(&config) {
        eprintln!("hlboot: file logging disabled: {err}");
    }

    // The GC scans the native stack up to this frame.
    let mut stack_top = 0usize;
    let runtime = match HashLinkRuntime::load(
        &config.runtime_library,
        (&mut stack_top as *mut usize).cast::<c_void>(),
        config.hot_reload,
    ) {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let resolver = match config.image_path.parent() {
        Some(dir) if dir != Path::new("") => DylibResolver::with_search_dir(dir),
        _ => DylibResolver::new(),
    };
    let result = Bootstrap::new(&runtime, &resolver, &config).run(HostOptions::null());
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("hlboot {}: {} ({})", core_version(), err.code(), err);
            ExitCode::FAILURE
        }
    }
}
