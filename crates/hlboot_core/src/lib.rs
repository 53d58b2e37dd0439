//! Bootstrap loader that runs a HashLink bytecode program inside a host
//! process that loads native extensions.
//! This crate owns the load, link, run and teardown sequence.

pub mod bootstrap;
pub mod config;
pub mod context;
pub mod error;
pub mod extension;
pub mod image;
pub mod logging;
pub mod runtime;
pub mod trap;

pub use bootstrap::Bootstrap;
pub use config::BootConfig;
pub use context::{ExecutionContext, LoadedModule, ParsedCode};
pub use error::{BootError, BootResult};
pub use extension::{DylibResolver, ExtensionResolver, SetupFn, SetupHook};
pub use image::{load_code, read_from, read_image, BytecodeImage};
pub use logging::{default_log_level, init_from_config, init_logging, logging_status};
pub use runtime::hashlink::HashLinkRuntime;
pub use runtime::{Closure, HostOptions, VmRuntime};
pub use trap::{report_fault, FaultRecord, FaultTrap, TrapOutcome};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
