//! Bootstrap configuration.
//!
//! Defaults match the layout a host ships with: `main.hl` and `hlgodot.hdll`
//! next to the host executable. Environment variables override them.

use crate::extension::capability::{DEFAULT_EXTENSION_LIBRARY, DEFAULT_SETUP_SYMBOL};
use crate::logging::default_log_level;
use crate::runtime::hashlink::HashLinkRuntime;
use std::path::PathBuf;

pub const DEFAULT_IMAGE_PATH: &str = "main.hl";

pub const ENV_IMAGE: &str = "HLBOOT_IMAGE";
pub const ENV_EXTENSION: &str = "HLBOOT_EXTENSION";
pub const ENV_SETUP_SYMBOL: &str = "HLBOOT_SETUP_SYMBOL";
pub const ENV_RUNTIME: &str = "HLBOOT_RUNTIME";
pub const ENV_HOT_RELOAD: &str = "HLBOOT_HOT_RELOAD";
pub const ENV_LOG_LEVEL: &str = "HLBOOT_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "HLBOOT_LOG_DIR";

/// Inputs of one bootstrap run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootConfig {
    /// Bytecode image to load.
    pub image_path: PathBuf,
    /// Secondary extension library name or path.
    pub extension_library: String,
    /// Export resolved from the extension and called before the entrypoint.
    pub setup_symbol: String,
    /// HashLink shared library name or path.
    pub runtime_library: String,
    /// Passed through to module initialization.
    pub hot_reload: bool,
    pub log_level: String,
    /// Rolling log directory; `None` disables file logging.
    pub log_dir: Option<PathBuf>,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            image_path: PathBuf::from(DEFAULT_IMAGE_PATH),
            extension_library: DEFAULT_EXTENSION_LIBRARY.to_string(),
            setup_symbol: DEFAULT_SETUP_SYMBOL.to_string(),
            runtime_library: HashLinkRuntime::default_library_name().to_string(),
            hot_reload: false,
            log_level: default_log_level().to_string(),
            log_dir: None,
        }
    }
}

impl BootConfig {
    /// Defaults overridden by `HLBOOT_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by `lookup`. Blank values are ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let value = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        let mut config = Self::default();
        if let Some(path) = value(ENV_IMAGE) {
            config.image_path = PathBuf::from(path);
        }
        if let Some(library) = value(ENV_EXTENSION) {
            config.extension_library = library;
        }
        if let Some(symbol) = value(ENV_SETUP_SYMBOL) {
            config.setup_symbol = symbol;
        }
        if let Some(library) = value(ENV_RUNTIME) {
            config.runtime_library = library;
        }
        if let Some(flag) = value(ENV_HOT_RELOAD) {
            config.hot_reload = parse_flag(&flag);
        }
        if let Some(level) = value(ENV_LOG_LEVEL) {
            config.log_level = level;
        }
        config.log_dir = value(ENV_LOG_DIR).map(PathBuf::from);
        config
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
