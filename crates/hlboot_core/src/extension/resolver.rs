//! Extension library resolution.

use super::capability::{SetupFn, SetupHook};
use crate::error::{BootError, BootResult};
use libloading::Library;
use log::{error, info};
use std::path::PathBuf;

/// Resolves a secondary extension's entry symbol into a [`SetupHook`].
pub trait ExtensionResolver {
    /// # Errors
    /// - `ExtensionNotFound` when `library` cannot be opened.
    /// - `SymbolNotFound` when `symbol` is absent or null.
    fn resolve(&self, library: &str, symbol: &str) -> BootResult<SetupHook>;
}

/// Opens extensions as shared libraries.
#[derive(Debug, Clone, Default)]
pub struct DylibResolver {
    search_dir: Option<PathBuf>,
}

impl DylibResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves relative library names against `dir` instead of the loader's
    /// default search path.
    pub fn with_search_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            search_dir: Some(dir.into()),
        }
    }

    fn locate(&self, library: &str) -> PathBuf {
        match &self.search_dir {
            Some(dir) if !PathBuf::from(library).is_absolute() => dir.join(library),
            _ => PathBuf::from(library),
        }
    }
}

impl ExtensionResolver for DylibResolver {
    fn resolve(&self, library: &str, symbol: &str) -> BootResult<SetupHook> {
        let path = self.locate(library);
        // SAFETY: extension libraries are trusted host components.
        let lib = unsafe { Library::new(&path) }.map_err(|err| {
            error!(
                "event=extension_load module=extension status=error error_code=extension_not_found library={} error={err}",
                path.display()
            );
            BootError::ExtensionNotFound {
                library: library.to_string(),
                reason: err.to_string(),
            }
        })?;

        // SAFETY: `setup` is declared as `void setup(options*)` by contract;
        // `Option` lets a null export surface as `None`.
        let entry = unsafe { lib.get::<Option<SetupFn>>(symbol.as_bytes()) }
            .ok()
            .and_then(|resolved| *resolved);
        let Some(entry) = entry else {
            error!(
                "event=extension_load module=extension status=error error_code=symbol_not_found library={} symbol={symbol}",
                path.display()
            );
            return Err(BootError::SymbolNotFound {
                library: library.to_string(),
                symbol: symbol.to_string(),
            });
        };

        info!(
            "event=extension_load module=extension status=ok library={} symbol={symbol}",
            path.display()
        );
        Ok(SetupHook::from_library(library, symbol, entry, lib))
    }
}
