//! Failure taxonomy for the bootstrap sequence.
//!
//! # Responsibility
//! - Name every way a bootstrap run can fail.
//! - Provide stable machine codes for log events.
//!
//! # Invariants
//! - Every variant except `UncaughtFault` is raised synchronously at its origin.
//! - `UncaughtFault` always carries the full captured stack.

use crate::trap::FaultRecord;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub type BootResult<T> = Result<T, BootError>;

/// Bootstrap failure kinds.
#[derive(Debug)]
pub enum BootError {
    /// Bytecode image could not be opened.
    NotFound {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Image was shorter than its declared size or a read failed.
    ReadError {
        path: PathBuf,
        expected: usize,
        read: usize,
        source: Option<std::io::Error>,
    },
    /// The VM parser rejected the image.
    MalformedImage { path: PathBuf, reason: String },
    /// The VM could not allocate a module.
    AllocationError(String),
    /// Module initialization could not resolve bytecode references.
    LinkError(String),
    /// The VM shared library or one of its exports is missing.
    RuntimeUnavailable(String),
    /// Secondary extension library could not be opened.
    ExtensionNotFound { library: String, reason: String },
    /// Secondary extension library lacks the required symbol.
    SymbolNotFound { library: String, symbol: String },
    /// The entrypoint raised a fault nobody caught.
    UncaughtFault(FaultRecord),
}

impl BootError {
    /// Stable error code used in `error_code=` log fields.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "image_not_found",
            Self::ReadError { .. } => "image_read_failed",
            Self::MalformedImage { .. } => "image_malformed",
            Self::AllocationError(_) => "module_alloc_failed",
            Self::LinkError(_) => "module_link_failed",
            Self::RuntimeUnavailable(_) => "runtime_unavailable",
            Self::ExtensionNotFound { .. } => "extension_not_found",
            Self::SymbolNotFound { .. } => "symbol_not_found",
            Self::UncaughtFault(_) => "uncaught_fault",
        }
    }
}

impl Display for BootError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { path, .. } => write!(f, "File not found '{}'", path.display()),
            Self::ReadError { path, .. } => write!(f, "Failed to read '{}'", path.display()),
            Self::MalformedImage { path, reason } => {
                write!(f, "Malformed bytecode '{}': {reason}", path.display())
            }
            Self::AllocationError(reason) => write!(f, "Module allocation failed: {reason}"),
            Self::LinkError(reason) => write!(f, "Module initialization failed: {reason}"),
            Self::RuntimeUnavailable(reason) => write!(f, "VM runtime unavailable: {reason}"),
            Self::ExtensionNotFound { library, reason } => {
                write!(f, "Extension not found '{library}': {reason}")
            }
            Self::SymbolNotFound { library, symbol } => {
                write!(f, "Symbol '{symbol}' not found in '{library}'")
            }
            Self::UncaughtFault(record) => write!(f, "Uncaught exception: {}", record.message),
        }
    }
}

impl Error for BootError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::NotFound { source, .. } => Some(source),
            Self::ReadError {
                source: Some(source),
                ..
            } => Some(source),
            _ => None,
        }
    }
}
