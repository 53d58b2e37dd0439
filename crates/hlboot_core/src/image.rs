//! Bytecode image reader.
//!
//! # Responsibility
//! - Read a bytecode image fully into memory.
//! - Hand the raw bytes to the VM parser and drop them afterwards.
//!
//! # Invariants
//! - The file handle is closed on every return path.
//! - A short read is always `ReadError`, never a partially filled image.
//! - The raw buffer never outlives parsing.
//! - Nothing is allocated for an image larger than the parser accepts.

use crate::error::{BootError, BootResult};
use crate::runtime::VmRuntime;
use log::{error, info};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::time::Instant;

/// Largest image the VM parser accepts; its size argument is an `i32`.
pub const MAX_IMAGE_BYTES: u64 = i32::MAX as u64;

/// Raw image bytes read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytecodeImage {
    bytes: Vec<u8>,
}

impl BytecodeImage {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Reads the image at `path`.
pub fn read_image(path: &Path) -> BootResult<BytecodeImage> {
    let file = File::open(path).map_err(|source| BootError::NotFound {
        path: path.to_path_buf(),
        source,
    })?;
    let declared = file
        .metadata()
        .map(|meta| meta.len())
        .map_err(|source| BootError::ReadError {
            path: path.to_path_buf(),
            expected: 0,
            read: 0,
            source: Some(source),
        })?;
    if declared > MAX_IMAGE_BYTES {
        return Err(BootError::MalformedImage {
            path: path.to_path_buf(),
            reason: format!("image of {declared} bytes exceeds the {MAX_IMAGE_BYTES} byte limit"),
        });
    }
    read_from(file, declared as usize, path)
}

/// Reads exactly `declared` bytes from `reader`.
///
/// `path` only labels errors. The reader is dropped before returning.
pub fn read_from<R: Read>(mut reader: R, declared: usize, path: &Path) -> BootResult<BytecodeImage> {
    let mut bytes = vec![0u8; declared];
    let mut pos = 0usize;
    while pos < declared {
        match reader.read(&mut bytes[pos..]) {
            Ok(0) => {
                return Err(BootError::ReadError {
                    path: path.to_path_buf(),
                    expected: declared,
                    read: pos,
                    source: None,
                })
            }
            Ok(n) => pos += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                return Err(BootError::ReadError {
                    path: path.to_path_buf(),
                    expected: declared,
                    read: pos,
                    source: Some(err),
                })
            }
        }
    }
    Ok(BytecodeImage { bytes })
}

/// Reads and parses the image at `path` with `vm`.
///
/// # Side effects
/// - Emits `image_load` logging events with duration and status.
pub fn load_code<V: VmRuntime>(vm: &V, path: &Path) -> BootResult<V::Code> {
    let started_at = Instant::now();
    info!(
        "event=image_load module=image status=start path={}",
        path.display()
    );

    let image = match read_image(path) {
        Ok(image) => image,
        Err(err) => {
            error!(
                "event=image_load module=image status=error duration_ms={} error_code={} error={}",
                started_at.elapsed().as_millis(),
                err.code(),
                err
            );
            return Err(err);
        }
    };

    let size = image.len();
    let parsed = vm.parse_code(image.as_bytes());
    drop(image);

    match parsed {
        Ok(code) => {
            info!(
                "event=image_load module=image status=ok duration_ms={} bytes={}",
                started_at.elapsed().as_millis(),
                size
            );
            Ok(code)
        }
        Err(reason) => {
            let err = BootError::MalformedImage {
                path: path.to_path_buf(),
                reason,
            };
            error!(
                "event=image_load module=image status=error duration_ms={} error_code={} error={}",
                started_at.elapsed().as_millis(),
                err.code(),
                err
            );
            Err(err)
        }
    }
}
