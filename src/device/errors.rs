//! Device-level error types.

use std::io;

use thiserror::Error;

/// Errors surfaced by block device implementations.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// An access crossed a block boundary or addressed a missing block.
    #[error("access out of bounds: block {block}, offset {offset}, len {len}")]
    OutOfBounds { block: u32, offset: u32, len: usize },

    /// A program operation tried to set a cleared bit back to 1. Only an
    /// erase cycle can do that.
    #[error("program conflict at block {block}, offset {offset}: region not erased")]
    ProgramConflict { block: u32, offset: u32 },

    /// Injected or real write failure; the write may be partially applied.
    #[error("write failed at block {block}, offset {offset}: {reason}")]
    WriteFailed {
        block: u32,
        offset: u32,
        reason: String,
    },

    /// Underlying I/O failure (file-backed devices).
    #[error("device I/O error: {0}")]
    Io(#[from] io::Error),

    /// The backing image does not match the expected geometry.
    #[error("geometry mismatch: {0}")]
    GeometryMismatch(String),
}

pub type DeviceResult<T> = Result<T, DeviceError>;
