//! Store error types.
//!
//! Error codes:
//! - SAT_STORE_OUT_OF_SPACE (ERROR severity)
//! - SAT_STORE_EXHAUSTED (ERROR severity) - capacity-pressure signal
//! - SAT_STORE_NOT_FOUND (ERROR severity)
//! - SAT_STORE_ALREADY_TOMBSTONED (ERROR severity)
//! - SAT_STORE_INVALID_TRANSITION (ERROR severity)
//! - SAT_STORE_INTEGRITY_FAILED (ERROR severity) - torn record, recovered locally
//! - SAT_STORE_RECORD_TOO_LARGE (ERROR severity)
//! - SAT_STORE_DEVICE_ERROR (ERROR severity)
//! - SAT_STORE_FORMAT_INVALID (FATAL severity) - device unusable
//!
//! Integrity failures and device errors on individual records are recovered
//! locally: the record is discarded and counted, the store keeps running.

use std::fmt;

use crate::device::DeviceError;
use crate::store::record::RecordState;

/// Severity levels for store errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, the system continues and degrades gracefully.
    Error,
    /// The device cannot be used at all (geometry/format mismatch).
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Store-specific error kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreErrorKind {
    /// No Free block exists and GC could not produce one in bounded attempts.
    OutOfSpace,
    /// Every block is fully live; nothing is reclaimable. The
    /// capacity-pressure signal surfaced upward for policy intervention.
    StorageExhausted,
    /// Unknown record id.
    NotFound { record_id: u64 },
    /// The record is already in its terminal state.
    AlreadyTombstoned { record_id: u64 },
    /// A state transition was requested from the wrong prior state.
    InvalidTransition {
        record_id: u64,
        from: RecordState,
        operation: &'static str,
    },
    /// A record's checksum did not match; the record is treated as torn.
    IntegrityCheckFailed { record_id: u64 },
    /// The record cannot fit in a single erase-block.
    RecordTooLarge { len: usize, max: usize },
    /// Wrapped block device failure.
    Device(String),
    /// The on-device format or geometry is unusable.
    FormatInvalid(String),
}

impl StoreErrorKind {
    /// Returns the string error code.
    pub fn code(&self) -> &'static str {
        match self {
            StoreErrorKind::OutOfSpace => "SAT_STORE_OUT_OF_SPACE",
            StoreErrorKind::StorageExhausted => "SAT_STORE_EXHAUSTED",
            StoreErrorKind::NotFound { .. } => "SAT_STORE_NOT_FOUND",
            StoreErrorKind::AlreadyTombstoned { .. } => "SAT_STORE_ALREADY_TOMBSTONED",
            StoreErrorKind::InvalidTransition { .. } => "SAT_STORE_INVALID_TRANSITION",
            StoreErrorKind::IntegrityCheckFailed { .. } => "SAT_STORE_INTEGRITY_FAILED",
            StoreErrorKind::RecordTooLarge { .. } => "SAT_STORE_RECORD_TOO_LARGE",
            StoreErrorKind::Device(_) => "SAT_STORE_DEVICE_ERROR",
            StoreErrorKind::FormatInvalid(_) => "SAT_STORE_FORMAT_INVALID",
        }
    }

    /// Returns the severity level for this error.
    pub fn severity(&self) -> Severity {
        match self {
            StoreErrorKind::FormatInvalid(_) => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

/// Store error with kind and context.
#[derive(Debug)]
pub struct StoreError {
    kind: StoreErrorKind,
    context: Option<String>,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    pub fn with_context(kind: StoreErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: Some(context.into()),
        }
    }

    pub fn out_of_space() -> Self {
        Self::new(StoreErrorKind::OutOfSpace)
    }

    pub fn exhausted() -> Self {
        Self::new(StoreErrorKind::StorageExhausted)
    }

    pub fn not_found(record_id: u64) -> Self {
        Self::new(StoreErrorKind::NotFound { record_id })
    }

    pub fn already_tombstoned(record_id: u64) -> Self {
        Self::new(StoreErrorKind::AlreadyTombstoned { record_id })
    }

    pub fn invalid_transition(record_id: u64, from: RecordState, operation: &'static str) -> Self {
        Self::new(StoreErrorKind::InvalidTransition {
            record_id,
            from,
            operation,
        })
    }

    pub fn integrity(record_id: u64) -> Self {
        Self::new(StoreErrorKind::IntegrityCheckFailed { record_id })
    }

    pub fn record_too_large(len: usize, max: usize) -> Self {
        Self::new(StoreErrorKind::RecordTooLarge { len, max })
    }

    pub fn format_invalid(reason: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::FormatInvalid(reason.into()))
    }

    pub fn kind(&self) -> &StoreErrorKind {
        &self.kind
    }

    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }

    /// True when the caller should treat this as capacity pressure rather
    /// than a hard failure.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self.kind,
            StoreErrorKind::OutOfSpace | StoreErrorKind::StorageExhausted
        )
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.severity(), self.kind.code())?;
        match &self.kind {
            StoreErrorKind::NotFound { record_id }
            | StoreErrorKind::AlreadyTombstoned { record_id }
            | StoreErrorKind::IntegrityCheckFailed { record_id } => {
                write!(f, " (record_id: {})", record_id)?;
            }
            StoreErrorKind::InvalidTransition {
                record_id,
                from,
                operation,
            } => {
                write!(
                    f,
                    " (record_id: {}, from: {:?}, operation: {})",
                    record_id, from, operation
                )?;
            }
            StoreErrorKind::RecordTooLarge { len, max } => {
                write!(f, " (len: {}, max: {})", len, max)?;
            }
            StoreErrorKind::Device(reason) | StoreErrorKind::FormatInvalid(reason) => {
                write!(f, ": {}", reason)?;
            }
            _ => {}
        }
        if let Some(context) = &self.context {
            write!(f, " ({})", context)?;
        }
        Ok(())
    }
}

impl std::error::Error for StoreError {}

impl From<DeviceError> for StoreError {
    fn from(err: DeviceError) -> Self {
        StoreError::new(StoreErrorKind::Device(err.to_string()))
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
