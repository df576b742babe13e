//! CLI error types.

use thiserror::Error;

use crate::config::ConfigError;
use crate::coordinator::CoordinatorError;
use crate::device::DeviceError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Usage(String),
}

pub type CliResult<T> = Result<T, CliError>;
