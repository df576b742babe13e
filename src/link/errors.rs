//! Link error types.
//!
//! Malformed frames and timeouts are not errors here: they are events the
//! session resolves internally (retry, reject, resynchronize). Errors are
//! reserved for misuse of the layer and for a channel that is gone.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    /// The peer side of the channel has been dropped.
    #[error("serial channel closed: {0}")]
    ChannelClosed(String),

    /// Underlying channel I/O failure.
    #[error("channel I/O error: {0}")]
    Io(String),

    /// A transmit request was issued while one is already outstanding.
    #[error("a request is already outstanding for record {0}")]
    Busy(u64),
}
